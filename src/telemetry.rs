//! UI Telemetry
//!
//! Ring-buffered recorder for events, timing metrics, interactions, and
//! render measurements, plus a rolling error log. Threshold checks run
//! inline on every measurement and emit [`TelemetrySignal`]s; the controller
//! subscribes to those for adaptive behavior. Telemetry itself never mutates
//! scheduler or overlay state.
//!
//! All metadata is anonymized before storage: values under sensitive field
//! names (password/token/key/secret/email/username, matched as
//! case-insensitive substrings) are redacted recursively.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::events::TelemetrySignal;

/// Field-name fragments that trigger redaction.
const SENSITIVE_FIELDS: [&str; 6] = ["password", "token", "key", "secret", "email", "username"];

/// Replacement for redacted values.
const REDACTED: &str = "[redacted]";

/// Two frame periods at 60fps; a render gap at or beyond this is a dropped
/// frame.
const FRAME_DROP_GAP: Duration = Duration::from_micros(2 * 1_000_000 / 60);

/// High-memory signal fires when the buffers reach this share of their
/// combined capacity.
const HIGH_MEMORY_RATIO: f64 = 0.9;

#[derive(Clone, Debug)]
struct EventRecord {
    kind: String,
    #[allow(dead_code)]
    metadata: Option<Value>,
    at: Instant,
}

#[derive(Clone, Debug)]
struct MetricRecord {
    name: String,
    duration: Duration,
    at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InteractionOutcome {
    Started,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug)]
struct InteractionRecord {
    id: u64,
    #[allow(dead_code)]
    kind: String,
    #[allow(dead_code)]
    target: Option<String>,
    outcome: InteractionOutcome,
    at: Instant,
}

#[derive(Clone, Debug)]
struct RenderRecord {
    #[allow(dead_code)]
    component: String,
    duration: Duration,
    at: Instant,
}

#[derive(Clone, Debug)]
struct ErrorRecord {
    #[allow(dead_code)]
    message: String,
    context: String,
    at: Instant,
}

/// Resolution handle returned by [`UiTelemetry::record_interaction`].
///
/// Pass back to [`UiTelemetry::complete_interaction`] or
/// [`UiTelemetry::cancel_interaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InteractionToken(u64);

/// Point-in-time aggregate of everything currently buffered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Wall-clock time the snapshot was taken
    pub taken_at: chrono::DateTime<chrono::Utc>,
    /// Event counts by event type
    pub event_counts: HashMap<String, usize>,
    /// Total buffered events
    pub total_events: usize,
    /// Mean duration per metric name, in milliseconds
    pub average_durations_ms: HashMap<String, f64>,
    /// Interactions resolved as completed
    pub completed_interactions: usize,
    /// Interactions resolved as cancelled
    pub cancelled_interactions: usize,
    /// Error counts by context
    pub error_counts: HashMap<String, usize>,
    /// Total entries across all ring buffers
    pub buffered_entries: usize,
}

/// Rolling render-performance aggregate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Mean render duration over the buffered window, in milliseconds
    pub average_render_ms: f64,
    /// Renders per second over the buffered window
    pub frame_rate: f64,
    /// Renders that crossed the slow-render threshold
    pub slow_renders: u64,
    /// Render gaps spanning two or more 60fps frames
    pub frame_drops: u64,
    /// Render samples in the window
    pub sample_count: usize,
}

/// Ring-buffered event/metric/interaction/error recorder.
pub struct UiTelemetry {
    enabled: bool,
    capacity: usize,
    flush_interval: Duration,
    slow_render_threshold: Duration,
    events: VecDeque<EventRecord>,
    metrics: VecDeque<MetricRecord>,
    interactions: VecDeque<InteractionRecord>,
    renders: VecDeque<RenderRecord>,
    errors: VecDeque<ErrorRecord>,
    marks: HashMap<String, Instant>,
    last_render_at: Option<Instant>,
    next_interaction: u64,
    slow_renders: u64,
    frame_drops: u64,
    subscribers: Vec<mpsc::UnboundedSender<TelemetrySignal>>,
}

impl UiTelemetry {
    /// Create a recorder.
    ///
    /// Each of the four ring buffers holds at most `capacity` entries;
    /// `flush_interval` additionally bounds entries by age on every flush.
    #[must_use]
    pub fn new(capacity: usize, flush_interval: Duration, slow_render_threshold: Duration) -> Self {
        Self {
            enabled: true,
            capacity: capacity.max(1),
            flush_interval,
            slow_render_threshold,
            events: VecDeque::new(),
            metrics: VecDeque::new(),
            interactions: VecDeque::new(),
            renders: VecDeque::new(),
            errors: VecDeque::new(),
            marks: HashMap::new(),
            last_render_at: None,
            next_interaction: 0,
            slow_renders: 0,
            frame_drops: 0,
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to threshold signals and flush snapshots.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TelemetrySignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, signal: TelemetrySignal) {
        self.subscribers.retain(|tx| tx.send(signal.clone()).is_ok());
    }

    /// Enable or disable recording. While disabled every `record_*` call is
    /// a no-op; already-buffered data stays readable.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether recording is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a named event with optional metadata (anonymized on entry).
    pub fn record_event(&mut self, kind: impl Into<String>, metadata: Option<Value>) {
        if !self.enabled {
            return;
        }
        let metadata = metadata.map(|mut value| {
            anonymize(&mut value);
            value
        });
        push_bounded(
            &mut self.events,
            EventRecord {
                kind: kind.into(),
                metadata,
                at: Instant::now(),
            },
            self.capacity,
        );
    }

    /// Start a named timing mark. Re-marking a live name restarts it.
    pub fn mark_start(&mut self, name: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.marks.insert(name.into(), Instant::now());
    }

    /// End a timing mark, record the metric, and run the render-time
    /// threshold check. Returns the measured duration; `None` for an unknown
    /// mark.
    pub fn mark_end(&mut self, name: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let started = self.marks.remove(name)?;
        let duration = started.elapsed();
        push_bounded(
            &mut self.metrics,
            MetricRecord {
                name: name.to_string(),
                duration,
                at: Instant::now(),
            },
            self.capacity,
        );
        if duration >= self.slow_render_threshold {
            self.slow_renders += 1;
            self.publish(TelemetrySignal::SlowRender {
                label: name.to_string(),
                millis: duration.as_millis() as u64,
            });
        }
        Some(duration)
    }

    /// Record the start of a user interaction. Resolve it later with
    /// [`complete_interaction`](Self::complete_interaction) or
    /// [`cancel_interaction`](Self::cancel_interaction).
    pub fn record_interaction(
        &mut self,
        kind: impl Into<String>,
        target: Option<String>,
    ) -> InteractionToken {
        let token = InteractionToken(self.next_interaction);
        self.next_interaction += 1;
        if !self.enabled {
            return token;
        }
        // Interactions land between renders; a long gap since the last
        // render is the same stall signal here as in `record_render`. The
        // render clock itself is not advanced, an interaction is not a
        // render.
        self.check_frame_gap(Instant::now());
        push_bounded(
            &mut self.interactions,
            InteractionRecord {
                id: token.0,
                kind: kind.into(),
                target,
                outcome: InteractionOutcome::Started,
                at: Instant::now(),
            },
            self.capacity,
        );
        token
    }

    /// Resolve an interaction as completed.
    pub fn complete_interaction(&mut self, token: InteractionToken) {
        self.resolve_interaction(token, InteractionOutcome::Completed);
    }

    /// Resolve an interaction as cancelled.
    pub fn cancel_interaction(&mut self, token: InteractionToken) {
        self.resolve_interaction(token, InteractionOutcome::Cancelled);
    }

    fn resolve_interaction(&mut self, token: InteractionToken, outcome: InteractionOutcome) {
        if let Some(record) = self.interactions.iter_mut().find(|r| r.id == token.0) {
            if record.outcome == InteractionOutcome::Started {
                record.outcome = outcome;
            }
        }
    }

    /// Wall-clock-gap frame-drop check against the previous render.
    fn check_frame_gap(&mut self, now: Instant) {
        if let Some(last) = self.last_render_at {
            let gap = now.saturating_duration_since(last);
            if gap >= FRAME_DROP_GAP {
                self.frame_drops += 1;
                self.publish(TelemetrySignal::FrameDrop {
                    gap_ms: gap.as_millis() as u64,
                });
            }
        }
    }

    /// Record one component render and run the inline threshold checks.
    pub fn record_render(&mut self, component: impl Into<String>, render_time: Duration) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        self.check_frame_gap(now);
        self.last_render_at = Some(now);

        let component = component.into();
        if render_time >= self.slow_render_threshold {
            self.slow_renders += 1;
            self.publish(TelemetrySignal::SlowRender {
                label: component.clone(),
                millis: render_time.as_millis() as u64,
            });
        }
        push_bounded(
            &mut self.renders,
            RenderRecord {
                component,
                duration: render_time,
                at: now,
            },
            self.capacity,
        );
    }

    /// Record an error with optional context.
    pub fn record_error(&mut self, error: impl std::fmt::Display, context: Option<String>) {
        if !self.enabled {
            return;
        }
        push_bounded(
            &mut self.errors,
            ErrorRecord {
                message: error.to_string(),
                context: context.unwrap_or_else(|| "general".to_string()),
                at: Instant::now(),
            },
            self.capacity,
        );
    }

    fn buffered_entries(&self) -> usize {
        self.events.len() + self.metrics.len() + self.interactions.len() + self.renders.len()
    }

    /// Current point-in-time aggregate.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let mut event_counts: HashMap<String, usize> = HashMap::new();
        for event in &self.events {
            *event_counts.entry(event.kind.clone()).or_default() += 1;
        }

        let mut duration_sums: HashMap<String, (f64, usize)> = HashMap::new();
        for metric in &self.metrics {
            let entry = duration_sums.entry(metric.name.clone()).or_default();
            entry.0 += metric.duration.as_secs_f64() * 1000.0;
            entry.1 += 1;
        }
        let average_durations_ms = duration_sums
            .into_iter()
            .map(|(name, (sum, count))| (name, sum / count as f64))
            .collect();

        let mut error_counts: HashMap<String, usize> = HashMap::new();
        for error in &self.errors {
            *error_counts.entry(error.context.clone()).or_default() += 1;
        }

        TelemetrySnapshot {
            taken_at: chrono::Utc::now(),
            total_events: self.events.len(),
            event_counts,
            average_durations_ms,
            completed_interactions: self
                .interactions
                .iter()
                .filter(|i| i.outcome == InteractionOutcome::Completed)
                .count(),
            cancelled_interactions: self
                .interactions
                .iter()
                .filter(|i| i.outcome == InteractionOutcome::Cancelled)
                .count(),
            error_counts,
            buffered_entries: self.buffered_entries(),
        }
    }

    /// Rolling render-performance aggregate over the buffered window.
    #[must_use]
    pub fn performance_summary(&self) -> PerformanceSummary {
        let sample_count = self.renders.len();
        let average_render_ms = if sample_count == 0 {
            0.0
        } else {
            self.renders
                .iter()
                .map(|r| r.duration.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / sample_count as f64
        };

        let frame_rate = match (self.renders.front(), self.renders.back()) {
            (Some(first), Some(last)) if sample_count > 1 => {
                let span = last.at.saturating_duration_since(first.at).as_secs_f64();
                if span > 0.0 {
                    (sample_count - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        PerformanceSummary {
            average_render_ms,
            frame_rate,
            slow_renders: self.slow_renders,
            frame_drops: self.frame_drops,
            sample_count,
        }
    }

    /// Periodic flush: age-trim every buffer to the flush window, emit the
    /// high-memory signal if the buffers are near their combined cap, and
    /// publish a snapshot event. Returns the snapshot.
    pub fn flush(&mut self, now: Instant) -> TelemetrySnapshot {
        let cutoff = now.checked_sub(self.flush_interval);
        if let Some(cutoff) = cutoff {
            self.events.retain(|r| r.at >= cutoff);
            self.metrics.retain(|r| r.at >= cutoff);
            self.interactions.retain(|r| r.at >= cutoff);
            self.renders.retain(|r| r.at >= cutoff);
            self.errors.retain(|r| r.at >= cutoff);
        }

        let buffered = self.buffered_entries();
        if buffered as f64 >= self.capacity as f64 * 4.0 * HIGH_MEMORY_RATIO {
            self.publish(TelemetrySignal::HighMemory { buffered });
        }

        let snapshot = self.snapshot();
        self.publish(TelemetrySignal::Flushed {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Emit a threshold-exceeded signal for a named metric. Used by the
    /// controller when a sampled aggregate (not a single measurement)
    /// crosses a configured line.
    pub fn signal_threshold_exceeded(&mut self, metric: impl Into<String>, value: f64, threshold: f64) {
        self.publish(TelemetrySignal::ThresholdExceeded {
            metric: metric.into(),
            value,
            threshold,
        });
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    buffer.push_back(item);
    while buffer.len() > capacity {
        buffer.pop_front();
    }
}

/// Redact sensitive fields recursively through objects and arrays.
fn anonymize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|field| lower.contains(field)) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    anonymize(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                anonymize(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn telemetry(capacity: usize) -> UiTelemetry {
        UiTelemetry::new(
            capacity,
            Duration::from_secs(60),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        let mut t = telemetry(10_000);
        for i in 0..10_001u32 {
            t.record_event(format!("e{i}"), None);
        }
        let snapshot = t.snapshot();
        assert_eq!(snapshot.total_events, 10_000);
        // The oldest event was evicted.
        assert!(!snapshot.event_counts.contains_key("e0"));
        assert!(snapshot.event_counts.contains_key("e10000"));
    }

    #[test]
    fn test_metadata_is_anonymized_recursively() {
        let mut value = json!({
            "apiToken": "tok-123",
            "nested": { "user_email": "x@example.com", "path": "/tmp/a" },
            "list": [ { "password": "hunter2" } ],
        });
        anonymize(&mut value);
        assert_eq!(value["apiToken"], REDACTED);
        assert_eq!(value["nested"]["user_email"], REDACTED);
        assert_eq!(value["nested"]["path"], "/tmp/a");
        assert_eq!(value["list"][0]["password"], REDACTED);
    }

    #[test]
    fn test_mark_end_measures_and_signals_slow_renders() {
        let mut t = telemetry(100);
        let mut rx = t.subscribe();

        t.mark_start("paint");
        // Simulate a slow section by backdating the mark.
        *t.marks.get_mut("paint").unwrap() -= Duration::from_millis(80);
        let duration = t.mark_end("paint").unwrap();
        assert!(duration >= Duration::from_millis(80));

        match rx.try_recv().unwrap() {
            TelemetrySignal::SlowRender { label, millis } => {
                assert_eq!(label, "paint");
                assert!(millis >= 80);
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn test_unknown_mark_end_is_none() {
        let mut t = telemetry(100);
        assert!(t.mark_end("never-started").is_none());
    }

    #[test]
    fn test_interaction_resolution() {
        let mut t = telemetry(100);
        let a = t.record_interaction("keypress", None);
        let b = t.record_interaction("click", Some("alerts".into()));
        t.complete_interaction(a);
        t.cancel_interaction(b);
        // Double resolution does not flip the outcome.
        t.cancel_interaction(a);

        let snapshot = t.snapshot();
        assert_eq!(snapshot.completed_interactions, 1);
        assert_eq!(snapshot.cancelled_interactions, 1);
    }

    #[test]
    fn test_frame_drop_detection() {
        let mut t = telemetry(100);
        let mut rx = t.subscribe();

        t.record_render("overlay", Duration::from_millis(1));
        // Backdate the previous render so the gap spans > 2 frame periods.
        t.last_render_at = Some(Instant::now() - Duration::from_millis(100));
        t.record_render("overlay", Duration::from_millis(1));

        assert!(rx
            .try_recv()
            .iter()
            .any(|s| matches!(s, TelemetrySignal::FrameDrop { .. })));
        assert_eq!(t.performance_summary().frame_drops, 1);
    }

    #[test]
    fn test_frame_drop_detection_on_interactions() {
        let mut t = telemetry(100);
        let mut rx = t.subscribe();

        t.record_render("overlay", Duration::from_millis(1));
        t.last_render_at = Some(Instant::now() - Duration::from_millis(100));
        t.record_interaction("keypress", None);

        assert!(rx
            .try_recv()
            .iter()
            .any(|s| matches!(s, TelemetrySignal::FrameDrop { .. })));
        // Interactions observe the render clock but never advance it: the
        // stale gap is still there for the next render to report.
        t.record_render("overlay", Duration::from_millis(1));
        assert_eq!(t.performance_summary().frame_drops, 2);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut t = telemetry(100);
        t.set_enabled(false);
        t.record_event("x", None);
        t.record_render("y", Duration::from_millis(1));
        t.record_error("boom", None);
        assert_eq!(t.snapshot().buffered_entries, 0);

        t.set_enabled(true);
        t.record_event("x", None);
        assert_eq!(t.snapshot().total_events, 1);
    }

    #[test]
    fn test_flush_age_trims_and_publishes_snapshot() {
        let mut t = UiTelemetry::new(100, Duration::from_millis(50), Duration::from_millis(50));
        let mut rx = t.subscribe();
        t.record_event("old", None);
        std::thread::sleep(Duration::from_millis(100));
        t.record_event("fresh", None);

        let snapshot = t.flush(Instant::now());
        assert_eq!(snapshot.total_events, 1);
        assert!(snapshot.event_counts.contains_key("fresh"));
        assert!(matches!(rx.try_recv().unwrap(), TelemetrySignal::Flushed { .. }));
    }

    #[test]
    fn test_error_counts_by_context() {
        let mut t = telemetry(100);
        t.record_error("bad", Some("overlay".into()));
        t.record_error("worse", Some("overlay".into()));
        t.record_error("meh", None);

        let snapshot = t.snapshot();
        assert_eq!(snapshot.error_counts.get("overlay"), Some(&2));
        assert_eq!(snapshot.error_counts.get("general"), Some(&1));
    }

    #[test]
    fn test_performance_summary_averages() {
        let mut t = telemetry(100);
        t.record_render("a", Duration::from_millis(10));
        t.record_render("a", Duration::from_millis(30));
        let summary = t.performance_summary();
        assert_eq!(summary.sample_count, 2);
        assert!((summary.average_render_ms - 20.0).abs() < 0.5);
    }
}
