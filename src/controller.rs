//! Unified UI Controller
//!
//! The composition root and the only component permitted to call into more
//! than one leaf. It owns the scheduler, orchestrator, interrupt queue,
//! telemetry, and overlay, and runs them from a single task: every mutation
//! happens inside one `select!` loop, so nothing in the kernel needs a lock.
//!
//! Data flows inward (tool/session events → controller → leaves → overlay)
//! and one loop closes outward: telemetry feeds the adaptive-performance
//! sampler, which is the only place the scheduler's tick rate changes at
//! runtime.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::animation::{AnimationScheduler, FrameUpdate};
use crate::config::{KernelConfig, PerformanceMode};
use crate::easing::Easing;
use crate::events::{
    AnimationEvent, InterruptEvent, StatusEvent, TelemetrySignal, UiCommand,
};
use crate::interrupt::{InterruptId, InterruptManager, InterruptSpec};
use crate::overlay::{OverlayManager, OverlayRegion, OverlaySlot};
use crate::status::{StatusEntry, StatusOrchestrator, ToolCall, ToolProgress, Tone};
use crate::telemetry::{PerformanceSummary, TelemetrySnapshot, UiTelemetry};

/// Region priorities, highest drawn first and dropped last.
const PRIORITY_ALERTS: i32 = 90;
const PRIORITY_STATUS: i32 = 80;
const PRIORITY_PROGRESS: i32 = 40;
const PRIORITY_HINTS: i32 = 20;

/// Priority for interrupts raised from tool errors.
const TOOL_ERROR_PRIORITY: i32 = 8;
/// TTL for tool-error interrupts; they self-dismiss if unacknowledged.
const TOOL_ERROR_TTL: Duration = Duration::from_secs(10);
/// At most this many progress bars render at once.
const MAX_PROGRESS_ROWS: usize = 3;
/// Adaptive sampling ignores windows with fewer render samples than this.
const MIN_ADAPTIVE_SAMPLES: usize = 5;

/// Adaptive thresholds (frames per second / milliseconds).
const DOWNGRADE_FPS: f64 = 15.0;
const DOWNGRADE_RENDER_MS: f64 = 50.0;
const UPGRADE_FPS: f64 = 50.0;
const UPGRADE_RENDER_MS: f64 = 10.0;

/// Read-only controller snapshot for diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelState {
    /// Current adaptive performance mode
    pub mode: PerformanceMode,
    /// Whether an assistant turn is in progress
    pub processing: bool,
    /// Effective status text
    pub status_text: String,
    /// Effective status tone
    pub status_tone: Tone,
    /// Tools not yet in a terminal phase
    pub in_flight_tools: usize,
    /// Registered animations
    pub live_animations: usize,
    /// Active interrupt message, if any
    pub active_interrupt: Option<String>,
    /// Live interrupt queue depth
    pub interrupt_queue_depth: usize,
    /// Whether the overlay is currently drawn
    pub overlay_drawn: bool,
    /// Output-guard nesting depth
    pub output_depth: u32,
}

/// Cloneable external API. Every inbound call from the tool engine, session
/// control, or input front end goes through here and is serialized onto the
/// controller's run loop.
#[derive(Clone)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<UiCommand>,
}

impl UiHandle {
    fn send(&self, command: UiCommand) {
        // A closed channel means the kernel already shut down; callers have
        // nothing useful to do about it.
        let _ = self.tx.send(command);
    }

    /// A tool call started.
    pub fn on_tool_start(&self, call: ToolCall) {
        self.send(UiCommand::ToolStart { call });
    }

    /// A tool call reported progress.
    pub fn on_tool_progress(
        &self,
        id: impl Into<String>,
        current: u64,
        total: u64,
        message: Option<String>,
    ) {
        self.send(UiCommand::ToolProgress {
            id: id.into(),
            current,
            total,
            message,
        });
    }

    /// A tool call finished successfully.
    pub fn on_tool_complete(&self, id: impl Into<String>, result: Option<String>) {
        self.send(UiCommand::ToolComplete {
            id: id.into(),
            result,
        });
    }

    /// A tool call failed.
    pub fn on_tool_error(&self, id: impl Into<String>, error: impl Into<String>) {
        self.send(UiCommand::ToolError {
            id: id.into(),
            error: error.into(),
        });
    }

    /// An assistant turn begins.
    pub fn start_processing(&self) {
        self.send(UiCommand::StartProcessing);
    }

    /// The assistant turn ended.
    pub fn end_processing(&self) {
        self.send(UiCommand::EndProcessing);
    }

    /// Replace the base status line.
    pub fn set_base_status(&self, text: impl Into<String>, tone: Tone) {
        self.send(UiCommand::SetBaseStatus {
            text: text.into(),
            tone,
        });
    }

    /// Push a status override.
    pub fn push_status_override(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        detail: Option<String>,
        tone: Tone,
    ) {
        self.send(UiCommand::PushStatusOverride {
            id: id.into(),
            text: text.into(),
            detail,
            tone,
        });
    }

    /// Clear a status override.
    pub fn clear_status_override(&self, id: impl Into<String>) {
        self.send(UiCommand::ClearStatusOverride { id: id.into() });
    }

    /// Show the slash-command preview in the hints region.
    pub fn show_slash_command_preview(&self, commands: Vec<String>, filter: Option<String>) {
        self.send(UiCommand::ShowSlashCommandPreview { commands, filter });
    }

    /// Hide the slash-command preview.
    pub fn hide_slash_command_preview(&self) {
        self.send(UiCommand::HideSlashCommandPreview);
    }

    /// Show the profile switcher; it auto-hides after a few seconds.
    pub fn show_profile_switcher(&self, options: Vec<String>, current: impl Into<String>) {
        self.send(UiCommand::ShowProfileSwitcher {
            options,
            current: current.into(),
        });
    }

    /// Queue an interrupt and wait for its id.
    pub async fn queue_interrupt(&self, spec: InterruptSpec) -> anyhow::Result<InterruptId> {
        let (reply, rx) = oneshot::channel();
        self.send(UiCommand::QueueInterrupt { spec, reply });
        rx.await
            .map_err(|_| anyhow::anyhow!("kernel shut down"))?
            .map_err(Into::into)
    }

    /// Mark an interrupt completed.
    pub fn complete_interrupt(&self, id: InterruptId) {
        self.send(UiCommand::CompleteInterrupt { id });
    }

    /// Cancel a pending or active interrupt.
    pub fn cancel_interrupt(&self, id: InterruptId) {
        self.send(UiCommand::CancelInterrupt { id });
    }

    /// Ordinary program output begins. Must be paired with
    /// [`end_output`](Self::end_output); nesting is counted.
    pub fn begin_output(&self) {
        self.send(UiCommand::BeginOutput);
    }

    /// Matching end of ordinary program output.
    pub fn end_output(&self) {
        self.send(UiCommand::EndOutput);
    }

    /// Current telemetry snapshot.
    pub async fn telemetry_snapshot(&self) -> anyhow::Result<TelemetrySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(UiCommand::GetTelemetrySnapshot { reply });
        rx.await.map_err(|_| anyhow::anyhow!("kernel shut down"))
    }

    /// Rolling performance summary.
    pub async fn performance_summary(&self) -> anyhow::Result<PerformanceSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(UiCommand::GetPerformanceSummary { reply });
        rx.await.map_err(|_| anyhow::anyhow!("kernel shut down"))
    }

    /// Controller state snapshot.
    pub async fn state(&self) -> anyhow::Result<KernelState> {
        let (reply, rx) = oneshot::channel();
        self.send(UiCommand::GetState { reply });
        rx.await.map_err(|_| anyhow::anyhow!("kernel shut down"))
    }

    /// Stop the run loop.
    pub fn shutdown(&self) {
        self.send(UiCommand::Shutdown);
    }
}

/// The composition root. Construct with [`UnifiedUiController::new`], grab a
/// [`UiHandle`], then drive everything by awaiting [`run`](Self::run).
pub struct UnifiedUiController {
    config: KernelConfig,
    scheduler: AnimationScheduler,
    status: StatusOrchestrator,
    interrupts: InterruptManager,
    telemetry: UiTelemetry,
    overlay: OverlayManager,
    mode: PerformanceMode,
    processing: bool,
    /// Terminal tool rows scheduled for removal after the grace period.
    grace_deadlines: HashMap<String, Instant>,
    /// Profile-switcher auto-hide deadline.
    hint_deadline: Option<Instant>,
    /// Spinner animation ids the controller created; cleared in low mode.
    spinner_ids: HashSet<String>,
    /// Latest interpolated value per progress animation, keyed by tool id.
    progress_values: HashMap<String, f64>,
    last_spinner_glyph: Option<String>,
    last_elapsed: Option<String>,
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    cmd_rx: Option<mpsc::UnboundedReceiver<UiCommand>>,
    status_rx: mpsc::UnboundedReceiver<StatusEvent>,
    animation_rx: mpsc::UnboundedReceiver<AnimationEvent>,
    interrupt_rx: mpsc::UnboundedReceiver<InterruptEvent>,
    signal_rx: mpsc::UnboundedReceiver<TelemetrySignal>,
}

impl UnifiedUiController {
    /// Wire up all five leaves around the given output stream.
    #[must_use]
    pub fn new(config: KernelConfig, out: Box<dyn Write + Send>) -> Self {
        let mut scheduler = AnimationScheduler::new(config.tick_fps);
        let mut status = StatusOrchestrator::new();
        let mut interrupts = InterruptManager::new(config.interrupt_queue_capacity);
        let mut telemetry = UiTelemetry::new(
            config.telemetry_buffer_capacity,
            config.telemetry_flush_interval,
            config.slow_render_threshold,
        );
        let overlay = OverlayManager::new(out, config.overlay_max_height);

        let status_rx = status.subscribe();
        let animation_rx = scheduler.subscribe();
        let interrupt_rx = interrupts.subscribe();
        let signal_rx = telemetry.subscribe();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        Self {
            config,
            scheduler,
            status,
            interrupts,
            telemetry,
            overlay,
            mode: PerformanceMode::Balanced,
            processing: false,
            grace_deadlines: HashMap::new(),
            hint_deadline: None,
            spinner_ids: HashSet::new(),
            progress_values: HashMap::new(),
            last_spinner_glyph: None,
            last_elapsed: None,
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            status_rx,
            animation_rx,
            interrupt_rx,
            signal_rx,
        }
    }

    /// Construct a controller, spawn its run loop, and return the handle.
    pub fn spawn(
        config: KernelConfig,
        out: Box<dyn Write + Send>,
    ) -> (UiHandle, tokio::task::JoinHandle<io::Result<()>>) {
        let controller = Self::new(config, out);
        let handle = controller.handle();
        let join = tokio::spawn(controller.run());
        (handle, join)
    }

    /// A cloneable handle feeding this controller's command channel.
    #[must_use]
    pub fn handle(&self) -> UiHandle {
        UiHandle {
            tx: self.cmd_tx.clone(),
        }
    }

    /// Run until shutdown. All kernel mutation happens here.
    pub async fn run(mut self) -> io::Result<()> {
        let Some(mut cmd_rx) = self.cmd_rx.take() else {
            return Ok(());
        };

        let mut tick_fps = self.scheduler.target_fps();
        let mut tick = tokio::time::interval(self.scheduler.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut flush = tokio::time::interval(self.config.telemetry_flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut adaptive = tokio::time::interval(self.config.adaptive_interval);
        adaptive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_command = cmd_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            if !self.handle_command(command)? {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.on_tick(Instant::now())?;
                }
                _ = flush.tick() => {
                    self.on_flush(Instant::now());
                }
                _ = adaptive.tick() => {
                    self.on_adaptive_sample();
                }
            }

            // The adaptive sampler is the only mutator of the tick rate; pick
            // up a changed rate by rebuilding the interval.
            if self.scheduler.target_fps() != tick_fps {
                tick_fps = self.scheduler.target_fps();
                tick = tokio::time::interval(self.scheduler.tick_interval());
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }
        }

        self.overlay.hide()?;
        Ok(())
    }

    /// Dispatch one command. Returns `false` on shutdown.
    fn handle_command(&mut self, command: UiCommand) -> io::Result<bool> {
        match command {
            UiCommand::ToolStart { call } => self.tool_start(call)?,
            UiCommand::ToolProgress {
                id,
                current,
                total,
                message,
            } => self.tool_progress(&id, ToolProgress { current, total }, message)?,
            UiCommand::ToolComplete { id, result } => self.tool_complete(&id, result)?,
            UiCommand::ToolError { id, error } => self.tool_error(&id, error)?,
            UiCommand::StartProcessing => self.start_processing()?,
            UiCommand::EndProcessing => self.end_processing()?,
            UiCommand::SetBaseStatus { text, tone } => {
                self.status.set_base_status(StatusEntry::new(text, tone));
            }
            UiCommand::PushStatusOverride {
                id,
                text,
                detail,
                tone,
            } => {
                let mut entry = StatusEntry::new(text, tone);
                if let Some(detail) = detail {
                    entry = entry.with_detail(detail);
                }
                self.status.push_override(id, entry);
            }
            UiCommand::ClearStatusOverride { id } => self.status.clear_override(&id),
            UiCommand::ShowSlashCommandPreview { commands, filter } => {
                self.show_slash_preview(&commands, filter.as_deref())?;
            }
            UiCommand::HideSlashCommandPreview => {
                self.hint_deadline = None;
                self.overlay.update_region(OverlaySlot::Hints, None)?;
            }
            UiCommand::ShowProfileSwitcher { options, current } => {
                self.show_profile_switcher(&options, &current)?;
            }
            UiCommand::QueueInterrupt { spec, reply } => self.queue_interrupt(spec, reply)?,
            UiCommand::CompleteInterrupt { id } => {
                self.interrupts.complete(&id);
                self.pump_interrupts()?;
            }
            UiCommand::CancelInterrupt { id } => {
                self.interrupts.cancel(&id);
                self.pump_interrupts()?;
            }
            UiCommand::TtlElapsed { id } => {
                self.interrupts.expire_due(&id, Instant::now());
                self.pump_interrupts()?;
            }
            UiCommand::HandlerFinished { id, error } => {
                if let Some(error) = error {
                    tracing::warn!(interrupt = %id, %error, "interrupt handler failed");
                    self.telemetry
                        .record_error(&error, Some("interrupt-handler".to_string()));
                }
                // Handler errors never propagate; the interrupt completes.
                self.interrupts.complete(&id);
                self.pump_interrupts()?;
            }
            UiCommand::BeginOutput => self.overlay.begin_output()?,
            UiCommand::EndOutput => self.overlay.end_output()?,
            UiCommand::GetTelemetrySnapshot { reply } => {
                let _ = reply.send(self.telemetry.snapshot());
            }
            UiCommand::GetPerformanceSummary { reply } => {
                let _ = reply.send(self.telemetry.performance_summary());
            }
            UiCommand::GetState { reply } => {
                let _ = reply.send(self.state_snapshot());
            }
            UiCommand::Shutdown => return Ok(false),
        }
        self.drain_leaf_events()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Tool lifecycle
    // ------------------------------------------------------------------

    fn tool_start(&mut self, call: ToolCall) -> io::Result<()> {
        self.telemetry
            .record_event("tool.start", Some(call.parameters.clone()));
        let id = call.id.clone();
        let tool = call.tool.clone();
        if let Err(err) = self.status.on_tool_start(call) {
            self.telemetry.record_error(&err, Some("tool-contract".to_string()));
            return Ok(());
        }
        if self.mode.animations_enabled() {
            self.start_spinner(spinner_animation_id(&id), Some(tool));
            self.scheduler
                .create_elapsed(elapsed_animation_id(&id), Instant::now());
        }
        self.refresh_status_region()
    }

    fn tool_progress(
        &mut self,
        id: &str,
        progress: ToolProgress,
        message: Option<String>,
    ) -> io::Result<()> {
        if let Err(err) = self.status.on_tool_progress(id, progress, message) {
            self.telemetry.record_error(&err, Some("tool-contract".to_string()));
            return Ok(());
        }
        if let Some(percentage) = progress.percentage() {
            let animation_id = progress_animation_id(id);
            if self.mode.animations_enabled() {
                if self.scheduler.contains(&animation_id) {
                    self.scheduler.update_progress(&animation_id, percentage);
                } else {
                    self.scheduler.create_progress(
                        animation_id,
                        0.0,
                        percentage,
                        Duration::from_millis(300),
                    );
                }
            } else {
                self.progress_values.insert(id.to_string(), percentage);
            }
        }
        self.refresh_progress_region()
    }

    fn tool_complete(&mut self, id: &str, result: Option<String>) -> io::Result<()> {
        self.telemetry.record_event("tool.complete", None);
        if let Err(err) = self.status.on_tool_complete(id, result) {
            self.telemetry.record_error(&err, Some("tool-contract".to_string()));
            return Ok(());
        }
        self.finish_tool(id)
    }

    fn tool_error(&mut self, id: &str, error: String) -> io::Result<()> {
        self.telemetry.record_event("tool.error", None);
        if let Err(err) = self.status.on_tool_error(id, error.clone()) {
            self.telemetry.record_error(&err, Some("tool-contract".to_string()));
            return Ok(());
        }
        let tool = self
            .status
            .context()
            .get(id)
            .map_or_else(|| id.to_string(), |t| t.tool.clone());
        let spec = InterruptSpec::new("tool-error", TOOL_ERROR_PRIORITY, format!("{tool}: {error}"))
            .with_ttl(TOOL_ERROR_TTL);
        match self.interrupts.queue(spec) {
            Ok(interrupt_id) => self.arm_ttl(interrupt_id, TOOL_ERROR_TTL),
            Err(err) => self.telemetry.record_error(&err, Some("interrupt".to_string())),
        }
        self.pump_interrupts()?;
        self.finish_tool(id)
    }

    /// Shared terminal-transition bookkeeping: tear down the tool's
    /// animations and start the grace clock for its table row.
    fn finish_tool(&mut self, id: &str) -> io::Result<()> {
        let spinner_id = spinner_animation_id(id);
        self.scheduler.unregister(&spinner_id);
        self.scheduler.unregister(&elapsed_animation_id(id));
        self.scheduler.unregister(&progress_animation_id(id));
        self.spinner_ids.remove(&spinner_id);
        self.grace_deadlines
            .insert(id.to_string(), Instant::now() + self.config.tool_grace_period);
        self.refresh_status_region()?;
        self.refresh_progress_region()
    }

    // ------------------------------------------------------------------
    // Turn bracketing
    // ------------------------------------------------------------------

    fn start_processing(&mut self) -> io::Result<()> {
        self.processing = true;
        self.telemetry.record_event("turn.start", None);
        self.status
            .push_override("processing", StatusEntry::new("thinking", Tone::Active));
        if self.mode.animations_enabled() {
            self.start_spinner("thinking".to_string(), None);
        }
        self.refresh_status_region()
    }

    fn end_processing(&mut self) -> io::Result<()> {
        self.processing = false;
        self.telemetry.record_event("turn.end", None);
        self.scheduler.unregister("thinking");
        self.spinner_ids.remove("thinking");
        self.last_spinner_glyph = None;
        self.last_elapsed = None;
        self.status.clear_override("processing");
        self.refresh_status_region()
    }

    // ------------------------------------------------------------------
    // Interrupts
    // ------------------------------------------------------------------

    fn queue_interrupt(
        &mut self,
        spec: InterruptSpec,
        reply: oneshot::Sender<Result<InterruptId, crate::error::KernelError>>,
    ) -> io::Result<()> {
        let ttl = spec.ttl;
        match self.interrupts.queue(spec) {
            Ok(id) => {
                if let Some(ttl) = ttl {
                    self.arm_ttl(id.clone(), ttl);
                }
                let _ = reply.send(Ok(id));
                self.pump_interrupts()?;
            }
            Err(err) => {
                self.telemetry.record_error(&err, Some("interrupt".to_string()));
                let _ = reply.send(Err(err));
            }
        }
        Ok(())
    }

    /// One lazily-armed timer per TTL-bearing interrupt. The manager
    /// re-checks the deadline when the timer fires, so a timer outliving its
    /// interrupt is harmless.
    fn arm_ttl(&self, id: InterruptId, ttl: Duration) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(UiCommand::TtlElapsed { id });
        });
    }

    /// Activate the next interrupt if the slot is free, spawn its handler,
    /// and keep the alerts region in sync with the active interrupt.
    fn pump_interrupts(&mut self) -> io::Result<()> {
        if let Some(activation) = self.interrupts.try_activate() {
            self.telemetry.record_event("interrupt.activated", None);
            if self.mode.animations_enabled() {
                self.scheduler.create_transition(
                    format!("interrupt:{}:fade", activation.id),
                    0.0,
                    1.0,
                    "alert-fade",
                    Duration::from_millis(crate::interrupt::TRANSITION_IN_MS),
                    Easing::QuadOut,
                );
            }
            if let Some(handler) = activation.handler {
                let tx = self.cmd_tx.clone();
                let id = activation.id.clone();
                tokio::spawn(async move {
                    let error = handler().await.err().map(|e| format!("{e:#}"));
                    let _ = tx.send(UiCommand::HandlerFinished { id, error });
                });
            }
        }

        let alerts = self
            .interrupts
            .active()
            .map(|interrupt| OverlayRegion::line(format!("⚠ {}", interrupt.message), PRIORITY_ALERTS));
        self.overlay.update_region(OverlaySlot::Alerts, alerts)
    }

    // ------------------------------------------------------------------
    // Hints
    // ------------------------------------------------------------------

    fn show_slash_preview(&mut self, commands: &[String], filter: Option<&str>) -> io::Result<()> {
        self.hint_deadline = None;
        let content = match filter {
            Some(filter) if !filter.is_empty() => {
                format!("/{filter}: {}", commands.join("  "))
            }
            _ => commands.join("  "),
        };
        self.overlay.update_region(
            OverlaySlot::Hints,
            Some(OverlayRegion::line(content, PRIORITY_HINTS)),
        )
    }

    fn show_profile_switcher(&mut self, options: &[String], current: &str) -> io::Result<()> {
        let content = format!("profile: {current} ({})", options.join(" | "));
        self.hint_deadline = Some(Instant::now() + self.config.profile_switcher_timeout);
        self.overlay.update_region(
            OverlaySlot::Hints,
            Some(OverlayRegion::line(content, PRIORITY_HINTS)),
        )
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// One animation tick plus deadline sweeps.
    fn on_tick(&mut self, now: Instant) -> io::Result<()> {
        let frame_started = Instant::now();
        self.scheduler.tick(now);
        self.drain_leaf_events()?;

        // Grace sweep: drop terminal tool rows whose final frame has had its
        // time on screen.
        let due: Vec<String> = self
            .grace_deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| id.clone())
            .collect();
        if !due.is_empty() {
            for id in &due {
                self.grace_deadlines.remove(id);
                self.status.remove_tool(id);
                self.progress_values.remove(id);
            }
            self.refresh_status_region()?;
            self.refresh_progress_region()?;
        }

        // Hint auto-hide sweep.
        if self.hint_deadline.is_some_and(|deadline| now >= deadline) {
            self.hint_deadline = None;
            self.overlay.update_region(OverlaySlot::Hints, None)?;
        }

        // Every tick contributes a cadence sample, including idle ones;
        // otherwise the sampler starves in low mode and the kernel could
        // never climb back out of it.
        self.telemetry
            .record_render("overlay", frame_started.elapsed());
        Ok(())
    }

    fn on_flush(&mut self, now: Instant) {
        self.telemetry.flush(now);
    }

    /// Sample the rolling telemetry aggregates and move between performance
    /// modes. This is the only runtime mutator of the scheduler tick rate.
    fn on_adaptive_sample(&mut self) {
        let summary = self.telemetry.performance_summary();
        if summary.sample_count < MIN_ADAPTIVE_SAMPLES {
            return;
        }
        // The measured cadence can never exceed the current tick rate, so a
        // raw comparison would make the upgrade branch unreachable from
        // balanced and pin low mode forever. Scale the achieved fraction of
        // the current rate to the 60fps reference before applying the
        // thresholds, so they mean the same thing in every mode.
        let tick_fps = f64::from(self.scheduler.target_fps());
        let achieved = (summary.frame_rate / tick_fps).min(1.0);
        let frame_rate = achieved * 60.0;
        let target = if frame_rate < DOWNGRADE_FPS
            || summary.average_render_ms > DOWNGRADE_RENDER_MS
        {
            PerformanceMode::Low
        } else if frame_rate > UPGRADE_FPS && summary.average_render_ms < UPGRADE_RENDER_MS {
            PerformanceMode::High
        } else {
            PerformanceMode::Balanced
        };
        if target == PerformanceMode::Low && self.mode != PerformanceMode::Low {
            self.telemetry.signal_threshold_exceeded(
                "render-time",
                summary.average_render_ms,
                DOWNGRADE_RENDER_MS,
            );
        }
        self.set_mode(target);
    }

    /// Idempotent mode switch.
    fn set_mode(&mut self, target: PerformanceMode) {
        if self.mode == target {
            return;
        }
        tracing::info!(from = ?self.mode, to = ?target, "performance mode change");
        self.telemetry.record_event(
            "performance.mode-change",
            Some(serde_json::json!({ "mode": format!("{target:?}") })),
        );
        if !target.animations_enabled() {
            for id in self.spinner_ids.drain() {
                self.scheduler.unregister(&id);
            }
            self.last_spinner_glyph = None;
        }
        self.scheduler.set_target_fps(target.tick_fps());
        self.mode = target;
    }

    // ------------------------------------------------------------------
    // Leaf event translation
    // ------------------------------------------------------------------

    fn drain_leaf_events(&mut self) -> io::Result<()> {
        while let Ok(event) = self.status_rx.try_recv() {
            self.on_status_event(event)?;
        }
        while let Ok(event) = self.animation_rx.try_recv() {
            self.on_animation_event(event)?;
        }
        while let Ok(event) = self.interrupt_rx.try_recv() {
            self.on_interrupt_event(event)?;
        }
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.on_telemetry_signal(&signal);
        }
        Ok(())
    }

    fn on_status_event(&mut self, event: StatusEvent) -> io::Result<()> {
        match event {
            StatusEvent::ToolProgressed { .. } => self.refresh_progress_region()?,
            StatusEvent::ToolErrored { ref error, .. } => {
                tracing::debug!(%error, "tool errored");
            }
            _ => {}
        }
        self.refresh_status_region()
    }

    fn on_animation_event(&mut self, event: AnimationEvent) -> io::Result<()> {
        match event {
            AnimationEvent::Frame { id, update } => match update {
                FrameUpdate::Spinner { glyph, .. } => {
                    self.last_spinner_glyph = Some(glyph);
                    self.refresh_status_region()?;
                }
                FrameUpdate::Elapsed { formatted } => {
                    self.last_elapsed = Some(formatted);
                    self.refresh_status_region()?;
                }
                FrameUpdate::Progress { value } => {
                    if let Some(tool_id) = tool_id_of_progress_animation(&id) {
                        self.progress_values.insert(tool_id.to_string(), value);
                        self.refresh_progress_region()?;
                    }
                }
                FrameUpdate::Transition { .. } => {
                    // Alert fades repaint the alerts region as they run.
                    self.pump_interrupts()?;
                }
            },
            AnimationEvent::Completed { id } => {
                self.spinner_ids.remove(&id);
            }
        }
        Ok(())
    }

    fn on_interrupt_event(&mut self, event: InterruptEvent) -> io::Result<()> {
        match event {
            InterruptEvent::Completed { ref id, transition_ms } => {
                if self.mode.animations_enabled() {
                    self.scheduler.create_transition(
                        format!("interrupt:{id}:fade"),
                        1.0,
                        0.0,
                        "alert-fade",
                        Duration::from_millis(transition_ms),
                        Easing::QuadIn,
                    );
                }
            }
            InterruptEvent::Expired { ref id } | InterruptEvent::Cancelled { ref id } => {
                self.scheduler.unregister(&format!("interrupt:{id}:fade"));
            }
            _ => {}
        }
        Ok(())
    }

    fn on_telemetry_signal(&mut self, signal: &TelemetrySignal) {
        match signal {
            TelemetrySignal::SlowRender { label, millis } => {
                tracing::debug!(%label, millis, "slow render");
            }
            TelemetrySignal::FrameDrop { gap_ms } => {
                tracing::trace!(gap_ms, "frame drop");
            }
            TelemetrySignal::HighMemory { buffered } => {
                tracing::warn!(buffered, "telemetry buffers near capacity");
            }
            TelemetrySignal::ThresholdExceeded { .. } | TelemetrySignal::Flushed { .. } => {}
        }
    }

    // ------------------------------------------------------------------
    // Region composition
    // ------------------------------------------------------------------

    fn start_spinner(&mut self, id: String, message: Option<String>) {
        self.scheduler.create_spinner(id.clone(), message, None);
        self.spinner_ids.insert(id);
    }

    fn refresh_status_region(&mut self) -> io::Result<()> {
        let content = {
            let entry = self.status.current_status();
            let marker = self
                .last_spinner_glyph
                .clone()
                .unwrap_or_else(|| entry.tone.glyph().to_string());
            let mut line = format!("{marker} {}", entry.text);
            if let Some(detail) = &entry.detail {
                line.push_str(&format!(" ({detail})"));
            }
            let in_flight = self.status.in_flight_count();
            if in_flight > 0 {
                let plural = if in_flight == 1 { "" } else { "s" };
                line.push_str(&format!(" [{in_flight} tool{plural}]"));
            }
            if let Some(elapsed) = &self.last_elapsed {
                line.push_str(&format!(" {elapsed}"));
            }
            line
        };
        self.overlay.update_region(
            OverlaySlot::Status,
            Some(OverlayRegion::line(content, PRIORITY_STATUS)),
        )
    }

    fn refresh_progress_region(&mut self) -> io::Result<()> {
        let region = {
            let mut tools: Vec<_> = self
                .status
                .context()
                .values()
                .filter(|t| t.progress.is_some())
                .collect();
            tools.sort_by_key(|t| t.started_at);

            let lines: Vec<String> = tools
                .iter()
                .take(MAX_PROGRESS_ROWS)
                .map(|tool| {
                    let percentage = self
                        .progress_values
                        .get(&tool.id)
                        .copied()
                        .or_else(|| tool.progress.and_then(ToolProgress::percentage))
                        .unwrap_or(0.0);
                    format!(
                        "{} {} {:>3.0}%",
                        tool.tool,
                        progress_bar(percentage, 20),
                        percentage
                    )
                })
                .collect();

            (!lines.is_empty()).then(|| OverlayRegion {
                height: lines.len() as u16,
                content: lines.join("\n"),
                priority: PRIORITY_PROGRESS,
            })
        };
        self.overlay.update_region(OverlaySlot::Progress, region)
    }

    fn state_snapshot(&self) -> KernelState {
        let entry = self.status.current_status();
        KernelState {
            mode: self.mode,
            processing: self.processing,
            status_text: entry.text.clone(),
            status_tone: entry.tone,
            in_flight_tools: self.status.in_flight_count(),
            live_animations: self.scheduler.len(),
            active_interrupt: self.interrupts.active().map(|i| i.message.clone()),
            interrupt_queue_depth: self.interrupts.statistics().queue_depth,
            overlay_drawn: self.overlay.is_drawn(),
            output_depth: self.overlay.output_depth(),
        }
    }
}

fn spinner_animation_id(tool_id: &str) -> String {
    format!("tool:{tool_id}:spinner")
}

fn elapsed_animation_id(tool_id: &str) -> String {
    format!("tool:{tool_id}:elapsed")
}

fn progress_animation_id(tool_id: &str) -> String {
    format!("tool:{tool_id}:progress")
}

fn tool_id_of_progress_animation(animation_id: &str) -> Option<&str> {
    animation_id
        .strip_prefix("tool:")
        .and_then(|rest| rest.strip_suffix(":progress"))
}

/// Fixed-width bar, filled proportionally to `percentage`.
fn progress_bar(percentage: f64, width: usize) -> String {
    let clamped = percentage.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn controller() -> UnifiedUiController {
        UnifiedUiController::new(KernelConfig::default(), Box::new(io::sink()))
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            tool: "bash".to_string(),
            parameters: json!({"command": "ls"}),
        }
    }

    #[test]
    fn test_tool_start_creates_spinner_and_elapsed_pair() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        assert!(c.scheduler.contains("tool:t1:spinner"));
        assert!(c.scheduler.contains("tool:t1:elapsed"));
        assert_eq!(c.status.in_flight_count(), 1);
    }

    #[test]
    fn test_duplicate_tool_start_is_recorded_not_applied() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();

        assert_eq!(c.status.context().len(), 1);
        let snapshot = c.telemetry.snapshot();
        assert_eq!(snapshot.error_counts.get("tool-contract"), Some(&1));
    }

    #[test]
    fn test_tool_complete_tears_down_animations_and_arms_grace() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        c.handle_command(UiCommand::ToolComplete {
            id: "t1".into(),
            result: Some("ok".into()),
        })
        .unwrap();

        assert!(!c.scheduler.contains("tool:t1:spinner"));
        assert!(c.grace_deadlines.contains_key("t1"));
        // Row survives until the grace deadline for the final frame.
        assert!(c.status.context().contains_key("t1"));

        let sweep_at = Instant::now() + c.config.tool_grace_period + Duration::from_millis(10);
        c.on_tick(sweep_at).unwrap();
        assert!(!c.status.context().contains_key("t1"));
    }

    #[tokio::test]
    async fn test_tool_error_raises_alert_interrupt() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        c.handle_command(UiCommand::ToolError {
            id: "t1".into(),
            error: "exit 1".into(),
        })
        .unwrap();

        let active = c.interrupts.active().expect("interrupt active");
        assert_eq!(active.kind, "tool-error");
        assert!(!active.blocking);
        let alerts = c.overlay.region(OverlaySlot::Alerts).expect("alerts region");
        assert!(alerts.content.contains("exit 1"));
    }

    #[test]
    fn test_processing_bracket() {
        let mut c = controller();
        c.handle_command(UiCommand::StartProcessing).unwrap();
        assert!(c.processing);
        assert_eq!(c.status.current_status().text, "thinking");
        assert!(c.scheduler.contains("thinking"));

        c.handle_command(UiCommand::EndProcessing).unwrap();
        assert!(!c.processing);
        assert_eq!(c.status.current_status().text, "idle");
        assert!(!c.scheduler.contains("thinking"));
    }

    #[test]
    fn test_mode_change_is_idempotent_and_clears_spinners() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        assert!(c.scheduler.contains("tool:t1:spinner"));

        c.set_mode(PerformanceMode::Low);
        assert_eq!(c.scheduler.target_fps(), 10);
        assert!(!c.scheduler.contains("tool:t1:spinner"));
        // Elapsed counters are not spinners and keep running.
        assert!(c.scheduler.contains("tool:t1:elapsed"));

        // Idempotent: same target is a no-op.
        c.set_mode(PerformanceMode::Low);
        assert_eq!(c.scheduler.target_fps(), 10);
    }

    #[test]
    fn test_low_mode_suppresses_new_animations() {
        let mut c = controller();
        c.set_mode(PerformanceMode::Low);
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        assert!(!c.scheduler.contains("tool:t1:spinner"));
        assert_eq!(c.status.in_flight_count(), 1);
    }

    #[test]
    fn test_adaptive_sampler_needs_samples() {
        let mut c = controller();
        // No render samples: mode must not move.
        c.on_adaptive_sample();
        assert_eq!(c.mode, PerformanceMode::Balanced);
    }

    #[test]
    fn test_adaptive_downgrade_on_slow_renders() {
        let mut c = controller();
        for _ in 0..MIN_ADAPTIVE_SAMPLES + 1 {
            c.telemetry.record_render("overlay", Duration::from_millis(80));
        }
        c.on_adaptive_sample();
        assert_eq!(c.mode, PerformanceMode::Low);
        assert_eq!(c.scheduler.target_fps(), 10);
    }

    #[test]
    fn test_idle_ticks_feed_the_adaptive_sampler() {
        let mut c = controller();
        // No animations registered: ticks must still produce cadence
        // samples, or the sampler would starve.
        for _ in 0..MIN_ADAPTIVE_SAMPLES + 1 {
            c.on_tick(Instant::now()).unwrap();
        }
        let summary = c.telemetry.performance_summary();
        assert!(summary.sample_count >= MIN_ADAPTIVE_SAMPLES);
    }

    #[test]
    fn test_adaptive_upgrade_on_fast_renders() {
        let mut c = controller();
        for _ in 0..MIN_ADAPTIVE_SAMPLES + 1 {
            c.telemetry.record_render("overlay", Duration::from_millis(1));
        }
        c.on_adaptive_sample();
        assert_eq!(c.mode, PerformanceMode::High);
        assert_eq!(c.scheduler.target_fps(), 60);
    }

    #[test]
    fn test_adaptive_recovers_from_low_mode() {
        let mut c = controller();
        c.set_mode(PerformanceMode::Low);
        // The terminal recovered: ticks keep pace and renders are cheap.
        for _ in 0..MIN_ADAPTIVE_SAMPLES + 1 {
            c.telemetry.record_render("overlay", Duration::from_millis(1));
        }
        c.on_adaptive_sample();
        assert_ne!(c.mode, PerformanceMode::Low);
    }

    #[test]
    fn test_status_region_reflects_override_and_tools() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        c.handle_command(UiCommand::PushStatusOverride {
            id: "compact".into(),
            text: "compacting context".into(),
            detail: None,
            tone: Tone::Active,
        })
        .unwrap();

        let region = c.overlay.region(OverlaySlot::Status).expect("status region");
        assert!(region.content.contains("compacting context"));
        assert!(region.content.contains("[1 tool]"));
    }

    #[test]
    fn test_progress_region_renders_bars() {
        let mut c = controller();
        c.handle_command(UiCommand::ToolStart { call: call("t1") }).unwrap();
        c.handle_command(UiCommand::ToolProgress {
            id: "t1".into(),
            current: 5,
            total: 10,
            message: None,
        })
        .unwrap();

        let region = c.overlay.region(OverlaySlot::Progress).expect("progress region");
        assert!(region.content.contains('█'));
        assert!(region.content.contains('%'));
    }

    #[test]
    fn test_hints_region_for_slash_preview() {
        let mut c = controller();
        c.handle_command(UiCommand::ShowSlashCommandPreview {
            commands: vec!["/help".into(), "/model".into()],
            filter: Some("m".into()),
        })
        .unwrap();
        let region = c.overlay.region(OverlaySlot::Hints).expect("hints region");
        assert!(region.content.contains("/model"));

        c.handle_command(UiCommand::HideSlashCommandPreview).unwrap();
        assert!(c.overlay.region(OverlaySlot::Hints).is_none());
    }

    #[test]
    fn test_profile_switcher_auto_hides() {
        let mut c = controller();
        c.handle_command(UiCommand::ShowProfileSwitcher {
            options: vec!["fast".into(), "smart".into()],
            current: "smart".into(),
        })
        .unwrap();
        assert!(c.overlay.region(OverlaySlot::Hints).is_some());

        let later = Instant::now() + c.config.profile_switcher_timeout + Duration::from_millis(10);
        c.on_tick(later).unwrap();
        assert!(c.overlay.region(OverlaySlot::Hints).is_none());
    }

    #[test]
    fn test_progress_bar_rendering() {
        assert_eq!(progress_bar(0.0, 4), "░░░░");
        assert_eq!(progress_bar(50.0, 4), "██░░");
        assert_eq!(progress_bar(100.0, 4), "████");
        // Out-of-range input is clamped.
        assert_eq!(progress_bar(250.0, 4), "████");
    }

    #[test]
    fn test_state_snapshot_shape() {
        let mut c = controller();
        c.handle_command(UiCommand::StartProcessing).unwrap();
        let state = c.state_snapshot();
        assert!(state.processing);
        assert_eq!(state.status_text, "thinking");
        assert_eq!(state.mode, PerformanceMode::Balanced);
        assert!(state.overlay_drawn);
    }
}
