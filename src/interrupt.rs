//! Interrupt Queue
//!
//! A priority/TTL queue of transient notifications that need operator
//! attention. At most one interrupt is active at a time; a blocking active
//! interrupt prevents any other from activating regardless of priority.
//!
//! # State machine
//!
//! ```text
//! pending ──(highest priority, no blocker)──▶ active ──▶ completed
//!    │                                          │
//!    ├──(blocker chosen, self deferrable)──▶ deferred ──(blocker clears)──▶ pending
//!    ├──(ttl elapsed)──▶ expired ◀──(ttl elapsed)┤
//!    └──(cancel)──▶ cancelled ◀──────(cancel)────┘
//! ```
//!
//! Selection among `pending` is strictly highest priority, ties broken by an
//! explicit enqueue sequence number (FIFO), never by map iteration order.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::KernelError;
use crate::events::InterruptEvent;

/// Suggested fade-in duration published with activation events.
pub const TRANSITION_IN_MS: u64 = 200;
/// Suggested fade-out duration published with completion events.
pub const TRANSITION_OUT_MS: u64 = 150;

/// Interrupt identifier. Caller-opaque; generated when the spec omits one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterruptId(pub String);

impl InterruptId {
    /// Create an id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh unique id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("int_{}", uuid::Uuid::new_v4()))
    }

    /// The string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InterruptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of an interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterruptPhase {
    /// Queued, waiting for selection
    Pending,
    /// Currently presented to the operator
    Active,
    /// Parked while a blocking interrupt holds the active slot
    Deferred,
    /// Terminal: resolved
    Completed,
    /// Terminal: TTL elapsed before resolution
    Expired,
    /// Terminal: cancelled by the caller
    Cancelled,
}

impl InterruptPhase {
    /// Whether this phase admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }
}

/// Optional work run when an interrupt activates. Failures are recorded as
/// telemetry; the interrupt still completes.
pub type InterruptHandler = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Specification passed to [`InterruptManager::queue`].
pub struct InterruptSpec {
    /// Explicit id; generated when `None`
    pub id: Option<InterruptId>,
    /// Caller-defined category (e.g. "confirmation", "tool-error")
    pub kind: String,
    /// Higher is more urgent
    pub priority: i32,
    /// Message shown in the alerts region
    pub message: String,
    /// Maximum pending/active lifetime
    pub ttl: Option<Duration>,
    /// Whether this interrupt blocks all others while active
    pub blocking: bool,
    /// Whether this interrupt may be parked behind a blocker
    pub deferrable: bool,
    /// Optional async work run on activation
    pub handler: Option<InterruptHandler>,
}

impl InterruptSpec {
    /// Create a non-blocking, deferrable spec with no TTL or handler.
    pub fn new(kind: impl Into<String>, priority: i32, message: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            priority,
            message: message.into(),
            ttl: None,
            blocking: false,
            deferrable: true,
            handler: None,
        }
    }

    /// Set the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Mark as blocking.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Mark as non-deferrable.
    #[must_use]
    pub fn non_deferrable(mut self) -> Self {
        self.deferrable = false;
        self
    }

    /// Attach an activation handler.
    #[must_use]
    pub fn with_handler(mut self, handler: InterruptHandler) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for InterruptSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("message", &self.message)
            .field("ttl", &self.ttl)
            .field("blocking", &self.blocking)
            .field("deferrable", &self.deferrable)
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One queued interrupt's bookkeeping record.
#[derive(Clone, Debug)]
pub struct Interrupt {
    /// Identity
    pub id: InterruptId,
    /// Caller-defined category
    pub kind: String,
    /// Higher is more urgent
    pub priority: i32,
    /// Display message
    pub message: String,
    /// Maximum pending/active lifetime
    pub ttl: Option<Duration>,
    /// Whether this interrupt blocks others while active
    pub blocking: bool,
    /// Whether this interrupt may be deferred
    pub deferrable: bool,
    /// Current phase
    pub phase: InterruptPhase,
    /// Enqueue order, the FIFO tie-break for equal priorities
    pub seq: u64,
    /// When this interrupt was queued
    pub queued_at: Instant,
    /// When it activated, if it ever did
    pub activated_at: Option<Instant>,
}

impl Interrupt {
    fn deadline(&self) -> Option<Instant> {
        self.ttl.map(|ttl| self.queued_at + ttl)
    }
}

/// Aggregate queue statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InterruptStatistics {
    /// Total interrupts ever queued
    pub total_queued: u64,
    /// Live entries (pending + deferred + active)
    pub queue_depth: usize,
    /// Count per phase, keyed by lowercase phase name
    pub by_phase: HashMap<String, usize>,
    /// Mean queued-to-activated wait over activated interrupts, in ms
    pub average_wait_ms: f64,
}

/// An interrupt the manager just activated. The handler, if any, is handed
/// back to the caller to spawn; the manager never runs handlers itself.
pub struct Activation {
    /// The activated interrupt id
    pub id: InterruptId,
    /// Display message for the alerts region
    pub message: String,
    /// Handler to spawn, if the spec carried one
    pub handler: Option<InterruptHandler>,
}

/// Priority/TTL interrupt queue.
pub struct InterruptManager {
    interrupts: HashMap<InterruptId, Interrupt>,
    handlers: HashMap<InterruptId, InterruptHandler>,
    subscribers: Vec<mpsc::UnboundedSender<InterruptEvent>>,
    capacity: usize,
    next_seq: u64,
    total_queued: u64,
    total_wait: Duration,
    total_activated: u64,
}

impl InterruptManager {
    /// Create a manager with the given live-queue capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            interrupts: HashMap::new(),
            handlers: HashMap::new(),
            subscribers: Vec::new(),
            capacity: capacity.max(1),
            next_seq: 0,
            total_queued: 0,
            total_wait: Duration::ZERO,
            total_activated: 0,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<InterruptEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: InterruptEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn live_count(&self) -> usize {
        self.interrupts
            .values()
            .filter(|i| !i.phase.is_terminal())
            .count()
    }

    /// Queue an interrupt.
    ///
    /// At capacity, the lowest-priority deferrable pending interrupt is
    /// evicted (cancelled) to make room; if nothing is evictable the new
    /// interrupt is rejected.
    pub fn queue(&mut self, spec: InterruptSpec) -> Result<InterruptId, KernelError> {
        if self.live_count() >= self.capacity {
            let victim = self
                .interrupts
                .values()
                .filter(|i| i.phase == InterruptPhase::Pending && i.deferrable)
                .min_by_key(|i| (i.priority, std::cmp::Reverse(i.seq)))
                .map(|i| i.id.clone());
            match victim {
                Some(victim) => {
                    tracing::warn!(interrupt = %victim, "interrupt queue full, evicting");
                    self.cancel(&victim);
                }
                None => {
                    return Err(KernelError::InterruptQueueFull {
                        capacity: self.capacity,
                    })
                }
            }
        }

        let id = spec.id.unwrap_or_else(InterruptId::generate);
        let interrupt = Interrupt {
            id: id.clone(),
            kind: spec.kind,
            priority: spec.priority,
            message: spec.message,
            ttl: spec.ttl,
            blocking: spec.blocking,
            deferrable: spec.deferrable,
            phase: InterruptPhase::Pending,
            seq: self.next_seq,
            queued_at: Instant::now(),
            activated_at: None,
        };
        self.next_seq += 1;
        self.total_queued += 1;
        if let Some(handler) = spec.handler {
            self.handlers.insert(id.clone(), handler);
        }
        self.interrupts.insert(id.clone(), interrupt);
        self.publish(InterruptEvent::Queued { id: id.clone() });
        Ok(id)
    }

    /// The currently active interrupt, if any.
    #[must_use]
    pub fn active(&self) -> Option<&Interrupt> {
        self.interrupts
            .values()
            .find(|i| i.phase == InterruptPhase::Active)
    }

    /// Try to activate the next interrupt.
    ///
    /// No-op while any interrupt is active. While a *blocking* interrupt is
    /// active, deferrable pending interrupts are parked as deferred. Once the
    /// active slot is free, deferred interrupts are re-queued as pending and
    /// the highest-priority pending one (FIFO among equals) activates.
    pub fn try_activate(&mut self) -> Option<Activation> {
        if let Some(active) = self.active() {
            if active.blocking {
                let parked: Vec<InterruptId> = self
                    .interrupts
                    .values()
                    .filter(|i| i.phase == InterruptPhase::Pending && i.deferrable)
                    .map(|i| i.id.clone())
                    .collect();
                for id in parked {
                    if let Some(interrupt) = self.interrupts.get_mut(&id) {
                        interrupt.phase = InterruptPhase::Deferred;
                    }
                    self.publish(InterruptEvent::Deferred { id });
                }
            }
            return None;
        }

        // Blocker (if any) is gone: deferred interrupts rejoin the pending set.
        for interrupt in self.interrupts.values_mut() {
            if interrupt.phase == InterruptPhase::Deferred {
                interrupt.phase = InterruptPhase::Pending;
            }
        }

        let chosen = self
            .interrupts
            .values()
            .filter(|i| i.phase == InterruptPhase::Pending)
            .max_by_key(|i| (i.priority, std::cmp::Reverse(i.seq)))
            .map(|i| i.id.clone())?;

        let now = Instant::now();
        let message = {
            let interrupt = self.interrupts.get_mut(&chosen)?;
            interrupt.phase = InterruptPhase::Active;
            interrupt.activated_at = Some(now);
            self.total_wait += now.saturating_duration_since(interrupt.queued_at);
            self.total_activated += 1;
            interrupt.message.clone()
        };
        self.publish(InterruptEvent::Activated {
            id: chosen.clone(),
            message: message.clone(),
            transition_ms: TRANSITION_IN_MS,
        });

        Some(Activation {
            handler: self.handlers.remove(&chosen),
            id: chosen,
            message,
        })
    }

    /// Mark an interrupt completed. Idempotent; terminal or absent ids are a
    /// no-op returning `false`.
    pub fn complete(&mut self, id: &InterruptId) -> bool {
        let Some(interrupt) = self.interrupts.get_mut(id) else {
            return false;
        };
        if !matches!(
            interrupt.phase,
            InterruptPhase::Active | InterruptPhase::Pending | InterruptPhase::Deferred
        ) {
            return false;
        }
        interrupt.phase = InterruptPhase::Completed;
        self.handlers.remove(id);
        self.publish(InterruptEvent::Completed {
            id: id.clone(),
            transition_ms: TRANSITION_OUT_MS,
        });
        true
    }

    /// Cancel a live interrupt. Idempotent.
    pub fn cancel(&mut self, id: &InterruptId) -> bool {
        let Some(interrupt) = self.interrupts.get_mut(id) else {
            return false;
        };
        if interrupt.phase.is_terminal() {
            return false;
        }
        interrupt.phase = InterruptPhase::Cancelled;
        self.handlers.remove(id);
        self.publish(InterruptEvent::Cancelled { id: id.clone() });
        true
    }

    /// Expire an interrupt whose TTL deadline has passed at `now`.
    ///
    /// Lazily driven: the controller arms one timer per TTL-bearing interrupt
    /// and calls this when it fires. The deadline is re-checked here, so a
    /// stale timer for an already-resolved interrupt is harmless.
    pub fn expire_due(&mut self, id: &InterruptId, now: Instant) -> bool {
        let Some(interrupt) = self.interrupts.get_mut(id) else {
            return false;
        };
        if interrupt.phase.is_terminal() {
            return false;
        }
        match interrupt.deadline() {
            Some(deadline) if now >= deadline => {
                interrupt.phase = InterruptPhase::Expired;
                self.handlers.remove(id);
                self.publish(InterruptEvent::Expired { id: id.clone() });
                true
            }
            _ => false,
        }
    }

    /// Look up one interrupt.
    #[must_use]
    pub fn get(&self, id: &InterruptId) -> Option<&Interrupt> {
        self.interrupts.get(id)
    }

    /// All interrupts in a given phase, in enqueue order.
    #[must_use]
    pub fn interrupts_by_status(&self, phase: InterruptPhase) -> Vec<&Interrupt> {
        let mut matching: Vec<&Interrupt> = self
            .interrupts
            .values()
            .filter(|i| i.phase == phase)
            .collect();
        matching.sort_by_key(|i| i.seq);
        matching
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn statistics(&self) -> InterruptStatistics {
        let mut by_phase: HashMap<String, usize> = HashMap::new();
        for interrupt in self.interrupts.values() {
            *by_phase
                .entry(format!("{:?}", interrupt.phase).to_lowercase())
                .or_default() += 1;
        }
        InterruptStatistics {
            total_queued: self.total_queued,
            queue_depth: self.live_count(),
            by_phase,
            average_wait_ms: if self.total_activated == 0 {
                0.0
            } else {
                self.total_wait.as_secs_f64() * 1000.0 / self.total_activated as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str, priority: i32) -> InterruptSpec {
        InterruptSpec::new(kind, priority, format!("{kind} p{priority}"))
    }

    #[test]
    fn test_highest_priority_pending_activates() {
        let mut manager = InterruptManager::new(64);
        let low = manager.queue(spec("warn", 1)).unwrap();
        let high = manager.queue(spec("confirm", 9)).unwrap();

        let activation = manager.try_activate().unwrap();
        assert_eq!(activation.id, high);
        assert_eq!(manager.get(&low).unwrap().phase, InterruptPhase::Pending);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut manager = InterruptManager::new(64);
        let first = manager.queue(spec("a", 5)).unwrap();
        let _second = manager.queue(spec("b", 5)).unwrap();

        assert_eq!(manager.try_activate().unwrap().id, first);
    }

    #[test]
    fn test_blocking_active_defers_deferrable_pending() {
        let mut manager = InterruptManager::new(64);
        let a = manager.queue(spec("confirm", 5).blocking()).unwrap();
        assert_eq!(manager.try_activate().unwrap().id, a);

        // B outranks A but A is blocking: B is parked, not activated.
        let b = manager.queue(spec("warn", 9)).unwrap();
        assert!(manager.try_activate().is_none());
        assert_eq!(manager.get(&b).unwrap().phase, InterruptPhase::Deferred);

        // Blocker resolves: B re-queues and activates.
        manager.complete(&a);
        assert_eq!(manager.try_activate().unwrap().id, b);
    }

    #[test]
    fn test_only_one_active_at_a_time() {
        let mut manager = InterruptManager::new(64);
        manager.queue(spec("a", 3)).unwrap();
        manager.queue(spec("b", 7)).unwrap();

        assert!(manager.try_activate().is_some());
        assert!(manager.try_activate().is_none());
        assert_eq!(manager.interrupts_by_status(InterruptPhase::Active).len(), 1);
    }

    #[test]
    fn test_ttl_expiry_is_deadline_checked() {
        let mut manager = InterruptManager::new(64);
        let id = manager
            .queue(spec("toast", 1).with_ttl(Duration::from_millis(50)))
            .unwrap();

        // Timer fired early (or the clock is suspect): nothing happens.
        assert!(!manager.expire_due(&id, Instant::now()));
        assert_eq!(manager.get(&id).unwrap().phase, InterruptPhase::Pending);

        let later = Instant::now() + Duration::from_millis(60);
        assert!(manager.expire_due(&id, later));
        assert_eq!(manager.get(&id).unwrap().phase, InterruptPhase::Expired);

        // Stale second timer is harmless.
        assert!(!manager.expire_due(&id, later));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut manager = InterruptManager::new(64);
        let id = manager.queue(spec("x", 1)).unwrap();
        assert!(manager.cancel(&id));
        assert!(!manager.cancel(&id));
        assert!(!manager.cancel(&InterruptId::new("absent")));
    }

    #[test]
    fn test_complete_from_pending_and_active() {
        let mut manager = InterruptManager::new(64);
        let id = manager.queue(spec("x", 1)).unwrap();
        assert!(manager.complete(&id));
        assert!(!manager.complete(&id));
    }

    #[test]
    fn test_handler_is_handed_back_on_activation() {
        let mut manager = InterruptManager::new(64);
        manager
            .queue(
                spec("task", 1)
                    .with_handler(Box::new(|| Box::pin(async { Ok(()) }))),
            )
            .unwrap();
        let activation = manager.try_activate().unwrap();
        assert!(activation.handler.is_some());
    }

    #[test]
    fn test_capacity_evicts_lowest_priority_deferrable() {
        let mut manager = InterruptManager::new(2);
        let low = manager.queue(spec("low", 1)).unwrap();
        manager.queue(spec("mid", 5)).unwrap();

        let new = manager.queue(spec("high", 9)).unwrap();
        assert_eq!(manager.get(&low).unwrap().phase, InterruptPhase::Cancelled);
        assert_eq!(manager.get(&new).unwrap().phase, InterruptPhase::Pending);
    }

    #[test]
    fn test_capacity_rejects_when_nothing_evictable() {
        let mut manager = InterruptManager::new(1);
        manager.queue(spec("held", 5).non_deferrable()).unwrap();
        let err = manager.queue(spec("extra", 9)).unwrap_err();
        assert_eq!(err, KernelError::InterruptQueueFull { capacity: 1 });
    }

    #[test]
    fn test_statistics_counts_phases() {
        let mut manager = InterruptManager::new(64);
        let a = manager.queue(spec("a", 5)).unwrap();
        manager.queue(spec("b", 1)).unwrap();
        manager.try_activate();
        manager.complete(&a);

        let stats = manager.statistics();
        assert_eq!(stats.total_queued, 2);
        assert_eq!(stats.queue_depth, 1);
        assert_eq!(stats.by_phase.get("completed"), Some(&1));
        assert_eq!(stats.by_phase.get("pending"), Some(&1));
    }

    #[test]
    fn test_activation_events_carry_transition_durations() {
        let mut manager = InterruptManager::new(64);
        let mut rx = manager.subscribe();
        let id = manager.queue(spec("x", 1)).unwrap();
        manager.try_activate();
        manager.complete(&id);

        assert!(matches!(rx.try_recv().unwrap(), InterruptEvent::Queued { .. }));
        match rx.try_recv().unwrap() {
            InterruptEvent::Activated { transition_ms, .. } => {
                assert_eq!(transition_ms, TRANSITION_IN_MS);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.try_recv().unwrap() {
            InterruptEvent::Completed { transition_ms, .. } => {
                assert_eq!(transition_ms, TRANSITION_OUT_MS);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
