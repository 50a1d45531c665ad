//! Kernel Events and Commands
//!
//! Every leaf publishes a typed event enum over its own channel, and the
//! controller accepts a single [`UiCommand`] enum from the outside world.
//! There is deliberately no generic event bus: payload shapes are checked at
//! compile time, and each subscriber sees only the events of the leaf it
//! subscribed to.
//!
//! Event payloads are serde-serializable so a daemon transport or web mirror
//! can forward them verbatim. Commands are not: they carry oneshot reply
//! handles and boxed interrupt handlers.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::animation::FrameUpdate;
use crate::error::KernelError;
use crate::interrupt::{InterruptId, InterruptSpec};
use crate::status::{ToolCall, Tone};
use crate::telemetry::{PerformanceSummary, TelemetrySnapshot};

/// Mutation events from the [`StatusOrchestrator`](crate::StatusOrchestrator).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StatusEvent {
    /// The base status line changed
    BaseChanged {
        /// New base text
        text: String,
        /// New base tone
        tone: Tone,
    },
    /// An override was pushed (or re-pushed to the top)
    OverridePushed {
        /// Caller-supplied override id
        id: String,
        /// Override text
        text: String,
        /// Override tone
        tone: Tone,
    },
    /// An override was cleared
    OverrideCleared {
        /// The cleared override id
        id: String,
    },
    /// A tool call entered the live table
    ToolStarted {
        /// Tool call id
        id: String,
        /// Tool name
        tool: String,
    },
    /// A tool reported progress
    ToolProgressed {
        /// Tool call id
        id: String,
        /// Units done
        current: u64,
        /// Total units, zero when unknown
        total: u64,
    },
    /// A tool finished successfully
    ToolCompleted {
        /// Tool call id
        id: String,
    },
    /// A tool failed
    ToolErrored {
        /// Tool call id
        id: String,
        /// Error description
        error: String,
    },
}

/// Frame and completion events from the
/// [`AnimationScheduler`](crate::AnimationScheduler).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AnimationEvent {
    /// An animation advanced at least one frame
    Frame {
        /// Animation id
        id: String,
        /// Kind-specific rendered value for this frame
        update: FrameUpdate,
    },
    /// A duration-bearing animation ran to completion and was unregistered
    Completed {
        /// Animation id
        id: String,
    },
}

/// Lifecycle events from the [`InterruptManager`](crate::InterruptManager).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum InterruptEvent {
    /// Entered the pending queue
    Queued {
        /// Interrupt id
        id: InterruptId,
    },
    /// Became the active interrupt; carries a suggested fade-in duration
    Activated {
        /// Interrupt id
        id: InterruptId,
        /// Display message
        message: String,
        /// Suggested transition-in duration in milliseconds
        transition_ms: u64,
    },
    /// Reached `completed`; carries a suggested fade-out duration
    Completed {
        /// Interrupt id
        id: InterruptId,
        /// Suggested transition-out duration in milliseconds
        transition_ms: u64,
    },
    /// Was passed over in favor of a blocker and parked as deferred
    Deferred {
        /// Interrupt id
        id: InterruptId,
    },
    /// TTL elapsed while pending or active
    Expired {
        /// Interrupt id
        id: InterruptId,
    },
    /// Cancelled by the caller
    Cancelled {
        /// Interrupt id
        id: InterruptId,
    },
}

/// Threshold signals and flush snapshots from
/// [`UiTelemetry`](crate::UiTelemetry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TelemetrySignal {
    /// A measured render exceeded the slow-render threshold
    SlowRender {
        /// Component or mark label
        label: String,
        /// Measured duration in milliseconds
        millis: u64,
    },
    /// Buffered entry count approached the configured caps
    HighMemory {
        /// Total buffered entries across all ring buffers
        buffered: usize,
    },
    /// A named metric crossed its threshold
    ThresholdExceeded {
        /// Metric label
        metric: String,
        /// Observed value
        value: f64,
        /// Configured threshold
        threshold: f64,
    },
    /// Wall-clock gap between renders spanned two or more 60fps frames
    FrameDrop {
        /// Gap in milliseconds
        gap_ms: u64,
    },
    /// Periodic flush produced a snapshot
    Flushed {
        /// Point-in-time aggregate
        snapshot: TelemetrySnapshot,
    },
}

/// Commands accepted by the [`UnifiedUiController`](crate::UnifiedUiController)
/// run loop. External collaborators send these through a
/// [`UiHandle`](crate::UiHandle); a few variants are internal timer callbacks.
#[derive(Debug)]
pub enum UiCommand {
    /// Tool execution engine: a tool call started
    ToolStart {
        /// Call descriptor
        call: ToolCall,
    },
    /// Tool execution engine: progress report
    ToolProgress {
        /// Tool call id
        id: String,
        /// Units done
        current: u64,
        /// Total units, zero when unknown
        total: u64,
        /// Optional progress message
        message: Option<String>,
    },
    /// Tool execution engine: terminal success
    ToolComplete {
        /// Tool call id
        id: String,
        /// Optional result summary
        result: Option<String>,
    },
    /// Tool execution engine: terminal failure
    ToolError {
        /// Tool call id
        id: String,
        /// Error description
        error: String,
    },
    /// Session control: an assistant turn begins
    StartProcessing,
    /// Session control: the assistant turn ended
    EndProcessing,
    /// Session control: replace the base status line
    SetBaseStatus {
        /// Status text
        text: String,
        /// Status tone
        tone: Tone,
    },
    /// Session control: push a status override
    PushStatusOverride {
        /// Override id
        id: String,
        /// Override text
        text: String,
        /// Optional detail text
        detail: Option<String>,
        /// Override tone
        tone: Tone,
    },
    /// Session control: clear a status override
    ClearStatusOverride {
        /// Override id
        id: String,
    },
    /// Input front end: show the slash-command preview in the hints region
    ShowSlashCommandPreview {
        /// Matching command names
        commands: Vec<String>,
        /// Current filter text, if any
        filter: Option<String>,
    },
    /// Input front end: hide the slash-command preview
    HideSlashCommandPreview,
    /// Input front end: show the profile switcher (auto-hides)
    ShowProfileSwitcher {
        /// Available profile names
        options: Vec<String>,
        /// Currently selected profile
        current: String,
    },
    /// Queue an interrupt; replies with the generated id or a capacity error
    QueueInterrupt {
        /// Interrupt specification
        spec: InterruptSpec,
        /// Reply channel
        reply: oneshot::Sender<Result<InterruptId, KernelError>>,
    },
    /// Mark an interrupt completed
    CompleteInterrupt {
        /// Interrupt id
        id: InterruptId,
    },
    /// Cancel a pending or active interrupt
    CancelInterrupt {
        /// Interrupt id
        id: InterruptId,
    },
    /// Internal: a TTL timer fired for this interrupt
    TtlElapsed {
        /// Interrupt id
        id: InterruptId,
    },
    /// Internal: a spawned interrupt handler finished
    HandlerFinished {
        /// Interrupt id
        id: InterruptId,
        /// Handler outcome; errors become telemetry, never propagate
        error: Option<String>,
    },
    /// Output guard: ordinary program output begins (reentrant)
    BeginOutput,
    /// Output guard: matching end of ordinary program output
    EndOutput,
    /// Introspection: current telemetry snapshot
    GetTelemetrySnapshot {
        /// Reply channel
        reply: oneshot::Sender<TelemetrySnapshot>,
    },
    /// Introspection: rolling performance summary
    GetPerformanceSummary {
        /// Reply channel
        reply: oneshot::Sender<PerformanceSummary>,
    },
    /// Introspection: controller state snapshot
    GetState {
        /// Reply channel
        reply: oneshot::Sender<crate::controller::KernelState>,
    },
    /// Stop the run loop
    Shutdown,
}
