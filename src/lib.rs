//! UI Kernel - Terminal Runtime Coordination for Interactive Assistants
//!
//! This crate is the runtime coordination layer between an interactive
//! assistant's engine (tool execution, session control, input handling) and a
//! line-oriented terminal. It owns the transient chrome at the bottom of the
//! screen, keeps it from fighting with ordinary program output, animates it,
//! queues user-facing interruptions, and measures itself so it can back off
//! on slow terminals.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     External Collaborators                    │
//! │   Tool engine  ·  Session control  ·  Input front end         │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ UiCommand (via UiHandle)
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                 UnifiedUiController (one task)                │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐ │
//! │  │Animation │ │  Status  │ │Interrupt │ │   UiTelemetry    │ │
//! │  │Scheduler │ │Orchestr. │ │ Manager  │ │ (feeds adaptive) │ │
//! │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └──────────────────┘ │
//! │       └────────────┴───────┬────┘                             │
//! │                            ▼                                  │
//! │                     OverlayManager                            │
//! │              (regions + reentrant output guard)               │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ ANSI line control
//!                         terminal
//! ```
//!
//! The four state-holding leaves know nothing about each other. The
//! controller is the only component that calls into more than one of them,
//! and it serializes every mutation onto a single run loop, so the kernel
//! needs no locks.
//!
//! # Key Types
//!
//! - [`UnifiedUiController`]: The composition root; owns everything
//! - [`UiHandle`]: Cloneable command sender, the entire external API
//! - [`AnimationScheduler`]: Wall-clock frame timing for spinners, progress,
//!   elapsed counters, and transitions
//! - [`StatusOrchestrator`]: Base status, override stack, and the in-flight
//!   tool table
//! - [`InterruptManager`]: Priority/TTL queue for user-facing interruptions
//! - [`UiTelemetry`]: Ring-buffered UI metrics driving the adaptive
//!   performance loop
//! - [`OverlayManager`]: Region compositing and the reentrant output guard
//!
//! # Quick Start
//!
//! ```ignore
//! use ui_kernel::{KernelConfig, ToolCall, UnifiedUiController};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = KernelConfig::from_env();
//!     let (ui, kernel) = UnifiedUiController::spawn(
//!         config,
//!         Box::new(std::io::stdout()),
//!     );
//!
//!     ui.start_processing();
//!     ui.on_tool_start(ToolCall {
//!         id: "t1".into(),
//!         tool: "bash".into(),
//!         parameters: serde_json::json!({"command": "cargo test"}),
//!     });
//!     // ... tool runs ...
//!     ui.on_tool_complete("t1", Some("all tests passed".into()));
//!     ui.end_processing();
//!
//!     ui.shutdown();
//!     kernel.await.expect("kernel task")
//! }
//! ```
//!
//! # Design Philosophy
//!
//! - **Single writer**: one run loop owns all mutable state; collaborators
//!   talk to it over a channel and never hold a lock
//! - **Wall-clock honesty**: animation frames derive from elapsed time, so a
//!   stalled loop skips frames instead of slowing the clock down
//! - **Output first**: the overlay yields to ordinary program output and
//!   repaints afterwards, never the other way around
//! - **Self-measuring**: the kernel meters its own render cost and sheds
//!   animation work before the terminal starts to lag

pub mod animation;
pub mod config;
pub mod controller;
pub mod easing;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod overlay;
pub mod status;
pub mod telemetry;

pub use animation::{AnimationScheduler, FrameUpdate, format_elapsed};
pub use config::{KernelConfig, PerformanceMode};
pub use controller::{KernelState, UiHandle, UnifiedUiController};
pub use easing::Easing;
pub use error::KernelError;
pub use events::{AnimationEvent, InterruptEvent, StatusEvent, TelemetrySignal, UiCommand};
pub use interrupt::{
    Interrupt, InterruptId, InterruptManager, InterruptPhase, InterruptSpec, InterruptStatistics,
};
pub use overlay::{OverlayManager, OverlayRegion, OverlaySlot};
pub use status::{StatusEntry, StatusOrchestrator, Tone, ToolCall, ToolPhase, ToolProgress};
pub use telemetry::{PerformanceSummary, TelemetrySnapshot, UiTelemetry};
