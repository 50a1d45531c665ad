//! Kernel Error Taxonomy
//!
//! The kernel is a presentation layer: a bookkeeping mismatch must never crash
//! the host session. Contract violations are therefore *returned* to the
//! composition root, which records them as telemetry and carries on. The one
//! exception is overlay stream I/O, which surfaces as `std::io::Error` from
//! the overlay methods themselves; a broken terminal stream is unrecoverable.

use thiserror::Error;

/// Errors raised by kernel components.
///
/// Every variant here is a caller-contract violation or a capacity limit.
/// None of them indicate kernel-internal corruption.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    /// A tool-start arrived for an id that is already in flight.
    ///
    /// The original `ToolStatus` is left unchanged.
    #[error("tool id {id:?} is already in flight")]
    DuplicateToolStart {
        /// The offending tool call id
        id: String,
    },

    /// A lifecycle event referenced a tool id with no live entry.
    #[error("no in-flight tool with id {id:?}")]
    UnknownToolId {
        /// The unknown tool call id
        id: String,
    },

    /// A lifecycle event tried to move a tool out of a terminal state.
    #[error("tool {id:?} already reached a terminal state")]
    ToolAlreadyTerminal {
        /// The tool call id
        id: String,
    },

    /// The interrupt queue is at capacity and nothing was evictable.
    #[error("interrupt queue full ({capacity} entries), interrupt rejected")]
    InterruptQueueFull {
        /// Configured queue capacity
        capacity: usize,
    },
}
