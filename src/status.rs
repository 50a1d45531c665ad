//! Status Orchestration
//!
//! Maintains the single base status line, a stack of named overrides, and the
//! table of in-flight tool lifecycle states. The orchestrator owns no timers
//! and renders nothing; it publishes a typed [`StatusEvent`] for every
//! mutation so the controller never needs to poll.
//!
//! # Override policy
//!
//! Overrides are stack-like: the most recently pushed override wins,
//! re-pushing an existing id moves it to the top. Recency, not a numeric
//! priority, decides which override shows.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::KernelError;
use crate::events::StatusEvent;

/// Visual tone of a status line or tool row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tone {
    /// Nothing noteworthy
    #[default]
    Neutral,
    /// Work in progress
    Active,
    /// Finished successfully
    Success,
    /// Needs attention but not fatal
    Warning,
    /// Something failed
    Error,
}

impl Tone {
    /// Single-glyph marker used when rendering status rows.
    #[must_use]
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Neutral => "·",
            Self::Active => "▸",
            Self::Success => "✓",
            Self::Warning => "!",
            Self::Error => "✗",
        }
    }
}

/// One status line: the base entry or an override.
#[derive(Clone, Debug)]
pub struct StatusEntry {
    /// Primary text
    pub text: String,
    /// Optional secondary text
    pub detail: Option<String>,
    /// Visual tone
    pub tone: Tone,
    /// When this entry became current
    pub started_at: Instant,
}

impl StatusEntry {
    /// Create an entry with the given text and tone.
    pub fn new(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            text: text.into(),
            detail: None,
            tone,
            started_at: Instant::now(),
        }
    }

    /// Attach secondary text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Lifecycle phase of an in-flight tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolPhase {
    /// Start event received, no progress yet
    Starting,
    /// At least one progress event received
    Running,
    /// Terminal: finished successfully
    Completed,
    /// Terminal: failed
    Error,
}

impl ToolPhase {
    /// Whether this phase admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A tool-start notification from the execution engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id among currently in-flight calls
    pub id: String,
    /// Tool name (e.g. "bash", "read_file")
    pub tool: String,
    /// Tool parameters, opaque to the kernel
    pub parameters: serde_json::Value,
}

/// Progress report for a running tool.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ToolProgress {
    /// Units done so far
    pub current: u64,
    /// Total units, zero when unknown
    pub total: u64,
}

impl ToolProgress {
    /// Completion percentage, `None` when the total is unknown.
    #[must_use]
    pub fn percentage(self) -> Option<f64> {
        (self.total > 0).then(|| (self.current as f64 / self.total as f64) * 100.0)
    }
}

/// Live state of one tool call.
#[derive(Clone, Debug)]
pub struct ToolStatus {
    /// Tool call id
    pub id: String,
    /// Tool name
    pub tool: String,
    /// Tool parameters as received
    pub parameters: serde_json::Value,
    /// Current lifecycle phase
    pub phase: ToolPhase,
    /// When the start event arrived
    pub started_at: Instant,
    /// Latest detail text (progress message, result summary, error)
    pub detail: Option<String>,
    /// Visual tone derived from the phase
    pub tone: Tone,
    /// Latest progress report, if any
    pub progress: Option<ToolProgress>,
}

/// Base status + overrides + in-flight tool table.
pub struct StatusOrchestrator {
    base: StatusEntry,
    /// Insertion-ordered: the last element is the effective override.
    overrides: Vec<(String, StatusEntry)>,
    tools: HashMap<String, ToolStatus>,
    subscribers: Vec<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusOrchestrator {
    /// Create an orchestrator with the default "idle" base status.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: StatusEntry::new("idle", Tone::Neutral),
            overrides: Vec::new(),
            tools: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to mutation events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: StatusEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Replace the base status.
    pub fn set_base_status(&mut self, entry: StatusEntry) {
        self.base = entry;
        self.publish(StatusEvent::BaseChanged {
            text: self.base.text.clone(),
            tone: self.base.tone,
        });
    }

    /// Push (or re-push to the top) a named override.
    pub fn push_override(&mut self, id: impl Into<String>, entry: StatusEntry) {
        let id = id.into();
        self.overrides.retain(|(existing, _)| *existing != id);
        self.publish(StatusEvent::OverridePushed {
            id: id.clone(),
            text: entry.text.clone(),
            tone: entry.tone,
        });
        self.overrides.push((id, entry));
    }

    /// Remove an override. Idempotent; clearing an absent id is a no-op.
    pub fn clear_override(&mut self, id: &str) {
        let before = self.overrides.len();
        self.overrides.retain(|(existing, _)| existing != id);
        if self.overrides.len() != before {
            self.publish(StatusEvent::OverrideCleared { id: id.to_string() });
        }
    }

    /// The entry that should currently be displayed: the most recently pushed
    /// override if any exist, otherwise the base.
    #[must_use]
    pub fn current_status(&self) -> &StatusEntry {
        self.overrides
            .last()
            .map_or(&self.base, |(_, entry)| entry)
    }

    /// Live tool table, keyed by tool call id.
    #[must_use]
    pub fn context(&self) -> &HashMap<String, ToolStatus> {
        &self.tools
    }

    /// Number of tools not yet in a terminal phase.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.tools.values().filter(|t| !t.phase.is_terminal()).count()
    }

    /// Handle a tool-start event.
    ///
    /// A duplicate id while the original is still in the table is a
    /// caller-contract violation: the original entry is left unchanged.
    pub fn on_tool_start(&mut self, call: ToolCall) -> Result<(), KernelError> {
        if self.tools.contains_key(&call.id) {
            tracing::warn!(tool_id = %call.id, tool = %call.tool, "duplicate tool start ignored");
            return Err(KernelError::DuplicateToolStart { id: call.id });
        }
        let status = ToolStatus {
            id: call.id.clone(),
            tool: call.tool.clone(),
            parameters: call.parameters,
            phase: ToolPhase::Starting,
            started_at: Instant::now(),
            detail: None,
            tone: Tone::Active,
            progress: None,
        };
        self.tools.insert(call.id.clone(), status);
        self.publish(StatusEvent::ToolStarted {
            id: call.id,
            tool: call.tool,
        });
        Ok(())
    }

    /// Handle a tool progress report. First progress moves Starting → Running.
    pub fn on_tool_progress(
        &mut self,
        id: &str,
        progress: ToolProgress,
        message: Option<String>,
    ) -> Result<(), KernelError> {
        let Some(status) = self.tools.get_mut(id) else {
            return Err(KernelError::UnknownToolId { id: id.to_string() });
        };
        if status.phase.is_terminal() {
            return Err(KernelError::ToolAlreadyTerminal { id: id.to_string() });
        }
        status.phase = ToolPhase::Running;
        status.progress = Some(progress);
        if message.is_some() {
            status.detail = message;
        }
        self.publish(StatusEvent::ToolProgressed {
            id: id.to_string(),
            current: progress.current,
            total: progress.total,
        });
        Ok(())
    }

    /// Handle tool completion. Terminal; the row stays in the table until the
    /// controller removes it after the grace period.
    pub fn on_tool_complete(&mut self, id: &str, result: Option<String>) -> Result<(), KernelError> {
        let Some(status) = self.tools.get_mut(id) else {
            return Err(KernelError::UnknownToolId { id: id.to_string() });
        };
        if status.phase.is_terminal() {
            return Err(KernelError::ToolAlreadyTerminal { id: id.to_string() });
        }
        status.phase = ToolPhase::Completed;
        status.tone = Tone::Success;
        if result.is_some() {
            status.detail = result;
        }
        self.publish(StatusEvent::ToolCompleted { id: id.to_string() });
        Ok(())
    }

    /// Handle tool failure. Terminal, same table semantics as completion.
    pub fn on_tool_error(&mut self, id: &str, error: String) -> Result<(), KernelError> {
        let Some(status) = self.tools.get_mut(id) else {
            return Err(KernelError::UnknownToolId { id: id.to_string() });
        };
        if status.phase.is_terminal() {
            return Err(KernelError::ToolAlreadyTerminal { id: id.to_string() });
        }
        status.phase = ToolPhase::Error;
        status.tone = Tone::Error;
        status.detail = Some(error.clone());
        self.publish(StatusEvent::ToolErrored {
            id: id.to_string(),
            error,
        });
        Ok(())
    }

    /// Drop a tool row. Called by the controller once the grace period after a
    /// terminal transition has elapsed. Idempotent.
    pub fn remove_tool(&mut self, id: &str) {
        self.tools.remove(id);
    }
}

impl Default for StatusOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
