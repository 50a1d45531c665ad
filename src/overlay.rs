//! Terminal Overlay
//!
//! Renders a small fixed set of prioritized regions anchored above the input
//! line, and guards redraws against interleaving with ordinary program
//! output. The overlay owns nothing but the output stream: regions are
//! ephemeral values the controller recomputes on every relevant event.
//!
//! Write errors propagate uncaught. A broken terminal stream is fatal for a
//! presentation layer; there is nothing sensible to degrade to.

use std::collections::HashMap;
use std::io::{self, Write};

use crossterm::{
    cursor::{MoveToColumn, MoveUp},
    queue,
    terminal::{Clear, ClearType},
};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

/// The fixed overlay slots, top to bottom by convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverlaySlot {
    /// Effective status line
    Status,
    /// Progress bars for in-flight tools
    Progress,
    /// Slash-command preview, profile switcher
    Hints,
    /// Active interrupt
    Alerts,
}

impl OverlaySlot {
    /// Region name as rendered in diagnostics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Progress => "progress",
            Self::Hints => "hints",
            Self::Alerts => "alerts",
        }
    }
}

/// One region's ephemeral render state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRegion {
    /// Text, possibly multi-line
    pub content: String,
    /// Maximum lines this region may occupy
    pub height: u16,
    /// Higher renders first and survives height pressure longer
    pub priority: i32,
}

impl OverlayRegion {
    /// Single-line region.
    pub fn line(content: impl Into<String>, priority: i32) -> Self {
        Self {
            content: content.into(),
            height: 1,
            priority,
        }
    }
}

/// Source of the current terminal width, injectable for tests.
pub type WidthSource = Box<dyn Fn() -> u16 + Send>;

/// Region-based overlay renderer with a reentrant output guard.
pub struct OverlayManager {
    out: Box<dyn Write + Send>,
    width: WidthSource,
    regions: HashMap<OverlaySlot, OverlayRegion>,
    max_height: u16,
    visible: bool,
    last_height: u16,
    output_depth: u32,
}

impl OverlayManager {
    /// Create an overlay writing to `out`, reading width from the terminal.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, max_height: u16) -> Self {
        Self::with_width_source(
            out,
            max_height,
            Box::new(|| crossterm::terminal::size().map_or(80, |(w, _)| w)),
        )
    }

    /// Create an overlay with an explicit width source.
    #[must_use]
    pub fn with_width_source(out: Box<dyn Write + Send>, max_height: u16, width: WidthSource) -> Self {
        Self {
            out,
            width,
            regions: HashMap::new(),
            max_height: max_height.max(1),
            visible: true,
            last_height: 0,
            output_depth: 0,
        }
    }

    /// Replace the full region set and redraw.
    pub fn set_layout(
        &mut self,
        regions: HashMap<OverlaySlot, OverlayRegion>,
        max_height: u16,
    ) -> io::Result<()> {
        self.regions = regions;
        self.max_height = max_height.max(1);
        self.redraw()
    }

    /// Replace or remove one region and redraw. `None` removes.
    pub fn update_region(
        &mut self,
        slot: OverlaySlot,
        region: Option<OverlayRegion>,
    ) -> io::Result<()> {
        match region {
            Some(region) => {
                self.regions.insert(slot, region);
            }
            None => {
                self.regions.remove(&slot);
            }
        }
        self.redraw()
    }

    /// Current content of one region.
    #[must_use]
    pub fn region(&self, slot: OverlaySlot) -> Option<&OverlayRegion> {
        self.regions.get(&slot)
    }

    /// Make the overlay visible and redraw.
    pub fn show(&mut self) -> io::Result<()> {
        self.visible = true;
        self.redraw()
    }

    /// Hide the overlay and clear whatever was drawn.
    pub fn hide(&mut self) -> io::Result<()> {
        self.visible = false;
        self.redraw()
    }

    /// Whether the overlay is currently drawn (visible and not suppressed by
    /// an output guard).
    #[must_use]
    pub fn is_drawn(&self) -> bool {
        self.visible && self.output_depth == 0
    }

    /// Current output-guard nesting depth.
    #[must_use]
    pub fn output_depth(&self) -> u32 {
        self.output_depth
    }

    /// Begin ordinary program output. Reentrant: the overlay is cleared on
    /// the first call and stays suppressed until the matching outermost
    /// [`end_output`](Self::end_output).
    pub fn begin_output(&mut self) -> io::Result<()> {
        self.output_depth += 1;
        if self.output_depth == 1 {
            self.clear_drawn()?;
            self.out.flush()?;
        }
        Ok(())
    }

    /// End ordinary program output. The outermost call restores the
    /// overlay's prior visibility. Unbalanced calls are a no-op.
    pub fn end_output(&mut self) -> io::Result<()> {
        if self.output_depth == 0 {
            return Ok(());
        }
        self.output_depth -= 1;
        if self.output_depth == 0 {
            self.redraw()?;
        }
        Ok(())
    }

    /// Clear and repaint the overlay from current region state.
    pub fn redraw(&mut self) -> io::Result<()> {
        self.clear_drawn()?;
        if !self.is_drawn() {
            self.out.flush()?;
            return Ok(());
        }

        // Width is re-read on every draw; never cached across redraws.
        let width = (self.width)().max(1) as usize;
        let lines = self.compose(width);

        for (index, line) in lines.iter().enumerate() {
            if index > 0 {
                self.out.write_all(b"\r\n")?;
            }
            self.out.write_all(line.as_bytes())?;
        }
        self.last_height = lines.len() as u16;
        self.out.flush()
    }

    /// Compose the overlay lines: regions by descending priority, each line
    /// truncated to the terminal width, total height capped at `max_height`
    /// with lowest-priority regions dropped first.
    fn compose(&self, width: usize) -> Vec<String> {
        let mut ordered: Vec<&OverlayRegion> = self.regions.values().collect();
        ordered.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let mut lines = Vec::new();
        let budget = self.max_height as usize;
        for region in ordered {
            let region_lines: Vec<&str> = region
                .content
                .lines()
                .take(region.height as usize)
                .collect();
            if region_lines.is_empty() {
                continue;
            }
            // Lowest-priority regions are dropped first: once a region does
            // not fit, everything below it is dropped too, never packed
            // around it.
            if lines.len() + region_lines.len() > budget {
                break;
            }
            for line in region_lines {
                lines.push(truncate_to_width(line, width));
            }
        }
        lines
    }

    fn clear_drawn(&mut self) -> io::Result<()> {
        if self.last_height == 0 {
            return Ok(());
        }
        // Cursor rests on the last drawn line after a draw.
        queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        for _ in 1..self.last_height {
            queue!(self.out, MoveUp(1), Clear(ClearType::CurrentLine))?;
        }
        self.last_height = 0;
        Ok(())
    }
}

/// Truncate to a display width, appending an ellipsis when cut.
fn truncate_to_width(line: &str, width: usize) -> String {
    let total: usize = line.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= width {
        return line.to_string();
    }
    let budget = width.saturating_sub(1);
    let mut used = 0;
    let mut out = String::new();
    for ch in line.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if used + ch_width > budget {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}
