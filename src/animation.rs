//! Animation Scheduling
//!
//! One periodic tick drives every registered animation, but each animation
//! computes its own frame index from wall-clock elapsed time divided by its
//! own frame interval, never from the scheduler's tick count. When the
//! process is busy and ticks arrive late, animations skip frames instead of
//! drifting.
//!
//! Kind-specific payloads are a tagged union, so per-kind update logic is a
//! single match with no runtime type narrowing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::easing::Easing;
use crate::events::AnimationEvent;

/// Default spinner frame set (braille).
pub const DEFAULT_SPINNER_FRAMES: [&str; 10] =
    ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Spinner playback rate in frames per second.
const SPINNER_FPS: f64 = 10.0;
/// Elapsed-time counters only need to refresh once a second.
const ELAPSED_FPS: f64 = 1.0;
/// Value animations refresh at the balanced tick rate.
const VALUE_FPS: f64 = 30.0;
/// Minimum frame interval so a misconfigured fps cannot spin the loop.
const MIN_FRAME_INTERVAL_MS: f64 = 16.0;

/// Kind-specific animation state.
#[derive(Clone, Debug)]
pub enum AnimationKind {
    /// Cycles through a fixed frame set
    Spinner {
        /// Glyphs to cycle through
        frames: Vec<String>,
        /// Optional text rendered after the glyph
        message: Option<String>,
    },
    /// Eases a numeric value from `from` to `to`
    Progress {
        /// Anchor value at `started_at`
        from: f64,
        /// Target value
        to: f64,
        /// Easing curve (monotone curves only, progress must not overshoot)
        easing: Easing,
    },
    /// Formats wall-clock time since an origin instant
    Elapsed {
        /// The instant being counted from
        origin: Instant,
    },
    /// Eases a named property between two values
    Transition {
        /// Start value
        from: f64,
        /// End value
        to: f64,
        /// Property name, opaque to the scheduler
        property: String,
        /// Easing curve
        easing: Easing,
    },
}

/// Rendered value of one animation frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FrameUpdate {
    /// Spinner glyph for this frame
    Spinner {
        /// Current glyph
        glyph: String,
        /// Optional message
        message: Option<String>,
    },
    /// Interpolated progress value
    Progress {
        /// Current eased value
        value: f64,
    },
    /// Formatted elapsed time
    Elapsed {
        /// e.g. "5s", "1m 23s"
        formatted: String,
    },
    /// Interpolated transition value
    Transition {
        /// Property name
        property: String,
        /// Current eased value
        value: f64,
    },
}

/// One registered animation.
#[derive(Clone, Debug)]
pub struct Animation {
    /// Identity; re-registering the same id replaces the animation
    pub id: String,
    /// Kind-specific state
    pub kind: AnimationKind,
    /// Anchor for elapsed-time computation
    pub started_at: Instant,
    /// Absent means: runs until explicitly unregistered
    pub duration: Option<Duration>,
    /// This animation's own playback rate
    pub fps: f64,
    /// Last emitted frame index, non-decreasing for the animation's lifetime
    pub current_frame: u64,
}

impl Animation {
    fn frame_interval_ms(&self) -> f64 {
        (1000.0 / self.fps).max(MIN_FRAME_INTERVAL_MS)
    }

    /// Frame index implied by wall-clock time at `now`.
    fn expected_frame(&self, now: Instant) -> u64 {
        let elapsed_ms = now.saturating_duration_since(self.started_at).as_secs_f64() * 1000.0;
        (elapsed_ms / self.frame_interval_ms()) as u64
    }

    /// Normalized progress in `[0, 1]`, only meaningful with a duration.
    fn ratio(&self, now: Instant) -> f64 {
        match self.duration {
            Some(duration) if !duration.is_zero() => {
                (now.saturating_duration_since(self.started_at).as_secs_f64()
                    / duration.as_secs_f64())
                .min(1.0)
            }
            _ => 1.0,
        }
    }

    /// Kind-specific rendered value at `now`.
    fn frame_update(&self, now: Instant) -> FrameUpdate {
        match &self.kind {
            AnimationKind::Spinner { frames, message } => {
                let index = (self.current_frame as usize) % frames.len().max(1);
                FrameUpdate::Spinner {
                    glyph: frames.get(index).cloned().unwrap_or_default(),
                    message: message.clone(),
                }
            }
            AnimationKind::Progress { from, to, easing } => FrameUpdate::Progress {
                value: from + (to - from) * easing.apply(self.ratio(now)),
            },
            AnimationKind::Elapsed { origin } => FrameUpdate::Elapsed {
                formatted: format_elapsed(now.saturating_duration_since(*origin)),
            },
            AnimationKind::Transition {
                from,
                to,
                property,
                easing,
            } => FrameUpdate::Transition {
                property: property.clone(),
                value: from + (to - from) * easing.apply(self.ratio(now)),
            },
        }
    }
}

/// Owns every live animation and the global tick configuration.
pub struct AnimationScheduler {
    animations: HashMap<String, Animation>,
    target_fps: u32,
    subscribers: Vec<mpsc::UnboundedSender<AnimationEvent>>,
}

impl AnimationScheduler {
    /// Create a scheduler ticking at `target_fps` per second.
    #[must_use]
    pub fn new(target_fps: u32) -> Self {
        Self {
            animations: HashMap::new(),
            target_fps: target_fps.max(1),
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to frame and completion events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<AnimationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: AnimationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// The global tick rate in ticks per second.
    #[must_use]
    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    /// Change the global tick rate. Called only by the controller's adaptive
    /// performance loop.
    pub fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = fps.max(1);
    }

    /// Interval between scheduler ticks at the current target rate.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps))
    }

    /// Register an indefinitely-running spinner.
    pub fn create_spinner(
        &mut self,
        id: impl Into<String>,
        message: Option<String>,
        frames: Option<Vec<String>>,
    ) {
        let frames = frames.unwrap_or_else(|| {
            DEFAULT_SPINNER_FRAMES.iter().map(|s| (*s).to_string()).collect()
        });
        self.register(Animation {
            id: id.into(),
            kind: AnimationKind::Spinner {
                frames,
                message,
            },
            started_at: Instant::now(),
            duration: None,
            fps: SPINNER_FPS,
            current_frame: 0,
        });
    }

    /// Register a progress animation easing from `current` toward `target`.
    pub fn create_progress(
        &mut self,
        id: impl Into<String>,
        current: f64,
        target: f64,
        duration: Duration,
    ) {
        self.register(Animation {
            id: id.into(),
            kind: AnimationKind::Progress {
                from: current,
                to: target,
                easing: Easing::QuadOut,
            },
            started_at: Instant::now(),
            duration: Some(duration),
            fps: VALUE_FPS,
            current_frame: 0,
        });
    }

    /// Re-target a progress animation mid-flight.
    ///
    /// The animation is re-anchored at its *current interpolated value*, not
    /// its original start value, so the displayed bar eases smoothly from
    /// wherever it is now to the new target with no visible jump. Unknown ids
    /// are a no-op; callers routinely race tool completion against a late
    /// progress update.
    pub fn update_progress(&mut self, id: &str, new_target: f64) {
        let now = Instant::now();
        let Some(animation) = self.animations.get_mut(id) else {
            return;
        };
        let AnimationKind::Progress { from, to, easing } = &mut animation.kind else {
            return;
        };
        let value = *from + (*to - *from) * easing.apply(animation_ratio(animation.started_at, animation.duration, now));
        *from = value;
        *to = new_target;
        animation.started_at = now;
        animation.current_frame = 0;
    }

    /// Register an elapsed-time counter from `origin`.
    pub fn create_elapsed(&mut self, id: impl Into<String>, origin: Instant) {
        self.register(Animation {
            id: id.into(),
            kind: AnimationKind::Elapsed { origin },
            started_at: Instant::now(),
            duration: None,
            fps: ELAPSED_FPS,
            current_frame: 0,
        });
    }

    /// Register a one-shot value transition for a named property.
    pub fn create_transition(
        &mut self,
        id: impl Into<String>,
        from: f64,
        to: f64,
        property: impl Into<String>,
        duration: Duration,
        easing: Easing,
    ) {
        self.register(Animation {
            id: id.into(),
            kind: AnimationKind::Transition {
                from,
                to,
                property: property.into(),
                easing,
            },
            started_at: Instant::now(),
            duration: Some(duration),
            fps: VALUE_FPS,
            current_frame: 0,
        });
    }

    fn register(&mut self, animation: Animation) {
        // Identity is the id: re-registering replaces.
        self.animations.insert(animation.id.clone(), animation);
    }

    /// Remove an animation. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: &str) {
        self.animations.remove(id);
    }

    /// Remove every animation without emitting completion events.
    pub fn clear_all(&mut self) {
        self.animations.clear();
    }

    /// Number of live animations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.animations.len()
    }

    /// Whether no animations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.animations.is_empty()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.animations.contains_key(id)
    }

    /// Last emitted frame index for `id`.
    #[must_use]
    pub fn current_frame(&self, id: &str) -> Option<u64> {
        self.animations.get(id).map(|a| a.current_frame)
    }

    /// Kind-specific value `id` would render at `now`, without advancing it.
    #[must_use]
    pub fn sample(&self, id: &str, now: Instant) -> Option<FrameUpdate> {
        self.animations.get(id).map(|a| a.frame_update(now))
    }

    /// Advance every animation that is due at `now`.
    ///
    /// Returns the number of frame events emitted. Duration-bearing
    /// animations whose elapsed time has reached their duration emit a final
    /// frame at the end value, then a completion event, and are unregistered.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut events = Vec::new();
        let mut finished = Vec::new();

        for animation in self.animations.values_mut() {
            let done = animation
                .duration
                .is_some_and(|d| now.saturating_duration_since(animation.started_at) >= d);

            let expected = animation.expected_frame(now);
            if expected > animation.current_frame || done {
                // Skip straight to the wall-clock frame rather than stepping.
                animation.current_frame = animation.current_frame.max(expected);
                events.push(AnimationEvent::Frame {
                    id: animation.id.clone(),
                    update: animation.frame_update(now),
                });
            }

            if done {
                finished.push(animation.id.clone());
            }
        }

        for id in finished {
            self.animations.remove(&id);
            events.push(AnimationEvent::Completed { id });
        }

        let frames = events
            .iter()
            .filter(|e| matches!(e, AnimationEvent::Frame { .. }))
            .count();
        for event in events {
            self.publish(event);
        }
        frames
    }
}

fn animation_ratio(started_at: Instant, duration: Option<Duration>, now: Instant) -> f64 {
    match duration {
        Some(duration) if !duration.is_zero() => {
            (now.saturating_duration_since(started_at).as_secs_f64() / duration.as_secs_f64())
                .min(1.0)
        }
        _ => 1.0,
    }
}

/// Human-readable elapsed time: "5s", "1m 23s", "2h 05m".
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m {:02}s", total / 60, total % 60)
    } else {
        format!("{}h {:02}m", total / 3600, (total % 3600) / 60)
    }
}
