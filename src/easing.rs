//! Easing Functions
//!
//! Pure `[0,1] → [0,1]` maps used to interpolate animated values. Purity
//! matters: `AnimationScheduler::update_progress` re-evaluates the current
//! eased value synchronously to compute a new anchor, so an easing function
//! must be a total function with no side effects.

use serde::{Deserialize, Serialize};

/// An easing curve applied to normalized animation progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Easing {
    /// Identity
    #[default]
    Linear,
    /// `t^2`
    QuadIn,
    /// `1 - (1-t)^2`
    QuadOut,
    /// Quadratic ease-in-out
    QuadInOut,
    /// `t^3`
    CubicIn,
    /// `1 - (1-t)^3`
    CubicOut,
    /// Cubic ease-in-out
    CubicInOut,
    /// Overshooting spring settle
    ElasticOut,
}

impl Easing {
    /// Apply the curve to a normalized progress value.
    ///
    /// Input is clamped to `[0, 1]` first, so callers may pass raw
    /// `elapsed / duration` ratios without pre-clamping.
    #[must_use]
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::QuadIn => t * t,
            Self::QuadOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::CubicIn => t * t * t,
            Self::CubicOut => 1.0 - (1.0 - t).powi(3),
            Self::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Self::ElasticOut => {
                if t == 0.0 || t == 1.0 {
                    t
                } else {
                    let c4 = (2.0 * std::f64::consts::PI) / 3.0;
                    2.0_f64.powf(-10.0 * t) * ((t * 10.0 - 0.75) * c4).sin() + 1.0
                }
            }
        }
    }
}
