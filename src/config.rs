//! Kernel Configuration
//!
//! All tunable knobs for the coordination kernel live here. Defaults match the
//! interactive-session profile; every field can be overridden through
//! `UI_KERNEL_*` environment variables for headless tuning and testing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Adaptive performance mode for the animation pipeline.
///
/// The controller samples telemetry every few seconds and moves between these
/// modes. Mode changes are idempotent and are the only place the scheduler's
/// global tick rate is mutated at runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceMode {
    /// 60fps tick, full animations
    High,
    /// 30fps tick, full animations
    #[default]
    Balanced,
    /// 10fps tick, animations disabled
    Low,
}

impl PerformanceMode {
    /// Scheduler tick rate for this mode, in ticks per second.
    #[must_use]
    pub fn tick_fps(self) -> u32 {
        match self {
            Self::High => 60,
            Self::Balanced => 30,
            Self::Low => 10,
        }
    }

    /// Whether animations run at all in this mode.
    #[must_use]
    pub fn animations_enabled(self) -> bool {
        !matches!(self, Self::Low)
    }
}

/// Kernel configuration.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Scheduler tick rate at startup, in ticks per second
    pub tick_fps: u32,
    /// Maximum overlay height in terminal rows
    pub overlay_max_height: u16,
    /// Capacity of each telemetry ring buffer
    pub telemetry_buffer_capacity: usize,
    /// Interval between telemetry flushes
    pub telemetry_flush_interval: Duration,
    /// Render time above which a slow-render signal fires
    pub slow_render_threshold: Duration,
    /// Interval between adaptive performance samples
    pub adaptive_interval: Duration,
    /// How long a completed/errored tool row stays in the live table
    pub tool_grace_period: Duration,
    /// Maximum queued interrupts
    pub interrupt_queue_capacity: usize,
    /// Auto-hide delay for the profile switcher hint
    pub profile_switcher_timeout: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_fps: 30,
            overlay_max_height: 8,
            telemetry_buffer_capacity: 10_000,
            telemetry_flush_interval: Duration::from_secs(60),
            slow_render_threshold: Duration::from_millis(50),
            adaptive_interval: Duration::from_secs(5),
            tool_grace_period: Duration::from_secs(2),
            interrupt_queue_capacity: 64,
            profile_switcher_timeout: Duration::from_secs(5),
        }
    }
}

impl KernelConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_fps: env_parse("UI_KERNEL_TICK_FPS", defaults.tick_fps),
            overlay_max_height: env_parse("UI_KERNEL_OVERLAY_MAX_HEIGHT", defaults.overlay_max_height),
            telemetry_buffer_capacity: env_parse(
                "UI_KERNEL_TELEMETRY_CAPACITY",
                defaults.telemetry_buffer_capacity,
            ),
            telemetry_flush_interval: Duration::from_secs(env_parse(
                "UI_KERNEL_FLUSH_SECS",
                defaults.telemetry_flush_interval.as_secs(),
            )),
            slow_render_threshold: Duration::from_millis(env_parse(
                "UI_KERNEL_SLOW_RENDER_MS",
                defaults.slow_render_threshold.as_millis() as u64,
            )),
            adaptive_interval: Duration::from_secs(env_parse(
                "UI_KERNEL_ADAPTIVE_SECS",
                defaults.adaptive_interval.as_secs(),
            )),
            tool_grace_period: Duration::from_millis(env_parse(
                "UI_KERNEL_TOOL_GRACE_MS",
                defaults.tool_grace_period.as_millis() as u64,
            )),
            interrupt_queue_capacity: env_parse(
                "UI_KERNEL_INTERRUPT_CAPACITY",
                defaults.interrupt_queue_capacity,
            ),
            profile_switcher_timeout: defaults.profile_switcher_timeout,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_balanced() {
        assert_eq!(PerformanceMode::default(), PerformanceMode::Balanced);
        assert_eq!(PerformanceMode::Balanced.tick_fps(), 30);
    }

    #[test]
    fn test_low_mode_disables_animations() {
        assert!(!PerformanceMode::Low.animations_enabled());
        assert!(PerformanceMode::High.animations_enabled());
        assert_eq!(PerformanceMode::Low.tick_fps(), 10);
    }

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.tick_fps, 30);
        assert_eq!(config.telemetry_buffer_capacity, 10_000);
        assert_eq!(config.interrupt_queue_capacity, 64);
    }
}
