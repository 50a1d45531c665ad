//! Kernel Integration Tests
//!
//! These tests run the whole kernel the way an embedding program would: a
//! spawned controller loop, a cloned [`UiHandle`], and a captured output
//! stream. They exercise the cross-component paths a unit test cannot see,
//! in particular the tool lifecycle fan-out, interrupt activation and
//! deferral, the reentrant output guard, and handler execution.
//!
//! Timers run on real wall-clock time, so grace periods and TTLs are
//! shortened through [`KernelConfig`] to keep the suite fast.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::sleep;

use ui_kernel::{
    InterruptSpec, KernelConfig, PerformanceMode, Tone, ToolCall, UiHandle, UnifiedUiController,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// A `Write` sink the test can inspect after the kernel has drawn to it.
#[derive(Clone, Default)]
struct CapturedOutput {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Short timers so lifecycle sweeps happen within the test's patience.
fn fast_config() -> KernelConfig {
    KernelConfig {
        tool_grace_period: Duration::from_millis(100),
        adaptive_interval: Duration::from_secs(60),
        telemetry_flush_interval: Duration::from_secs(60),
        profile_switcher_timeout: Duration::from_millis(150),
        ..KernelConfig::default()
    }
}

/// Kernel traces go to the test harness when `RUST_LOG` asks for them.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn spawn_kernel() -> (UiHandle, CapturedOutput) {
    init_tracing();
    let output = CapturedOutput::default();
    let (handle, _join) = UnifiedUiController::spawn(fast_config(), Box::new(output.clone()));
    (handle, output)
}

fn tool_call(id: &str, tool: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        tool: tool.to_string(),
        parameters: json!({"path": "/tmp/scratch"}),
    }
}

/// Give the run loop a few ticks to absorb pending commands.
async fn settle() {
    sleep(Duration::from_millis(120)).await;
}

// =============================================================================
// Tool Lifecycle
// =============================================================================

#[tokio::test]
async fn tool_lifecycle_runs_to_completion_and_expires_from_state() {
    let (ui, output) = spawn_kernel();

    ui.on_tool_start(tool_call("t1", "read_file"));
    ui.on_tool_progress("t1", 50, 100, Some("halfway".into()));
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.in_flight_tools, 1);
    assert!(output.contents().contains("read_file"));

    ui.on_tool_complete("t1", Some("2 kB".into()));
    settle().await;

    // The grace period keeps the row briefly, then the sweep removes it.
    let state = ui.state().await.unwrap();
    assert_eq!(state.in_flight_tools, 0);

    ui.shutdown();
}

#[tokio::test]
async fn concurrent_tools_are_tracked_independently() {
    let (ui, _output) = spawn_kernel();

    ui.on_tool_start(tool_call("a", "bash"));
    ui.on_tool_start(tool_call("b", "grep"));
    ui.on_tool_start(tool_call("c", "edit"));
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.in_flight_tools, 3);

    ui.on_tool_complete("b", None);
    // Past the grace period so the completed row is swept.
    sleep(Duration::from_millis(250)).await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.in_flight_tools, 2);

    ui.shutdown();
}

#[tokio::test]
async fn duplicate_tool_start_is_ignored_and_counted() {
    let (ui, _output) = spawn_kernel();

    ui.on_tool_start(tool_call("t1", "bash"));
    ui.on_tool_start(tool_call("t1", "bash"));
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.in_flight_tools, 1);

    let snapshot = ui.telemetry_snapshot().await.unwrap();
    assert_eq!(snapshot.error_counts.get("tool-contract"), Some(&1));

    ui.shutdown();
}

#[tokio::test]
async fn tool_error_surfaces_an_alert_interrupt() {
    let (ui, output) = spawn_kernel();

    ui.on_tool_start(tool_call("t1", "bash"));
    ui.on_tool_error("t1", "command exited with status 1");
    settle().await;

    let state = ui.state().await.unwrap();
    let active = state.active_interrupt.expect("alert interrupt active");
    assert!(active.contains("status 1"));
    assert!(output.contents().contains("status 1"));

    ui.shutdown();
}

// =============================================================================
// Turn Bracketing and Status
// =============================================================================

#[tokio::test]
async fn processing_bracket_overrides_and_restores_status() {
    let (ui, output) = spawn_kernel();

    ui.set_base_status("ready", Tone::Neutral);
    ui.start_processing();
    settle().await;

    let state = ui.state().await.unwrap();
    assert!(state.processing);
    assert_eq!(state.status_text, "thinking");
    assert!(output.contents().contains("thinking"));

    ui.end_processing();
    settle().await;

    let state = ui.state().await.unwrap();
    assert!(!state.processing);
    assert_eq!(state.status_text, "ready");

    ui.shutdown();
}

#[tokio::test]
async fn last_status_override_wins_and_clears_back() {
    let (ui, _output) = spawn_kernel();

    ui.push_status_override("compact", "compacting context", None, Tone::Active);
    ui.push_status_override("retry", "retrying request", None, Tone::Warning);
    settle().await;
    assert_eq!(ui.state().await.unwrap().status_text, "retrying request");

    ui.clear_status_override("retry");
    settle().await;
    assert_eq!(ui.state().await.unwrap().status_text, "compacting context");

    ui.clear_status_override("compact");
    settle().await;
    assert_eq!(ui.state().await.unwrap().status_text, "idle");

    ui.shutdown();
}

// =============================================================================
// Interrupts
// =============================================================================

#[tokio::test]
async fn blocking_interrupt_defers_lower_priority_work() {
    let (ui, _output) = spawn_kernel();

    let confirm = ui
        .queue_interrupt(InterruptSpec::new("confirmation", 5, "Allow file write?").blocking())
        .await
        .unwrap();
    let _notice = ui
        .queue_interrupt(InterruptSpec::new("notice", 9, "Update available"))
        .await
        .unwrap();
    settle().await;

    // The blocker arrived first and holds the slot; the notice waits.
    let state = ui.state().await.unwrap();
    assert_eq!(state.active_interrupt.as_deref(), Some("Allow file write?"));
    assert_eq!(state.interrupt_queue_depth, 2);

    ui.complete_interrupt(confirm);
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.active_interrupt.as_deref(), Some("Update available"));

    ui.shutdown();
}

#[tokio::test]
async fn interrupt_handler_runs_and_completes_the_interrupt() {
    let (ui, _output) = spawn_kernel();

    let ran = Arc::new(Mutex::new(false));
    let ran_clone = Arc::clone(&ran);
    let spec = InterruptSpec::new("notification", 3, "background sync done").with_handler(
        Box::new(move || {
            Box::pin(async move {
                *ran_clone.lock().unwrap() = true;
                Ok(())
            })
        }),
    );
    ui.queue_interrupt(spec).await.unwrap();
    settle().await;

    assert!(*ran.lock().unwrap());
    let state = ui.state().await.unwrap();
    assert_eq!(state.active_interrupt, None);

    ui.shutdown();
}

#[tokio::test]
async fn failing_handler_still_completes_and_is_recorded() {
    let (ui, _output) = spawn_kernel();

    let spec = InterruptSpec::new("notification", 3, "flaky hook").with_handler(Box::new(|| {
        Box::pin(async { Err(anyhow::anyhow!("hook exploded")) })
    }));
    ui.queue_interrupt(spec).await.unwrap();
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.active_interrupt, None);

    let snapshot = ui.telemetry_snapshot().await.unwrap();
    assert_eq!(snapshot.error_counts.get("interrupt-handler"), Some(&1));

    ui.shutdown();
}

#[tokio::test]
async fn ttl_expires_an_unacknowledged_interrupt() {
    let (ui, _output) = spawn_kernel();

    ui.queue_interrupt(
        InterruptSpec::new("notice", 2, "transient").with_ttl(Duration::from_millis(80)),
    )
    .await
    .unwrap();
    settle().await;

    sleep(Duration::from_millis(150)).await;
    let state = ui.state().await.unwrap();
    assert_eq!(state.active_interrupt, None);
    assert_eq!(state.interrupt_queue_depth, 0);

    ui.shutdown();
}

// =============================================================================
// Output Guard
// =============================================================================

#[tokio::test]
async fn output_guard_suppresses_overlay_and_restores_it() {
    let (ui, _output) = spawn_kernel();

    ui.set_base_status("ready", Tone::Neutral);
    settle().await;
    assert!(ui.state().await.unwrap().overlay_drawn);

    ui.begin_output();
    ui.begin_output();
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.output_depth, 2);
    assert!(!state.overlay_drawn);

    // Only the outermost end restores the overlay.
    ui.end_output();
    settle().await;
    assert!(!ui.state().await.unwrap().overlay_drawn);

    ui.end_output();
    settle().await;
    let state = ui.state().await.unwrap();
    assert_eq!(state.output_depth, 0);
    assert!(state.overlay_drawn);

    ui.shutdown();
}

// =============================================================================
// Telemetry and Introspection
// =============================================================================

#[tokio::test]
async fn telemetry_counts_kernel_activity() {
    let (ui, _output) = spawn_kernel();

    ui.start_processing();
    ui.on_tool_start(tool_call("t1", "bash"));
    ui.on_tool_complete("t1", None);
    ui.end_processing();
    settle().await;

    let snapshot = ui.telemetry_snapshot().await.unwrap();
    assert_eq!(snapshot.event_counts.get("turn.start"), Some(&1));
    assert_eq!(snapshot.event_counts.get("tool.start"), Some(&1));
    assert_eq!(snapshot.event_counts.get("tool.complete"), Some(&1));
    assert_eq!(snapshot.event_counts.get("turn.end"), Some(&1));

    ui.shutdown();
}

#[tokio::test]
async fn state_snapshot_defaults() {
    let (ui, _output) = spawn_kernel();
    settle().await;

    let state = ui.state().await.unwrap();
    assert_eq!(state.mode, PerformanceMode::Balanced);
    assert!(!state.processing);
    assert_eq!(state.status_text, "idle");
    assert_eq!(state.in_flight_tools, 0);
    assert_eq!(state.active_interrupt, None);

    ui.shutdown();
}

#[tokio::test]
async fn shutdown_stops_the_run_loop() {
    init_tracing();
    let output = CapturedOutput::default();
    let (ui, join) = UnifiedUiController::spawn(fast_config(), Box::new(output.clone()));

    ui.set_base_status("ready", Tone::Neutral);
    ui.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("run loop exits promptly")
        .expect("run loop task");
    assert!(result.is_ok());
}
