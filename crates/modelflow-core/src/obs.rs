//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `run_span`
//! - Emission functions for key lifecycle events: start, node transitions,
//!   callback issue/signal, model selection, finish
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::info;

/// Span tagged with the run_id, for instrumenting a run's async body.
///
/// # Example
///
/// ```ignore
/// use tracing::Instrument;
/// execute_nodes().instrument(run_span("run-12345")).await;
/// // every event inside carries run_id = "run-12345"
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("modelflow.run", run_id = %run_id)
}

/// Emit event: run started for a pipeline.
pub fn emit_run_started(run_id: &str, pipeline_name: &str) {
    info!(event = "run.started", run_id = %run_id, pipeline = %pipeline_name);
}

/// Emit event: run finished with duration, total events, and success status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total_events: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total_events = total_events,
        success = success,
    );
}

/// Emit event: a single event appended to the run.
pub fn emit_event_appended(run_id: &str, event_kind: &str, seq: u64) {
    info!(event = "run.event_appended", run_id = %run_id, kind = %event_kind, seq = seq);
}

/// Emit event: a node started.
pub fn emit_node_entered(run_id: &str, node: &str, kind: &str) {
    info!(event = "run.node_entered", run_id = %run_id, node = %node, node_kind = %kind);
}

/// Emit event: a node failed (warning level).
pub fn emit_node_failed(run_id: &str, node: &str, error_kind: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "run.node_failed",
        run_id = %run_id,
        node = %node,
        error_kind = %error_kind,
        error = %error,
    );
}

/// Emit event: callback invoked and now awaited.
pub fn emit_callback_issued(node: &str, token: &str, timeout_secs: u64) {
    info!(event = "callback.issued", node = %node, token = %token, timeout_secs = timeout_secs);
}

/// Emit event: callback signalled (or gave up waiting).
pub fn emit_callback_signalled(node: &str, token: &str, success: bool) {
    info!(event = "callback.signalled", node = %node, token = %token, success = success);
}

/// Emit event: the selector picked a model package.
pub fn emit_model_selected(group: &str, arn: &str) {
    info!(event = "selector.selected", group = %group, arn = %arn);
}

/// Emit event: run finalization error (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}
