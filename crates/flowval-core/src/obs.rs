//! Structured observability hooks for the run lifecycle.
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it. Verbosity is controlled through `FLOWVAL_LOG` (see
//! [`crate::telemetry::init_tracing`]).

use tracing::{info, warn};

use crate::domain::candidate::FailureKind;

/// The run-scoped span; `run_suite` instruments its future with it.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("flowval.run", run_id = %run_id)
}

/// Emit event: run started with the size of its cross product.
pub fn emit_run_started(run_id: &str, agents: usize, strategies: usize, queries: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        agents = agents,
        strategies = strategies,
        queries = queries,
        tuples = agents * strategies * queries,
    );
}

/// Emit event: one tuple finished, scored or not.
pub fn emit_tuple_finished(
    run_id: &str,
    agent_id: &str,
    strategy_id: &str,
    task_id: &str,
    query_index: usize,
    overall_score: f64,
    failure: Option<FailureKind>,
) {
    info!(
        event = "tuple.finished",
        run_id = %run_id,
        agent = %agent_id,
        strategy = %strategy_id,
        task = %task_id,
        query_index = query_index,
        overall_score = overall_score,
        failure = failure.map(|k| k.as_str()).unwrap_or("none"),
    );
}

/// Emit event: adapter call failed (warning level).
pub fn emit_adapter_failure(run_id: &str, agent_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "adapter.failed", run_id = %run_id, agent = %agent_id, error = %error);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total: usize, scored: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total = total,
        scored = scored,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = run_span("test-run-id").entered();
        emit_run_started("test-run-id", 1, 1, 1);
        emit_tuple_finished("test-run-id", "a", "s", "t", 0, 0.0, Some(FailureKind::MissingSteps));
    }
}
