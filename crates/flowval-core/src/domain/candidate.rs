//! Per-tuple outcomes: what an agent returned and whether it parsed.

use std::fmt;

use serde::Serialize;

use crate::domain::workflow::WorkflowDag;
use crate::parser::ParsedWorkflow;

/// Why a tuple never reached a scorable DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, transport error or backend refusal at the agent boundary.
    AdapterFailure,
    /// No JSON object could be found in the agent's text.
    MalformedOutput,
    /// JSON was found but it carries no usable `steps` array.
    MissingSteps,
    /// The candidate graph contains a directed cycle.
    CyclicWorkflow,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdapterFailure => "adapter_failure",
            Self::MalformedOutput => "malformed_output",
            Self::MissingSteps => "missing_steps",
            Self::CyclicWorkflow => "cyclic_workflow",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure recorded on a [`CandidateResult`].
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ParseFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ParseFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedOutput, detail)
    }

    pub fn missing_steps(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::MissingSteps, detail)
    }

    pub fn cyclic(members: &[String]) -> Self {
        Self::new(
            FailureKind::CyclicWorkflow,
            format!("cycle through steps [{}]", members.join(", ")),
        )
    }

    pub fn adapter(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::AdapterFailure, detail)
    }
}

/// A non-fatal defect found while normalizing a candidate workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssue {
    /// Step named a tool absent from the catalog; the step was dropped.
    UnknownTool { step_id: String, tool: String },
    /// Step consumes an output nobody produces; the step was kept.
    DanglingReference {
        step_id: String,
        reference: String,
        ambiguous: bool,
    },
    /// Entry in `steps` was not a usable object; it was dropped.
    MalformedStep { index: usize, reason: String },
    /// A later step reused an id; the later step was dropped.
    DuplicateStepId { step_id: String },
    /// A `flow` entry was unparseable or named a missing step; it was ignored.
    UnknownFlowStep { entry: String },
    InvalidParameter {
        step_id: String,
        parameter: String,
        reason: String,
    },
    MissingParameter { step_id: String, parameter: String },
}

impl ParseIssue {
    /// Whether the issue removed a step from the candidate.
    pub fn dropped_step(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool { .. } | Self::MalformedStep { .. } | Self::DuplicateStepId { .. }
        )
    }
}

/// Logical identity of one orchestrator tuple.
///
/// Field order defines the report's sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TupleKey {
    pub agent_id: String,
    pub strategy_id: String,
    pub task_id: String,
    pub query_index: usize,
    pub query_text: String,
}

/// What one agent produced for one tuple.
///
/// Only built through the constructors below, which keep `parse_succeeded`,
/// `dag` and `parse_error` consistent. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateResult {
    #[serde(flatten)]
    pub key: TupleKey,
    pub raw_response: Option<String>,
    pub parse_succeeded: bool,
    pub dag: Option<WorkflowDag>,
    pub parse_error: Option<ParseFailure>,
    pub issues: Vec<ParseIssue>,
    pub rationale: Option<String>,
    /// Adapter attempts spent, including a retry.
    pub attempts: u32,
}

impl CandidateResult {
    /// Record the parser's verdict on a raw response.
    pub fn from_parse(
        key: TupleKey,
        raw_response: String,
        parsed: Result<ParsedWorkflow, ParseFailure>,
        attempts: u32,
    ) -> Self {
        match parsed {
            Ok(workflow) => Self {
                key,
                raw_response: Some(raw_response),
                parse_succeeded: true,
                dag: Some(workflow.dag),
                parse_error: None,
                issues: workflow.issues,
                rationale: workflow.rationale,
                attempts,
            },
            Err(failure) => Self {
                key,
                raw_response: Some(raw_response),
                parse_succeeded: false,
                dag: None,
                parse_error: Some(failure),
                issues: Vec::new(),
                rationale: None,
                attempts,
            },
        }
    }

    /// Record an agent call that produced no text.
    pub fn adapter_failed(key: TupleKey, detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            key,
            raw_response: None,
            parse_succeeded: false,
            dag: None,
            parse_error: Some(ParseFailure::adapter(detail)),
            issues: Vec::new(),
            rationale: None,
            attempts,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.parse_error.as_ref().map(|f| f.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TupleKey {
        TupleKey {
            agent_id: "agent".to_string(),
            strategy_id: "full".to_string(),
            task_id: "task".to_string(),
            query_index: 0,
            query_text: "do it".to_string(),
        }
    }

    #[test]
    fn test_adapter_failure_has_no_dag() {
        let c = CandidateResult::adapter_failed(key(), "timed out", 2);
        assert!(!c.parse_succeeded);
        assert!(c.dag.is_none());
        assert_eq!(c.failure_kind(), Some(FailureKind::AdapterFailure));
        assert_eq!(c.attempts, 2);
    }

    #[test]
    fn test_parse_failure_keeps_raw_text() {
        let c = CandidateResult::from_parse(
            key(),
            "no json here".to_string(),
            Err(ParseFailure::malformed("no JSON object found")),
            1,
        );
        assert_eq!(c.raw_response.as_deref(), Some("no json here"));
        assert_eq!(c.failure_kind(), Some(FailureKind::MalformedOutput));
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let v = serde_json::to_value(FailureKind::CyclicWorkflow).unwrap();
        assert_eq!(v, serde_json::json!("cyclic_workflow"));
        assert_eq!(FailureKind::MissingSteps.to_string(), "missing_steps");
    }

    #[test]
    fn test_tuple_key_ordering_is_agent_first() {
        let mut a = key();
        let mut b = key();
        a.agent_id = "alpha".to_string();
        b.agent_id = "beta".to_string();
        b.query_index = 0;
        a.query_index = 9;
        assert!(a < b);
    }
}
