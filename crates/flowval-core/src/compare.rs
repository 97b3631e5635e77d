//! DAG comparison: six structural and semantic metrics.
//!
//! [`compare`] is a pure function of two DAGs. [`ComparisonResult`] wraps it
//! with the candidate's provenance and substitutes an all-zero sentinel for
//! candidates that never produced a DAG.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::domain::candidate::{CandidateResult, FailureKind, ParseIssue};
use crate::domain::workflow::{WorkflowDag, WorkflowStep};

/// Metric names in report order.
pub const METRIC_NAMES: [&str; 6] = [
    "structural_similarity",
    "tool_overlap",
    "workflow_efficiency",
    "dependency_correctness",
    "parameter_appropriateness",
    "output_completeness",
];

/// Weights for [`MetricScores::overall`], in [`METRIC_NAMES`] order.
///
/// All equal, which makes the overall score the arithmetic mean. Historical
/// reports are only comparable while these stay equal.
pub const METRIC_WEIGHTS: [f64; 6] = [1.0; 6];

const STEP_RATIO_WEIGHT: f64 = 0.6;
const EDGE_OVERLAP_WEIGHT: f64 = 0.4;
const EXPECTED_PARAMS_CREDIT: f64 = 0.5;

/// Tool-name stems for tools that normally need parameters.
const PARAMETER_EXPECTED: &[&str] = &[
    "extract", "analy", "search", "filter", "query", "classif", "transform", "summar", "translat",
    "convert", "detect", "match",
];

/// Tool-name stems for tools that work fine without parameters.
const PARAMETER_OPTIONAL: &[&str] = &[
    "load", "read", "list", "get", "fetch", "build", "merge", "save", "export", "validat", "final",
];

/// The six scores for one comparison, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricScores {
    pub structural_similarity: f64,
    pub tool_overlap: f64,
    pub workflow_efficiency: f64,
    pub dependency_correctness: f64,
    pub parameter_appropriateness: f64,
    pub output_completeness: f64,
}

impl MetricScores {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Values in [`METRIC_NAMES`] order.
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.structural_similarity,
            self.tool_overlap,
            self.workflow_efficiency,
            self.dependency_correctness,
            self.parameter_appropriateness,
            self.output_completeness,
        ]
    }

    pub fn as_map(&self) -> BTreeMap<&'static str, f64> {
        METRIC_NAMES.into_iter().zip(self.as_array()).collect()
    }

    /// Weighted mean under [`METRIC_WEIGHTS`].
    pub fn overall(&self) -> f64 {
        let total: f64 = METRIC_WEIGHTS.iter().sum();
        let weighted: f64 = METRIC_WEIGHTS
            .iter()
            .zip(self.as_array())
            .map(|(w, m)| w * m)
            .sum();
        weighted / total
    }
}

/// A parameter that differs between the first reference and candidate step
/// using the same tool. Absent values are `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDelta {
    pub tool: String,
    pub key: String,
    pub before: Value,
    pub after: Value,
}

/// Human-reviewable breakdown of where two DAGs differ.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DetailedDiff {
    pub shared_tools: Vec<String>,
    pub tools_only_in_reference: Vec<String>,
    pub tools_only_in_candidate: Vec<String>,
    pub reference_step_count: usize,
    pub candidate_step_count: usize,
    pub step_count_delta: i64,
    pub edges_only_in_reference: Vec<String>,
    pub edges_only_in_candidate: Vec<String>,
    pub unmatched_reference_outputs: Vec<String>,
    pub parameter_deltas: Vec<ParamDelta>,
    /// Steps the parser removed from the candidate.
    pub dropped_steps: Vec<ParseIssue>,
    /// Steps the parser kept but flagged.
    pub flagged_steps: Vec<ParseIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Output of [`compare`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DagComparison {
    pub metrics: MetricScores,
    pub overall_score: f64,
    pub diff: DetailedDiff,
}

// ---------------------------------------------------------------------------
// Metric helpers
// ---------------------------------------------------------------------------

fn clamp_unit(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// `min / max`, 1.0 when both are zero.
fn count_ratio(a: usize, b: usize) -> f64 {
    match a.max(b) {
        0 => 1.0,
        max => a.min(b) as f64 / max as f64,
    }
}

/// Jaccard index; 1.0 for two empty sets, 0.0 when exactly one is empty.
fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        _ => {
            let shared = a.intersection(b).count();
            let union = a.union(b).count();
            shared as f64 / union as f64
        }
    }
}

/// Split an identifier on `_`, `-`, whitespace and lower-to-upper case
/// boundaries, lowercased.
fn identifier_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn matches_stem(tool: &str, stems: &[&str]) -> bool {
    identifier_tokens(tool)
        .iter()
        .any(|token| stems.iter().any(|stem| token.starts_with(stem)))
}

fn step_parameter_credit(step: &WorkflowStep) -> f64 {
    if !step.parameters.is_empty() {
        1.0
    } else if matches_stem(&step.tool, PARAMETER_EXPECTED) {
        EXPECTED_PARAMS_CREDIT
    } else if matches_stem(&step.tool, PARAMETER_OPTIONAL) {
        1.0
    } else {
        0.0
    }
}

fn output_tokens(name: &str) -> BTreeSet<String> {
    name.split('_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn structural_similarity(reference: &WorkflowDag, candidate: &WorkflowDag) -> f64 {
    let ratio = count_ratio(reference.len(), candidate.len());
    let overlap = jaccard(reference.edges(), candidate.edges());
    clamp_unit(STEP_RATIO_WEIGHT * ratio + EDGE_OVERLAP_WEIGHT * overlap)
}

fn tool_overlap(reference: &WorkflowDag, candidate: &WorkflowDag) -> f64 {
    jaccard(&reference.tool_names(), &candidate.tool_names())
}

fn workflow_efficiency(reference: &WorkflowDag, candidate: &WorkflowDag) -> f64 {
    if candidate.len() <= reference.len() {
        1.0
    } else {
        reference.len() as f64 / candidate.len() as f64
    }
}

fn dependency_correctness(candidate: &WorkflowDag) -> f64 {
    let stats = candidate.reference_stats();
    if stats.total == 0 {
        return 1.0;
    }
    clamp_unit(1.0 - stats.dangling as f64 / stats.total as f64)
}

fn parameter_appropriateness(candidate: &WorkflowDag) -> f64 {
    if candidate.is_empty() {
        return 1.0;
    }
    let credit: f64 = candidate.steps().iter().map(step_parameter_credit).sum();
    clamp_unit(credit / candidate.len() as f64)
}

/// Reference outputs with no token-overlapping candidate output.
fn unmatched_outputs(reference: &WorkflowDag, candidate: &WorkflowDag) -> Vec<String> {
    let candidate_tokens: Vec<BTreeSet<String>> = candidate
        .output_names()
        .into_iter()
        .map(output_tokens)
        .collect();
    reference
        .output_names()
        .into_iter()
        .filter(|name| {
            let wanted = output_tokens(name);
            !candidate_tokens
                .iter()
                .any(|have| !have.is_disjoint(&wanted))
        })
        .map(str::to_string)
        .collect()
}

fn output_completeness(reference: &WorkflowDag, candidate: &WorkflowDag) -> f64 {
    let total = reference.output_names().len();
    if total == 0 {
        return 1.0;
    }
    if candidate.output_names().is_empty() {
        return 0.0;
    }
    let missing = unmatched_outputs(reference, candidate).len();
    clamp_unit((total - missing) as f64 / total as f64)
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

fn parameter_deltas(
    tool: &str,
    reference: &WorkflowStep,
    candidate: &WorkflowStep,
) -> Vec<ParamDelta> {
    let keys: BTreeSet<&String> = reference
        .parameters
        .keys()
        .chain(candidate.parameters.keys())
        .collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = reference
                .parameters
                .get(key)
                .map_or(Value::Null, |v| v.to_json());
            let after = candidate
                .parameters
                .get(key)
                .map_or(Value::Null, |v| v.to_json());
            (before != after).then(|| ParamDelta {
                tool: tool.to_string(),
                key: key.clone(),
                before,
                after,
            })
        })
        .collect()
}

fn detailed_diff(reference: &WorkflowDag, candidate: &WorkflowDag) -> DetailedDiff {
    let ref_tools = reference.tool_names();
    let cand_tools = candidate.tool_names();
    let owned = |set: BTreeSet<&&str>| set.into_iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let shared: Vec<String> = owned(ref_tools.intersection(&cand_tools).collect());

    let first_step = |dag: &WorkflowDag, tool: &str| -> Option<WorkflowStep> {
        dag.steps().iter().find(|s| s.tool == tool).cloned()
    };
    let parameter_deltas = shared
        .iter()
        .filter_map(|tool| {
            Some(parameter_deltas(
                tool,
                &first_step(reference, tool)?,
                &first_step(candidate, tool)?,
            ))
        })
        .flatten()
        .collect();

    DetailedDiff {
        tools_only_in_reference: owned(ref_tools.difference(&cand_tools).collect()),
        tools_only_in_candidate: owned(cand_tools.difference(&ref_tools).collect()),
        shared_tools: shared,
        reference_step_count: reference.len(),
        candidate_step_count: candidate.len(),
        step_count_delta: candidate.len() as i64 - reference.len() as i64,
        edges_only_in_reference: reference
            .edges()
            .difference(candidate.edges())
            .map(ToString::to_string)
            .collect(),
        edges_only_in_candidate: candidate
            .edges()
            .difference(reference.edges())
            .map(ToString::to_string)
            .collect(),
        unmatched_reference_outputs: unmatched_outputs(reference, candidate),
        parameter_deltas,
        ..DetailedDiff::default()
    }
}

/// Score `candidate` against `reference`.
pub fn compare(reference: &WorkflowDag, candidate: &WorkflowDag) -> DagComparison {
    let metrics = MetricScores {
        structural_similarity: structural_similarity(reference, candidate),
        tool_overlap: tool_overlap(reference, candidate),
        workflow_efficiency: workflow_efficiency(reference, candidate),
        dependency_correctness: dependency_correctness(candidate),
        parameter_appropriateness: parameter_appropriateness(candidate),
        output_completeness: output_completeness(reference, candidate),
    };
    DagComparison {
        overall_score: metrics.overall(),
        metrics,
        diff: detailed_diff(reference, candidate),
    }
}

/// A candidate plus its scores, or a zero-score sentinel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub candidate: CandidateResult,
    pub metrics: MetricScores,
    pub overall_score: f64,
    pub comparison_failed: bool,
    pub failure_kind: Option<FailureKind>,
    pub detailed_diff: Option<DetailedDiff>,
}

impl ComparisonResult {
    /// Compare a parsed candidate against its task's reference DAG.
    ///
    /// Falls back to [`ComparisonResult::sentinel`] if the candidate has no DAG.
    pub fn scored(candidate: CandidateResult, reference: &WorkflowDag) -> Self {
        let Some(dag) = candidate.dag.as_ref() else {
            return Self::sentinel(candidate);
        };
        let DagComparison {
            metrics,
            overall_score,
            mut diff,
        } = compare(reference, dag);

        let (dropped, flagged): (Vec<ParseIssue>, Vec<ParseIssue>) = candidate
            .issues
            .iter()
            .cloned()
            .partition(ParseIssue::dropped_step);
        diff.dropped_steps = dropped;
        diff.flagged_steps = flagged;
        diff.rationale = candidate.rationale.clone();

        Self {
            candidate,
            metrics,
            overall_score,
            comparison_failed: false,
            failure_kind: None,
            detailed_diff: Some(diff),
        }
    }

    /// All-zero result for a candidate that never reached a valid DAG.
    pub fn sentinel(candidate: CandidateResult) -> Self {
        let failure_kind = candidate
            .failure_kind()
            .or(Some(FailureKind::MalformedOutput));
        Self {
            candidate,
            metrics: MetricScores::zero(),
            overall_score: 0.0,
            comparison_failed: true,
            failure_kind,
            detailed_diff: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_tokens_split_case_and_separators() {
        assert_eq!(identifier_tokens("extractSpecific1"), vec!["extract", "specific1"]);
        assert_eq!(identifier_tokens("load_document"), vec!["load", "document"]);
        assert_eq!(identifier_tokens("build-KG"), vec!["build", "kg"]);
    }

    #[test]
    fn test_parameter_credit_prefers_expected_verbs() {
        assert_eq!(step_parameter_credit(&WorkflowStep::new("s", "extract_entities")), 0.5);
        assert_eq!(step_parameter_credit(&WorkflowStep::new("s", "load_document")), 1.0);
        assert_eq!(step_parameter_credit(&WorkflowStep::new("s", "frobnicate")), 0.0);
        let with_params =
            WorkflowStep::new("s", "frobnicate").with_param("level", serde_json::json!(3));
        assert_eq!(step_parameter_credit(&with_params), 1.0);
    }

    #[test]
    fn test_jaccard_conventions() {
        let empty: BTreeSet<&str> = BTreeSet::new();
        let one: BTreeSet<&str> = ["a"].into();
        assert_eq!(jaccard(&empty, &empty), 1.0);
        assert_eq!(jaccard(&one, &empty), 0.0);
        assert_eq!(jaccard(&one, &one), 1.0);
    }

    #[test]
    fn test_overall_is_mean_under_equal_weights() {
        let m = MetricScores {
            structural_similarity: 0.0,
            tool_overlap: 0.5,
            workflow_efficiency: 1.0,
            dependency_correctness: 1.0,
            parameter_appropriateness: 0.5,
            output_completeness: 0.0,
        };
        assert!((m.overall() - 0.5).abs() < 1e-12);
        assert_eq!(m.as_map().len(), 6);
    }

    #[test]
    fn test_parameter_deltas_include_missing_keys() {
        let r = WorkflowStep::new("a", "extract").with_param("mode", serde_json::json!("fast"));
        let c = WorkflowStep::new("b", "extract").with_param("limit", serde_json::json!(5));
        let deltas = parameter_deltas("extract", &r, &c);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].key, "limit");
        assert_eq!(deltas[0].before, Value::Null);
        assert_eq!(deltas[1].after, Value::Null);
    }
}
