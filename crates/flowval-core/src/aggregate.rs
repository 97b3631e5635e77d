//! Report aggregation.
//!
//! [`aggregate`] is a pure function of the result set: results are sorted by
//! their logical key and grouped into ordered maps, so completion order never
//! shows in the report. Failed tuples stay in every group with a score of 0.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::compare::{ComparisonResult, METRIC_NAMES};
use crate::domain::candidate::{FailureKind, ParseIssue};
use crate::domain::workflow::WorkflowStep;
use crate::registry::ReferenceRegistry;

/// Report format identifier.
pub const REPORT_SCHEMA_VERSION: &str = "flowval.report.v1";

/// Header values fixed once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub catalog_digest: String,
    pub registry_digest: String,
}

/// Score statistics for one group of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub count: usize,
    /// Results that reached a DAG and were compared.
    pub scored: usize,
    pub success_rate: f64,
    /// Mean over all results, failures counted as 0.
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Mean over scored results only; absent when none scored.
    pub mean_scored_only: Option<f64>,
    pub metric_means: BTreeMap<&'static str, f64>,
}

impl GroupStats {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ComparisonResult>) -> Self {
        let mut count = 0usize;
        let mut scored = 0usize;
        let mut total = 0.0;
        let mut scored_total = 0.0;
        let mut min_score = f64::INFINITY;
        let mut max_score = f64::NEG_INFINITY;
        let mut metric_sums = [0.0f64; 6];

        for r in results {
            count += 1;
            total += r.overall_score;
            min_score = min_score.min(r.overall_score);
            max_score = max_score.max(r.overall_score);
            if !r.comparison_failed {
                scored += 1;
                scored_total += r.overall_score;
            }
            for (sum, m) in metric_sums.iter_mut().zip(r.metrics.as_array()) {
                *sum += m;
            }
        }

        if count == 0 {
            return Self {
                count: 0,
                scored: 0,
                success_rate: 0.0,
                mean_score: 0.0,
                min_score: 0.0,
                max_score: 0.0,
                mean_scored_only: None,
                metric_means: METRIC_NAMES.into_iter().map(|n| (n, 0.0)).collect(),
            };
        }

        let n = count as f64;
        Self {
            count,
            scored,
            success_rate: scored as f64 / n,
            mean_score: total / n,
            min_score,
            max_score,
            mean_scored_only: (scored > 0).then(|| scored_total / scored as f64),
            metric_means: METRIC_NAMES
                .into_iter()
                .zip(metric_sums)
                .map(|(name, sum)| (name, sum / n))
                .collect(),
        }
    }
}

/// Run-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub scored: usize,
    pub failed: usize,
    /// `scored / total`.
    pub success_rate: f64,
    pub overall: GroupStats,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    /// Non-fatal parser issues across all candidates, by issue kind.
    pub issues_by_kind: BTreeMap<&'static str, usize>,
}

fn issue_kind(issue: &ParseIssue) -> &'static str {
    match issue {
        ParseIssue::UnknownTool { .. } => "unknown_tool",
        ParseIssue::DanglingReference { .. } => "dangling_reference",
        ParseIssue::MalformedStep { .. } => "malformed_step",
        ParseIssue::DuplicateStepId { .. } => "duplicate_step_id",
        ParseIssue::UnknownFlowStep { .. } => "unknown_flow_step",
        ParseIssue::InvalidParameter { .. } => "invalid_parameter",
        ParseIssue::MissingParameter { .. } => "missing_parameter",
    }
}

/// Side-by-side view of one tuple for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewEntry {
    pub agent_id: String,
    pub strategy_id: String,
    pub task_id: String,
    pub query_index: usize,
    pub query_text: String,
    pub reference_steps: Vec<WorkflowStep>,
    pub reference_flow: Vec<String>,
    pub candidate_steps: Vec<WorkflowStep>,
    pub candidate_flow: Vec<String>,
    pub metrics: BTreeMap<&'static str, f64>,
    pub overall_score: f64,
    pub rationale: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub failure_detail: Option<String>,
    pub issues: Vec<ParseIssue>,
}

impl ReviewEntry {
    fn build(result: &ComparisonResult, registry: &ReferenceRegistry) -> Self {
        let c = &result.candidate;
        let reference = registry.get(&c.key.task_id).map(|r| &r.dag);
        Self {
            agent_id: c.key.agent_id.clone(),
            strategy_id: c.key.strategy_id.clone(),
            task_id: c.key.task_id.clone(),
            query_index: c.key.query_index,
            query_text: c.key.query_text.clone(),
            reference_steps: reference.map(|d| d.steps().to_vec()).unwrap_or_default(),
            reference_flow: reference.map(|d| d.flow_strings()).unwrap_or_default(),
            candidate_steps: c.dag.as_ref().map(|d| d.steps().to_vec()).unwrap_or_default(),
            candidate_flow: c.dag.as_ref().map(|d| d.flow_strings()).unwrap_or_default(),
            metrics: result.metrics.as_map(),
            overall_score: result.overall_score,
            rationale: c.rationale.clone(),
            failure_kind: result.failure_kind,
            failure_detail: c.parse_error.as_ref().map(|e| e.detail.clone()),
            issues: c.issues.clone(),
        }
    }
}

/// The single document a run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub schema_version: &'static str,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub catalog_digest: String,
    pub registry_digest: String,
    pub summary: RunSummary,
    pub by_agent: BTreeMap<String, GroupStats>,
    pub by_strategy: BTreeMap<String, GroupStats>,
    pub by_task: BTreeMap<String, GroupStats>,
    /// agent → strategy → stats.
    pub by_cell: BTreeMap<String, BTreeMap<String, GroupStats>>,
    pub reviews: Vec<ReviewEntry>,
    pub results: Vec<ComparisonResult>,
}

impl AggregateReport {
    pub fn failed_results(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter().filter(|r| r.comparison_failed)
    }
}

fn group_by<'a, K: Ord>(
    results: &'a [ComparisonResult],
    key: impl Fn(&'a ComparisonResult) -> K,
) -> BTreeMap<K, GroupStats> {
    let mut groups: BTreeMap<K, Vec<&ComparisonResult>> = BTreeMap::new();
    for r in results {
        groups.entry(key(r)).or_default().push(r);
    }
    groups
        .into_iter()
        .map(|(k, members)| (k, GroupStats::from_results(members)))
        .collect()
}

/// Build the report for a finished run.
pub fn aggregate(
    mut results: Vec<ComparisonResult>,
    registry: &ReferenceRegistry,
    meta: RunMetadata,
) -> AggregateReport {
    results.sort_by(|a, b| a.candidate.key.cmp(&b.candidate.key));

    let mut failures_by_kind = BTreeMap::new();
    let mut issues_by_kind = BTreeMap::new();
    for r in &results {
        if let Some(kind) = r.failure_kind {
            *failures_by_kind.entry(kind).or_insert(0) += 1;
        }
        for issue in &r.candidate.issues {
            *issues_by_kind.entry(issue_kind(issue)).or_insert(0) += 1;
        }
    }

    let overall = GroupStats::from_results(&results);
    let summary = RunSummary {
        total: overall.count,
        scored: overall.scored,
        failed: overall.count - overall.scored,
        success_rate: overall.success_rate,
        overall,
        failures_by_kind,
        issues_by_kind,
    };

    let mut by_cell: BTreeMap<String, BTreeMap<String, GroupStats>> = BTreeMap::new();
    for ((agent, strategy), stats) in group_by(&results, |r| {
        (
            r.candidate.key.agent_id.clone(),
            r.candidate.key.strategy_id.clone(),
        )
    }) {
        by_cell.entry(agent).or_default().insert(strategy, stats);
    }

    AggregateReport {
        schema_version: REPORT_SCHEMA_VERSION,
        run_id: meta.run_id,
        generated_at: meta.generated_at,
        catalog_digest: meta.catalog_digest,
        registry_digest: meta.registry_digest,
        summary,
        by_agent: group_by(&results, |r| r.candidate.key.agent_id.clone()),
        by_strategy: group_by(&results, |r| r.candidate.key.strategy_id.clone()),
        by_task: group_by(&results, |r| r.candidate.key.task_id.clone()),
        by_cell,
        reviews: results
            .iter()
            .map(|r| ReviewEntry::build(r, registry))
            .collect(),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::MetricScores;
    use crate::domain::candidate::{CandidateResult, TupleKey};

    fn result(agent: &str, score: f64, failed: bool) -> ComparisonResult {
        let key = TupleKey {
            agent_id: agent.to_string(),
            strategy_id: "full".to_string(),
            task_id: "t".to_string(),
            query_index: 0,
            query_text: "q".to_string(),
        };
        let candidate = CandidateResult::adapter_failed(key, "x", 1);
        let mut r = ComparisonResult::sentinel(candidate);
        if !failed {
            r.comparison_failed = false;
            r.failure_kind = None;
            r.overall_score = score;
            r.metrics = MetricScores {
                structural_similarity: score,
                ..MetricScores::zero()
            };
        }
        r
    }

    #[test]
    fn test_group_stats_count_failures_as_zero() {
        let rs = [result("a", 0.8, false), result("a", 0.0, true)];
        let stats = GroupStats::from_results(&rs);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.scored, 1);
        assert!((stats.mean_score - 0.4).abs() < 1e-12);
        assert_eq!(stats.mean_scored_only, Some(0.8));
        assert_eq!(stats.min_score, 0.0);
        assert_eq!(stats.max_score, 0.8);
        assert!((stats.metric_means["structural_similarity"] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_group_stats_empty() {
        let stats = GroupStats::from_results(std::iter::empty());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean_scored_only, None);
    }

    #[test]
    fn test_aggregate_sorts_and_groups() {
        let meta = RunMetadata {
            run_id: "r".to_string(),
            generated_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            catalog_digest: String::new(),
            registry_digest: String::new(),
        };
        let report = aggregate(
            vec![result("b", 1.0, false), result("a", 0.0, true)],
            &ReferenceRegistry::default(),
            meta,
        );
        assert_eq!(report.results[0].candidate.key.agent_id, "a");
        assert_eq!(report.by_agent.len(), 2);
        assert_eq!(report.summary.failures_by_kind[&FailureKind::AdapterFailure], 1);
        assert_eq!(report.by_cell["b"]["full"].scored, 1);
        assert_eq!(report.failed_results().count(), 1);
        assert!(report.reviews[0].reference_steps.is_empty());
    }
}
