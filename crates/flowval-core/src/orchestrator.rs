//! Test orchestration: the `(agent, strategy, task, query)` cross product.
//!
//! [`run_suite`] validates its inputs once, then spawns one worker per tuple.
//! A semaphore bounds how many workers are inside the adapter call at once.
//! Each worker runs adapter call → parse → compare and returns exactly one
//! [`ComparisonResult`]; nothing a worker does can fail the batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::adapter::{invoke_with_policy, AgentAdapter, AgentRequest, InvocationPolicy};
use crate::aggregate::{aggregate, AggregateReport, RunMetadata};
use crate::compare::ComparisonResult;
use crate::domain::candidate::{CandidateResult, TupleKey};
use crate::domain::catalog::{ToolCatalog, ToolDescriptor};
use crate::domain::digest::canonical_digest;
use crate::domain::error::{FlowvalError, RegistryError, Result};
use crate::domain::workflow::WorkflowDag;
use crate::metrics::RunCounters;
use crate::obs;
use crate::parser::parse;
use crate::prompt::render_prompt;
use crate::registry::ReferenceRegistry;
use crate::strategy::CatalogStrategy;

/// Worker pool and adapter-call bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum adapter calls in flight.
    pub max_concurrency: usize,
    /// Per-attempt adapter timeout.
    pub timeout_ms: u64,
    /// Retries per tuple after a failed attempt; capped at one.
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_ms: 30_000,
            max_retries: 0,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(FlowvalError::InvalidRun(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(FlowvalError::InvalidRun(
                "timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.max_retries > InvocationPolicy::RETRY_CAP {
            return Err(FlowvalError::InvalidRun(format!(
                "max_retries must be at most {}",
                InvocationPolicy::RETRY_CAP
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> InvocationPolicy {
        InvocationPolicy::new(self.timeout_ms, self.max_retries)
    }
}

/// Everything one run shares read-only across its workers.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    /// The single wall-clock value recorded in the report.
    pub started_at: DateTime<Utc>,
    pub catalog: Arc<ToolCatalog>,
    pub registry: Arc<ReferenceRegistry>,
    pub config: OrchestratorConfig,
}

impl RunContext {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        registry: Arc<ReferenceRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            catalog,
            registry,
            config,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Report header for this run, including input digests.
    pub fn metadata(&self) -> Result<RunMetadata> {
        Ok(RunMetadata {
            run_id: self.run_id.clone(),
            generated_at: self.started_at,
            catalog_digest: canonical_digest(self.catalog.as_ref())?,
            registry_digest: canonical_digest(self.registry.as_ref())?,
        })
    }
}

/// One planned query against one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedQuery {
    pub task_id: String,
    /// Position of the query among the task's accepted variants.
    pub query_index: usize,
    pub query_text: String,
}

/// The task/query half of the cross product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPlan {
    entries: Vec<PlannedQuery>,
}

impl TestPlan {
    pub fn new(entries: Vec<PlannedQuery>) -> Self {
        Self { entries }
    }

    /// Every accepted variant of every task.
    pub fn from_registry(registry: &ReferenceRegistry) -> Self {
        let entries = registry
            .tasks()
            .flat_map(|task| {
                task.accepted_query_variants
                    .iter()
                    .enumerate()
                    .map(|(query_index, q)| PlannedQuery {
                        task_id: task.task_id.clone(),
                        query_index,
                        query_text: q.clone(),
                    })
            })
            .collect();
        Self { entries }
    }

    /// Restrict to `tasks` (when given) and to the first `max_variants`
    /// variants per task (when given).
    pub fn select(
        registry: &ReferenceRegistry,
        tasks: Option<&[String]>,
        max_variants: Option<usize>,
    ) -> Result<Self> {
        if let Some(tasks) = tasks {
            for task_id in tasks {
                registry.require(task_id)?;
            }
        }
        let mut plan = Self::from_registry(registry);
        plan.entries.retain(|e| {
            tasks.map_or(true, |t| t.iter().any(|id| id == &e.task_id))
                && max_variants.map_or(true, |cap| e.query_index < cap)
        });
        Ok(plan)
    }

    pub fn retain(&mut self, keep: impl FnMut(&PlannedQuery) -> bool) {
        self.entries.retain(keep);
    }

    pub fn entries(&self) -> &[PlannedQuery] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A strategy's catalog view, computed once per run.
struct StrategyView {
    id: String,
    tools: Vec<ToolDescriptor>,
    catalog: ToolCatalog,
}

fn unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(FlowvalError::InvalidRun(format!("{kind} id must not be empty")));
        }
        if !seen.insert(id) {
            return Err(FlowvalError::InvalidRun(format!("duplicate {kind} id: {id}")));
        }
    }
    Ok(())
}

fn build_views(
    catalog: &ToolCatalog,
    strategies: &[Arc<dyn CatalogStrategy>],
) -> Result<Vec<Arc<StrategyView>>> {
    strategies
        .iter()
        .map(|strategy| {
            let tools = strategy.apply(catalog);
            let view = ToolCatalog::new(tools.clone()).map_err(|e| {
                FlowvalError::InvalidRun(format!("strategy {}: {e}", strategy.id()))
            })?;
            if view.is_empty() {
                return Err(FlowvalError::InvalidRun(format!(
                    "strategy {} exposes no tools",
                    strategy.id()
                )));
            }
            Ok(Arc::new(StrategyView {
                id: strategy.id().to_string(),
                tools,
                catalog: view,
            }))
        })
        .collect()
}

/// Shared, immutable inputs of one worker.
struct Job {
    key: TupleKey,
    agent: Arc<dyn AgentAdapter>,
    view: Arc<StrategyView>,
    reference: Arc<WorkflowDag>,
}

async fn run_tuple(
    job: Job,
    run_id: &str,
    policy: InvocationPolicy,
    counters: &RunCounters,
) -> ComparisonResult {
    counters.inc_dispatched();
    let Job {
        key,
        agent,
        view,
        reference,
    } = job;

    let request = AgentRequest {
        query: key.query_text.clone(),
        prompt: render_prompt(&key.query_text, &view.tools),
        tools: view.tools.clone(),
        timeout_ms: policy.timeout_ms,
    };
    let invocation = invoke_with_policy(agent.as_ref(), &request, &policy).await;
    counters.add_retries(u64::from(invocation.attempts.saturating_sub(1)));

    let candidate = match invocation.outcome {
        Ok(raw) => {
            let parsed = parse(&raw, &view.catalog);
            if parsed.is_err() {
                counters.inc_parse_failures();
            }
            CandidateResult::from_parse(key, raw, parsed, invocation.attempts)
        }
        Err(err) => {
            counters.inc_adapter_failures();
            obs::emit_adapter_failure(run_id, agent.id(), &err);
            CandidateResult::adapter_failed(key, err.to_string(), invocation.attempts)
        }
    };

    let result = if candidate.parse_succeeded {
        counters.inc_scored();
        ComparisonResult::scored(candidate, &reference)
    } else {
        ComparisonResult::sentinel(candidate)
    };

    let k = &result.candidate.key;
    obs::emit_tuple_finished(
        run_id,
        &k.agent_id,
        &k.strategy_id,
        &k.task_id,
        k.query_index,
        result.overall_score,
        result.failure_kind,
    );
    result
}

/// Run every `(agent, strategy, planned query)` tuple and aggregate.
///
/// Returns an error only for invalid inputs, before any agent is called.
/// Once workers start, every tuple produces exactly one entry in the
/// report, scored or marked with its failure kind.
pub async fn run_suite(
    ctx: &RunContext,
    agents: &[Arc<dyn AgentAdapter>],
    strategies: &[Arc<dyn CatalogStrategy>],
    plan: &TestPlan,
) -> Result<AggregateReport> {
    run_suite_inner(ctx, agents, strategies, plan)
        .instrument(obs::run_span(&ctx.run_id))
        .await
}

async fn run_suite_inner(
    ctx: &RunContext,
    agents: &[Arc<dyn AgentAdapter>],
    strategies: &[Arc<dyn CatalogStrategy>],
    plan: &TestPlan,
) -> Result<AggregateReport> {
    ctx.config.validate()?;
    if agents.is_empty() {
        return Err(FlowvalError::InvalidRun("no agents configured".to_string()));
    }
    if strategies.is_empty() {
        return Err(FlowvalError::InvalidRun("no strategies configured".to_string()));
    }
    if plan.is_empty() {
        return Err(FlowvalError::InvalidRun("test plan is empty".to_string()));
    }
    unique_ids("agent", agents.iter().map(|a| a.id()))?;
    unique_ids("strategy", strategies.iter().map(|s| s.id()))?;

    let mut references: HashMap<&str, Arc<WorkflowDag>> = HashMap::new();
    for entry in plan.entries() {
        let reference = ctx
            .registry
            .get(&entry.task_id)
            .ok_or_else(|| RegistryError::TaskNotFound {
                task_id: entry.task_id.clone(),
            })?;
        references
            .entry(entry.task_id.as_str())
            .or_insert_with(|| Arc::new(reference.dag.clone()));
    }
    let views = build_views(&ctx.catalog, strategies)?;
    let metadata = ctx.metadata()?;

    let mut jobs = Vec::with_capacity(agents.len() * views.len() * plan.len());
    for agent in agents {
        for view in &views {
            for entry in plan.entries() {
                let reference = references
                    .get(entry.task_id.as_str())
                    .cloned()
                    .ok_or_else(|| RegistryError::TaskNotFound {
                        task_id: entry.task_id.clone(),
                    })?;
                jobs.push(Job {
                    key: TupleKey {
                        agent_id: agent.id().to_string(),
                        strategy_id: view.id.clone(),
                        task_id: entry.task_id.clone(),
                        query_index: entry.query_index,
                        query_text: entry.query_text.clone(),
                    },
                    agent: Arc::clone(agent),
                    view: Arc::clone(view),
                    reference,
                });
            }
        }
    }

    obs::emit_run_started(&ctx.run_id, agents.len(), views.len(), plan.len());
    let started = Instant::now();
    let counters = Arc::new(RunCounters::new());
    let sem = Arc::new(tokio::sync::Semaphore::new(ctx.config.max_concurrency));
    let policy = ctx.config.policy();

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let key = job.key.clone();
        let sem = Arc::clone(&sem);
        let counters = Arc::clone(&counters);
        let run_id = ctx.run_id.clone();
        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await.ok();
                run_tuple(job, &run_id, policy, &counters).await
            }
            .in_current_span(),
        );
        handles.push((key, task));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (key, task) in handles {
        match task.await {
            Ok(result) => results.push(result),
            Err(e) => {
                counters.inc_adapter_failures();
                tracing::error!(
                    agent = %key.agent_id,
                    task = %key.task_id,
                    error = %e,
                    "worker aborted"
                );
                let candidate =
                    CandidateResult::adapter_failed(key, format!("worker aborted: {e}"), 0);
                results.push(ComparisonResult::sentinel(candidate));
            }
        }
    }

    counters.flush(&ctx.run_id);
    let report = aggregate(results, &ctx.registry, metadata);
    obs::emit_run_finished(
        &ctx.run_id,
        started.elapsed().as_millis() as u64,
        report.summary.total,
        report.summary.scored,
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::ToolDescriptor;
    use crate::domain::workflow::WorkflowStep;
    use crate::registry::TaskDefinition;

    fn registry() -> ReferenceRegistry {
        let catalog = ToolCatalog::new(vec![ToolDescriptor::new("load", "Load")]).unwrap();
        ReferenceRegistry::from_definitions(
            vec![
                TaskDefinition {
                    task_id: "a".to_string(),
                    description: String::new(),
                    query_variants: vec!["q1".into(), "q2".into(), "q3".into()],
                    steps: vec![WorkflowStep::new("s1", "load")],
                    flow: Vec::new(),
                },
                TaskDefinition {
                    task_id: "b".to_string(),
                    description: "only one".to_string(),
                    query_variants: Vec::new(),
                    steps: vec![WorkflowStep::new("s1", "load")],
                    flow: Vec::new(),
                },
            ],
            &catalog,
        )
        .unwrap()
    }

    #[test]
    fn test_plan_covers_all_variants() {
        let plan = TestPlan::from_registry(&registry());
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.entries()[3].query_text, "only one");
    }

    #[test]
    fn test_plan_select_filters_and_caps() {
        let reg = registry();
        let plan = TestPlan::select(&reg, Some(&["a".to_string()]), Some(2)).unwrap();
        let queries: Vec<&str> = plan.entries().iter().map(|e| e.query_text.as_str()).collect();
        assert_eq!(queries, vec!["q1", "q2"]);
    }

    #[test]
    fn test_plan_select_rejects_unknown_task() {
        let err = TestPlan::select(&registry(), Some(&["zzz".to_string()]), None).unwrap_err();
        assert!(matches!(
            err,
            FlowvalError::Registry(RegistryError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        let zero = OrchestratorConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let retries = OrchestratorConfig {
            max_retries: 2,
            ..Default::default()
        };
        assert!(retries.validate().is_err());
    }

    #[test]
    fn test_unique_ids_rejects_duplicates() {
        assert!(unique_ids("agent", ["a", "b"].into_iter()).is_ok());
        assert!(unique_ids("agent", ["a", "a"].into_iter()).is_err());
        assert!(unique_ids("agent", [" "].into_iter()).is_err());
    }
}
