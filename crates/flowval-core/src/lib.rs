//! flowval core library
//!
//! Scores agent-proposed tool-call workflows against expert reference DAGs.
//! Re-exports the pieces needed to load inputs, run a suite and write the
//! report.

pub mod adapter;
pub mod aggregate;
pub mod compare;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod reporting;
pub mod strategy;
pub mod telemetry;

pub use domain::{
    canonical_digest, CandidateResult, CatalogError, Edge, FailureKind, FlowvalError,
    ParamConstraint, ParamValue, ParameterSpec, ParseFailure, ParseIssue, RegistryError, Result,
    ToolCatalog, ToolDescriptor, TupleKey, WorkflowDag, WorkflowStep,
};

pub use adapter::{
    invoke_with_policy, AdapterError, AgentAdapter, AgentRequest, HeuristicAdapter, Invocation,
    InvocationPolicy, ReplayAdapter,
};
pub use aggregate::{
    aggregate, AggregateReport, GroupStats, ReviewEntry, RunMetadata, RunSummary,
    REPORT_SCHEMA_VERSION,
};
pub use compare::{
    compare, ComparisonResult, DagComparison, DetailedDiff, MetricScores, ParamDelta,
    METRIC_NAMES, METRIC_WEIGHTS,
};
pub use config::{AgentConfig, PreparedRun, RunConfig};
pub use orchestrator::{run_suite, OrchestratorConfig, PlannedQuery, RunContext, TestPlan};
pub use parser::{parse, ParsedWorkflow};
pub use prompt::render_prompt;
pub use registry::{ReferenceRegistry, ReferenceWorkflow, TaskDefinition};
pub use reporting::{render_summary_md, write_report_json, write_summary_md};
pub use strategy::{CatalogStrategy, StrategyKind, ToolStrategy};

pub use metrics::{CounterSnapshot, RunCounters};
pub use obs::run_span;
pub use telemetry::{default_directives, init_tracing};

/// flowval version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
