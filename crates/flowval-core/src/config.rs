//! Run configuration loaded from TOML.
//!
//! ```toml
//! catalog = "catalog.json"
//! registry = "references.json"
//! output = "out/report.json"
//! summary = "out/summary.md"
//! tasks = ["document-entities"]
//! max_variants = 2
//!
//! [orchestrator]
//! max_concurrency = 4
//! timeout_ms = 30000
//! max_retries = 0
//!
//! [[agents]]
//! kind = "heuristic"
//! id = "heuristic"
//!
//! [[agents]]
//! kind = "replay"
//! id = "recorded"
//! path = "replay.json"
//!
//! [[strategies]]
//! id = "full"
//! kind = "full_exposure"
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::{AgentAdapter, HeuristicAdapter, ReplayAdapter};
use crate::aggregate::AggregateReport;
use crate::domain::catalog::ToolCatalog;
use crate::domain::error::{FlowvalError, Result};
use crate::orchestrator::{run_suite, OrchestratorConfig, RunContext, TestPlan};
use crate::registry::ReferenceRegistry;
use crate::strategy::{CatalogStrategy, ToolStrategy};

fn default_output() -> PathBuf {
    PathBuf::from("flowval-report.json")
}

/// An agent under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentConfig {
    /// Keyless rule-based agent.
    Heuristic { id: String },
    /// Recorded responses replayed from a JSON file.
    Replay { id: String, path: PathBuf },
}

impl AgentConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Heuristic { id } | Self::Replay { id, .. } => id,
        }
    }

    pub fn build(&self) -> Result<Arc<dyn AgentAdapter>> {
        Ok(match self {
            Self::Heuristic { id } => Arc::new(HeuristicAdapter::new(id.clone())),
            Self::Replay { id, path } => Arc::new(ReplayAdapter::load(id.clone(), path)?),
        })
    }
}

/// Everything `flowval run` needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub catalog: PathBuf,
    pub registry: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Optional markdown summary path.
    #[serde(default)]
    pub summary: Option<PathBuf>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Defaults to a single full-exposure strategy when empty.
    #[serde(default)]
    pub strategies: Vec<ToolStrategy>,
    /// Restrict the run to these task ids.
    #[serde(default)]
    pub tasks: Option<Vec<String>>,
    /// Use at most this many query variants per task.
    #[serde(default)]
    pub max_variants: Option<usize>,
}

fn rebase(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

impl RunConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a config file and resolve its relative paths.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlowvalError::Config(format!("read config {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        rebase(base, &mut self.catalog);
        rebase(base, &mut self.registry);
        rebase(base, &mut self.output);
        if let Some(summary) = self.summary.as_mut() {
            rebase(base, summary);
        }
        for agent in &mut self.agents {
            if let AgentConfig::Replay { path, .. } = agent {
                rebase(base, path);
            }
        }
    }

    pub fn build_agents(&self) -> Result<Vec<Arc<dyn AgentAdapter>>> {
        if self.agents.is_empty() {
            return Err(FlowvalError::Config("at least one agent is required".to_string()));
        }
        self.agents.iter().map(AgentConfig::build).collect()
    }

    /// Strategies as trait objects, checked against `catalog`.
    pub fn build_strategies(
        &self,
        catalog: &ToolCatalog,
    ) -> Result<Vec<Arc<dyn CatalogStrategy>>> {
        let strategies = if self.strategies.is_empty() {
            vec![ToolStrategy::full_exposure()]
        } else {
            self.strategies.clone()
        };
        strategies
            .into_iter()
            .map(|s| {
                let unknown = s.unknown_tools(catalog);
                if !unknown.is_empty() {
                    return Err(FlowvalError::Config(format!(
                        "strategy {} names unknown tools: {}",
                        s.id,
                        unknown.join(", ")
                    )));
                }
                Ok(Arc::new(s) as Arc<dyn CatalogStrategy>)
            })
            .collect()
    }

    /// Load inputs and assemble a ready-to-run suite.
    pub fn prepare(&self) -> Result<PreparedRun> {
        self.orchestrator.validate()?;
        let catalog = ToolCatalog::load(&self.catalog)?;
        let registry = ReferenceRegistry::load(&self.registry, &catalog)?;
        let plan = TestPlan::select(&registry, self.tasks.as_deref(), self.max_variants)?;
        let agents = self.build_agents()?;
        let strategies = self.build_strategies(&catalog)?;
        let ctx = RunContext::new(Arc::new(catalog), Arc::new(registry), self.orchestrator);
        Ok(PreparedRun {
            ctx,
            agents,
            strategies,
            plan,
        })
    }
}

/// Validated inputs of one run.
pub struct PreparedRun {
    pub ctx: RunContext,
    pub agents: Vec<Arc<dyn AgentAdapter>>,
    pub strategies: Vec<Arc<dyn CatalogStrategy>>,
    pub plan: TestPlan,
}

impl PreparedRun {
    pub fn tuple_count(&self) -> usize {
        self.agents.len() * self.strategies.len() * self.plan.len()
    }

    pub async fn run(&self) -> Result<AggregateReport> {
        run_suite(&self.ctx, &self.agents, &self.strategies, &self.plan).await
    }
}
