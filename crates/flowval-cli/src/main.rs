//! flowval - Agent Workflow Validation Engine CLI
//!
//! ## Commands
//!
//! - `run`: run every configured agent and strategy over the reference tasks
//!   and write the report
//! - `validate`: load a catalog and registry and report whether they are valid
//! - `score`: score one saved agent response against a reference task

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use flowval_core::{
    canonical_digest, parse, write_report_json, write_summary_md, CandidateResult,
    ComparisonResult, ReferenceRegistry, RunConfig, ToolCatalog, TupleKey,
};

#[derive(Parser)]
#[command(name = "flowval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Score agent-generated tool workflows against reference DAGs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a validation suite described by a TOML config
    Run {
        /// Path to the run config
        #[arg(short, long)]
        config: PathBuf,

        /// Override the maximum number of concurrent agent calls
        #[arg(long, env = "FLOWVAL_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Override the per-call agent timeout in milliseconds
        #[arg(long, env = "FLOWVAL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Override the report output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a markdown summary to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Validate a tool catalog and reference registry
    Validate {
        /// Tool catalog JSON file
        #[arg(long)]
        catalog: PathBuf,

        /// Reference workflow JSON file
        #[arg(long)]
        registry: PathBuf,
    },

    /// Score a single saved agent response
    Score {
        /// Tool catalog JSON file
        #[arg(long)]
        catalog: PathBuf,

        /// Reference workflow JSON file
        #[arg(long)]
        registry: PathBuf,

        /// Reference task id
        #[arg(long)]
        task: String,

        /// File holding the raw agent response ("-" for stdin)
        #[arg(long, default_value = "-")]
        response: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    flowval_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            concurrency,
            timeout_ms,
            output,
            summary,
        } => cmd_run(&config, concurrency, timeout_ms, output, summary).await,
        Commands::Validate { catalog, registry } => cmd_validate(&catalog, &registry),
        Commands::Score {
            catalog,
            registry,
            task,
            response,
        } => cmd_score(&catalog, &registry, &task, &response),
    }
}

fn load_inputs(catalog: &Path, registry: &Path) -> Result<(ToolCatalog, ReferenceRegistry)> {
    let catalog = ToolCatalog::load(catalog).context("Failed to load tool catalog")?;
    let registry =
        ReferenceRegistry::load(registry, &catalog).context("Failed to load reference registry")?;
    Ok((catalog, registry))
}

async fn cmd_run(
    config_path: &Path,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
    output: Option<PathBuf>,
    summary: Option<PathBuf>,
) -> Result<()> {
    let mut config = RunConfig::load(config_path)
        .with_context(|| format!("Failed to load config {:?}", config_path))?;
    if let Some(n) = concurrency {
        config.orchestrator.max_concurrency = n;
    }
    if let Some(ms) = timeout_ms {
        config.orchestrator.timeout_ms = ms;
    }
    if let Some(path) = output {
        config.output = path;
    }
    if summary.is_some() {
        config.summary = summary;
    }

    let prepared = config.prepare().context("Invalid run inputs")?;
    info!(
        run_id = %prepared.ctx.run_id,
        tuples = prepared.tuple_count(),
        "starting run"
    );

    let report = prepared.run().await.context("Run failed to start")?;

    write_report_json(&config.output, &report)?;
    if let Some(path) = &config.summary {
        write_summary_md(path, &report)?;
    }

    println!("Run:          {}", report.run_id);
    println!("Tuples:       {}", report.summary.total);
    println!(
        "Scored:       {} ({:.1}%)",
        report.summary.scored,
        report.summary.success_rate * 100.0
    );
    println!("Mean score:   {:.3}", report.summary.overall.mean_score);
    for (kind, n) in &report.summary.failures_by_kind {
        println!("  {kind}: {n}");
    }
    println!("Report:       {:?}", config.output);
    Ok(())
}

fn cmd_validate(catalog_path: &Path, registry_path: &Path) -> Result<()> {
    let (catalog, registry) = load_inputs(catalog_path, registry_path)?;

    println!("Catalog:  {} tools ({})", catalog.len(), canonical_digest(&catalog)?);
    println!("Registry: {} tasks ({})", registry.len(), canonical_digest(&registry)?);
    for task in registry.tasks() {
        println!(
            "  {}: {} steps, {} edges, {} query variants",
            task.task_id,
            task.dag.len(),
            task.dag.edges().len(),
            task.accepted_query_variants.len()
        );
    }
    Ok(())
}

fn read_response(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read response from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
    }
}

fn cmd_score(catalog_path: &Path, registry_path: &Path, task_id: &str, response: &Path) -> Result<()> {
    let (catalog, registry) = load_inputs(catalog_path, registry_path)?;
    let reference = registry.require(task_id)?;
    let raw = read_response(response)?;

    let key = TupleKey {
        agent_id: "manual".to_string(),
        strategy_id: "full_exposure".to_string(),
        task_id: reference.task_id.clone(),
        query_index: 0,
        query_text: reference
            .accepted_query_variants
            .first()
            .cloned()
            .unwrap_or_default(),
    };
    let parsed = parse(&raw, &catalog);
    let candidate = CandidateResult::from_parse(key, raw, parsed, 1);
    let result = ComparisonResult::scored(candidate, &reference.dag);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
