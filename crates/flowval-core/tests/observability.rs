//! Run lifecycle events reach a subscriber with their `event` fields.

use std::io::Write;
use std::sync::{Arc, Mutex};

use flowval_core::{
    run_suite, AgentAdapter, CatalogStrategy, HeuristicAdapter, OrchestratorConfig,
    ReferenceRegistry, RunContext, TaskDefinition, TestPlan, ToolCatalog, ToolDescriptor,
    ToolStrategy, WorkflowStep,
};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn test_run_emits_lifecycle_events() {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(captured.clone())
        .with_max_level(tracing::Level::INFO)
        .finish();

    let catalog =
        ToolCatalog::new(vec![ToolDescriptor::new("load_document", "Load").with_output("document_text")])
            .expect("catalog");
    let registry = ReferenceRegistry::from_definitions(
        vec![TaskDefinition {
            task_id: "load".to_string(),
            description: "Load the document".to_string(),
            query_variants: Vec::new(),
            steps: vec![WorkflowStep::new("s1", "load_document").with_output("document_text")],
            flow: Vec::new(),
        }],
        &catalog,
    )
    .expect("registry");
    let plan = TestPlan::from_registry(&registry);
    let ctx = RunContext::new(
        Arc::new(catalog),
        Arc::new(registry),
        OrchestratorConfig::default(),
    )
    .with_run_id("obs-run");

    let agents: Vec<Arc<dyn AgentAdapter>> = vec![Arc::new(HeuristicAdapter::new("heuristic"))];
    let strategies: Vec<Arc<dyn CatalogStrategy>> = vec![Arc::new(ToolStrategy::full_exposure())];

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let report = tracing::subscriber::with_default(subscriber, || {
        runtime.block_on(run_suite(&ctx, &agents, &strategies, &plan))
    })
    .expect("run");
    assert_eq!(report.summary.scored, 1);

    let logs = captured.text();
    for event in ["run.started", "tuple.finished", "run.finished"] {
        assert!(logs.contains(event), "missing {event} in {logs}");
    }
    assert!(logs.contains("obs-run"));
    assert!(logs.contains("\"metric\":\"flush\""));
}
