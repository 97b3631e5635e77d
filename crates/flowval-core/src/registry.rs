//! Reference workflow registry.
//!
//! Expert-authored ground-truth DAGs keyed by task id. Everything is
//! validated against the tool catalog at load time; a bad reference aborts
//! the run before any agent is called.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::catalog::{ParameterProblem, ToolCatalog};
use crate::domain::error::{FlowvalError, RegistryError, Result};
use crate::domain::workflow::{Edge, WorkflowDag, WorkflowStep};

/// One task as written in a registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub query_variants: Vec<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub flow: Vec<String>,
}

#[derive(Deserialize)]
struct RegistryFile {
    tasks: Vec<TaskDefinition>,
}

/// A validated ground-truth workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceWorkflow {
    pub task_id: String,
    pub description: String,
    pub dag: WorkflowDag,
    /// Natural-language phrasings that should yield this workflow.
    pub accepted_query_variants: Vec<String>,
}

fn query_variants(def: &TaskDefinition) -> Vec<String> {
    let mut seen = HashSet::new();
    let variants: Vec<String> = def
        .query_variants
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && seen.insert(q.clone()))
        .collect();
    if !variants.is_empty() {
        return variants;
    }
    let fallback = def.description.trim();
    if fallback.is_empty() {
        vec![def.task_id.clone()]
    } else {
        vec![fallback.to_string()]
    }
}

fn check_steps(
    task_id: &str,
    steps: &[WorkflowStep],
    catalog: &ToolCatalog,
) -> std::result::Result<(), RegistryError> {
    let mut ids = HashSet::new();
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(RegistryError::DuplicateStep {
                task_id: task_id.to_string(),
                step_id: step.id.clone(),
            });
        }
        let descriptor = catalog
            .get(&step.tool)
            .ok_or_else(|| RegistryError::UnknownTool {
                task_id: task_id.to_string(),
                step_id: step.id.clone(),
                tool: step.tool.clone(),
            })?;
        let problems = descriptor.check_parameters(&step.parameters);
        if let Some(problem) = problems.into_iter().next() {
            let (parameter, reason) = match problem {
                ParameterProblem::Missing { parameter } => {
                    (parameter, "required parameter is missing".to_string())
                }
                ParameterProblem::Invalid { parameter, reason } => (parameter, reason),
            };
            return Err(RegistryError::InvalidParameter {
                task_id: task_id.to_string(),
                step_id: step.id.clone(),
                parameter,
                reason,
            });
        }
    }
    Ok(())
}

fn build_reference(
    def: TaskDefinition,
    catalog: &ToolCatalog,
) -> std::result::Result<ReferenceWorkflow, RegistryError> {
    let task_id = def.task_id.trim().to_string();
    if task_id.is_empty() {
        return Err(RegistryError::EmptyTaskId);
    }
    check_steps(&task_id, &def.steps, catalog)?;

    let mut flow = Vec::new();
    for entry in &def.flow {
        let edges = Edge::parse_chain(entry).ok_or_else(|| RegistryError::UnknownFlowStep {
            task_id: task_id.clone(),
            entry: entry.clone(),
        })?;
        flow.extend(edges);
    }

    let accepted_query_variants = query_variants(&def);
    let assembly = WorkflowDag::assemble(def.steps, flow);

    if let Some(edge) = assembly.rejected_flow.first() {
        return Err(RegistryError::UnknownFlowStep {
            task_id,
            entry: edge.to_string(),
        });
    }
    if let Some(dangling) = assembly.dangling.into_iter().next() {
        return Err(RegistryError::DanglingReference {
            task_id,
            step_id: dangling.step_id,
            reference: dangling.reference,
        });
    }
    if let Err(members) = assembly.dag.topological_order() {
        return Err(RegistryError::Cyclic { task_id, members });
    }

    Ok(ReferenceWorkflow {
        task_id,
        description: def.description.trim().to_string(),
        dag: assembly.dag,
        accepted_query_variants,
    })
}

/// Validated reference workflows, ordered by task id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceRegistry {
    tasks: BTreeMap<String, ReferenceWorkflow>,
}

impl ReferenceRegistry {
    /// Validate task definitions against `catalog`.
    pub fn from_definitions(
        definitions: Vec<TaskDefinition>,
        catalog: &ToolCatalog,
    ) -> std::result::Result<Self, RegistryError> {
        let mut tasks = BTreeMap::new();
        for def in definitions {
            let reference = build_reference(def, catalog)?;
            if tasks.contains_key(&reference.task_id) {
                return Err(RegistryError::DuplicateTask {
                    task_id: reference.task_id,
                });
            }
            tasks.insert(reference.task_id.clone(), reference);
        }
        Ok(Self { tasks })
    }

    /// Parse `{"tasks": [...]}` and validate it.
    pub fn from_json_str(raw: &str, catalog: &ToolCatalog) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        Ok(Self::from_definitions(file.tasks, catalog)?)
    }

    pub fn load(path: &Path, catalog: &ToolCatalog) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlowvalError::Config(format!("read registry {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw, catalog)
    }

    pub fn get(&self, task_id: &str) -> Option<&ReferenceWorkflow> {
        self.tasks.get(task_id)
    }

    /// Like [`ReferenceRegistry::get`] but with a typed error.
    pub fn require(
        &self,
        task_id: &str,
    ) -> std::result::Result<&ReferenceWorkflow, RegistryError> {
        self.get(task_id).ok_or_else(|| RegistryError::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    /// The task accepting `query` as one of its variants (case-insensitive).
    pub fn task_for_query(&self, query: &str) -> Option<&ReferenceWorkflow> {
        let query = query.trim();
        self.tasks.values().find(|task| {
            task.accepted_query_variants
                .iter()
                .any(|v| v.eq_ignore_ascii_case(query))
        })
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ReferenceWorkflow> {
        self.tasks.values()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::ToolDescriptor;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            ToolDescriptor::new("load", "Load"),
            ToolDescriptor::new("extract", "Extract"),
        ])
        .unwrap()
    }

    fn def(task_id: &str, steps: Vec<WorkflowStep>) -> TaskDefinition {
        TaskDefinition {
            task_id: task_id.to_string(),
            description: "Load then extract".to_string(),
            query_variants: Vec::new(),
            steps,
            flow: Vec::new(),
        }
    }

    #[test]
    fn test_variants_fall_back_to_description() {
        let reg = ReferenceRegistry::from_definitions(
            vec![def("t", vec![WorkflowStep::new("a", "load")])],
            &catalog(),
        )
        .unwrap();
        assert_eq!(
            reg.get("t").unwrap().accepted_query_variants,
            vec!["Load then extract"]
        );
    }

    #[test]
    fn test_variants_are_deduplicated_in_order() {
        let mut d = def("t", vec![WorkflowStep::new("a", "load")]);
        d.query_variants = vec!["b".into(), " a ".into(), "b".into(), "".into()];
        assert_eq!(query_variants(&d), vec!["b", "a"]);
    }

    #[test]
    fn test_unknown_flow_step_is_rejected() {
        let mut d = def("t", vec![WorkflowStep::new("a", "load")]);
        d.flow = vec!["a -> ghost".to_string()];
        let err = ReferenceRegistry::from_definitions(vec![d], &catalog()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownFlowStep { .. }));
    }

    #[test]
    fn test_duplicate_step_is_rejected() {
        let d = def(
            "t",
            vec![WorkflowStep::new("a", "load"), WorkflowStep::new("a", "extract")],
        );
        let err = ReferenceRegistry::from_definitions(vec![d], &catalog()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateStep { .. }));
    }
}
