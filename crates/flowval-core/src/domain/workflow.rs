//! Tool-call workflow graphs.
//!
//! A [`WorkflowDag`] is a list of [`WorkflowStep`]s (insertion order kept for
//! display) plus the edge set derived from matching each step's input
//! references against other steps' outputs. An edge `a -> b` means "b consumes
//! something a produces", so `a` must run first.
//!
//! Reference resolution, first match wins:
//! 1. `step_id.output` where `step_id` names a step
//! 2. a bare output name declared by exactly one step
//! 3. a bare step id
//!
//! Anything else is dangling. Dangling references are recorded, never fatal.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A parameter value: either a literal or a reference to another step's output.
///
/// In JSON a reference is written as a string starting with `$` followed by an
/// identifier character, e.g. `"$document_text"`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    Reference(String),
}

impl ParamValue {
    pub fn from_json(value: Value) -> Self {
        if let Value::String(s) = &value {
            if let Some(rest) = s.strip_prefix('$') {
                if rest
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                {
                    return Self::Reference(rest.to_string());
                }
            }
        }
        Self::Literal(value)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Reference(r) => Value::String(format!("${r}")),
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Reference(r) => Some(r),
            Self::Literal(_) => None,
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}

/// One tool invocation in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub parameters: std::collections::BTreeMap<String, ParamValue>,
    /// References to outputs of other steps, in declaration order.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Named outputs this step produces.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            parameters: Default::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters
            .insert(name.into(), ParamValue::from_json(value));
        self
    }

    pub fn with_input(mut self, reference: impl Into<String>) -> Self {
        self.inputs.push(reference.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    /// Every reference this step consumes: inputs first, then parameter references.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .map(String::as_str)
            .chain(self.parameters.values().filter_map(ParamValue::reference))
    }
}

/// Directed dependency `from -> to` between two step ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parse a flow entry such as `"a -> b"` or a chain `"a -> b -> c"`.
    ///
    /// Returns `None` when fewer than two non-empty step ids are present.
    pub fn parse_chain(entry: &str) -> Option<Vec<Edge>> {
        let normalized = entry.replace('→', "->");
        let ids: Vec<&str> = normalized.split("->").map(str::trim).collect();
        if ids.len() < 2 || ids.iter().any(|id| id.is_empty()) {
            return None;
        }
        Some(ids.windows(2).map(|w| Edge::new(w[0], w[1])).collect())
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

impl Serialize for Edge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A reference that did not resolve to a producing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingRef {
    pub step_id: String,
    pub reference: String,
    /// True when several steps produce an output of this name.
    pub ambiguous: bool,
}

/// Reference counts over a DAG, used by the dependency-correctness metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceStats {
    pub total: usize,
    pub dangling: usize,
}

struct Resolution {
    edges: BTreeSet<Edge>,
    dangling: Vec<DanglingRef>,
    total: usize,
}

fn resolve(steps: &[WorkflowStep]) -> Resolution {
    let mut ids: HashMap<&str, usize> = HashMap::new();
    let mut producers: HashMap<&str, Vec<&str>> = HashMap::new();
    for (pos, step) in steps.iter().enumerate() {
        ids.entry(step.id.as_str()).or_insert(pos);
        for output in &step.outputs {
            let list = producers.entry(output.as_str()).or_default();
            if !list.contains(&step.id.as_str()) {
                list.push(step.id.as_str());
            }
        }
    }

    let mut edges = BTreeSet::new();
    let mut dangling = Vec::new();
    let mut total = 0;

    for step in steps {
        for reference in step.references() {
            total += 1;
            let reference = reference.trim();

            // A step never feeds itself through a reference.
            let qualified = reference
                .split_once('.')
                .filter(|(sid, _)| *sid != step.id && ids.contains_key(sid))
                .map(|(sid, _)| sid);
            if let Some(producer) = qualified {
                edges.insert(Edge::new(producer, step.id.as_str()));
                continue;
            }

            let others: Vec<&str> = producers
                .get(reference)
                .map(|list| {
                    list.iter()
                        .copied()
                        .filter(|p| *p != step.id)
                        .collect()
                })
                .unwrap_or_default();
            match others.as_slice() {
                [producer] => {
                    edges.insert(Edge::new(*producer, step.id.as_str()));
                    continue;
                }
                many if many.len() > 1 => {
                    dangling.push(DanglingRef {
                        step_id: step.id.clone(),
                        reference: reference.to_string(),
                        ambiguous: true,
                    });
                    continue;
                }
                _ => {}
            }

            if reference != step.id && ids.contains_key(reference) {
                edges.insert(Edge::new(reference, step.id.as_str()));
                continue;
            }

            dangling.push(DanglingRef {
                step_id: step.id.clone(),
                reference: reference.to_string(),
                ambiguous: false,
            });
        }
    }

    Resolution {
        edges,
        dangling,
        total,
    }
}

/// Output of [`WorkflowDag::assemble`].
#[derive(Debug, Clone)]
pub struct Assembly {
    pub dag: WorkflowDag,
    /// Explicit flow edges dropped because an endpoint is not a step.
    pub rejected_flow: Vec<Edge>,
    pub dangling: Vec<DanglingRef>,
}

/// A partially-ordered tool-call workflow.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WorkflowDag {
    steps: Vec<WorkflowStep>,
    edges: BTreeSet<Edge>,
}

impl WorkflowDag {
    /// Build a DAG from steps and explicit flow edges.
    ///
    /// Step ids are expected to be unique; with duplicates the first step
    /// owns the id. Acyclicity is not checked here, see
    /// [`WorkflowDag::topological_order`].
    pub fn assemble(steps: Vec<WorkflowStep>, flow: impl IntoIterator<Item = Edge>) -> Assembly {
        let Resolution {
            mut edges,
            dangling,
            ..
        } = resolve(&steps);

        let mut rejected_flow = Vec::new();
        for edge in flow {
            let known = |id: &str| steps.iter().any(|s| s.id == id);
            if known(&edge.from) && known(&edge.to) {
                edges.insert(edge);
            } else {
                rejected_flow.push(edge);
            }
        }

        Assembly {
            dag: Self { steps, edges },
            rejected_flow,
            dangling,
        }
    }

    /// Shorthand for [`WorkflowDag::assemble`] when the extras are not needed.
    pub fn new(steps: Vec<WorkflowStep>, flow: impl IntoIterator<Item = Edge>) -> Self {
        Self::assemble(steps, flow).dag
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct tool names used by the workflow.
    pub fn tool_names(&self) -> BTreeSet<&str> {
        self.steps.iter().map(|s| s.tool.as_str()).collect()
    }

    /// Distinct output names declared by any step.
    pub fn output_names(&self) -> BTreeSet<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.outputs.iter().map(String::as_str))
            .collect()
    }

    /// Edges rendered as `"a -> b"`, in sorted order.
    pub fn flow_strings(&self) -> Vec<String> {
        self.edges.iter().map(ToString::to_string).collect()
    }

    /// Recount references against this DAG's own steps.
    pub fn reference_stats(&self) -> ReferenceStats {
        let resolution = resolve(&self.steps);
        ReferenceStats {
            total: resolution.total,
            dangling: resolution.dangling.len(),
        }
    }

    /// Dangling references in this DAG.
    pub fn dangling_references(&self) -> Vec<DanglingRef> {
        resolve(&self.steps).dangling
    }

    /// Step ids in dependency order (Kahn's algorithm).
    ///
    /// Ties are broken by insertion order so the result is deterministic.
    /// On a cycle, returns the ids that could not be ordered (the cycle
    /// members and everything downstream of them), in insertion order.
    pub fn topological_order(&self) -> Result<Vec<String>, Vec<String>> {
        let position: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.steps.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) =
                (position.get(edge.from.as_str()), position.get(edge.to.as_str()))
            {
                downstream[from].push(to);
                in_degree[to] += 1;
            }
        }
        for list in &mut downstream {
            list.sort_unstable();
        }

        let mut queue: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut ordered = Vec::with_capacity(self.steps.len());

        while let Some(node) = queue.pop_front() {
            ordered.push(node);
            for &next in &downstream[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if ordered.len() != self.steps.len() {
            let stuck = (0..self.steps.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.steps[i].id.clone())
                .collect();
            return Err(stuck);
        }

        Ok(ordered
            .into_iter()
            .map(|i| self.steps[i].id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> WorkflowDag {
        WorkflowDag::new(
            vec![
                WorkflowStep::new("a", "load").with_output("document_text"),
                WorkflowStep::new("b", "extract")
                    .with_input("document_text")
                    .with_output("entities"),
                WorkflowStep::new("c", "build").with_input("b.entities"),
            ],
            [],
        )
    }

    #[test]
    fn test_edges_derived_from_outputs() {
        let dag = chain();
        assert_eq!(dag.flow_strings(), vec!["a -> b", "b -> c"]);
        assert_eq!(
            dag.reference_stats(),
            ReferenceStats {
                total: 2,
                dangling: 0
            }
        );
    }

    #[test]
    fn test_topological_order_follows_edges() {
        let order = chain().topological_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_step_id_reference_resolves() {
        let dag = WorkflowDag::new(
            vec![
                WorkflowStep::new("load", "load_document"),
                WorkflowStep::new("parse", "parse_text").with_input("load"),
            ],
            [],
        );
        assert!(dag.edges().contains(&Edge::new("load", "parse")));
    }

    #[test]
    fn test_parameter_reference_creates_edge() {
        let dag = WorkflowDag::new(
            vec![
                WorkflowStep::new("a", "load").with_output("text"),
                WorkflowStep::new("b", "summarize").with_param("source", json!("$text")),
            ],
            [],
        );
        assert!(dag.edges().contains(&Edge::new("a", "b")));
    }

    #[test]
    fn test_ambiguous_output_is_dangling() {
        let dag = WorkflowDag::new(
            vec![
                WorkflowStep::new("a", "load").with_output("text"),
                WorkflowStep::new("b", "load").with_output("text"),
                WorkflowStep::new("c", "merge").with_input("text"),
            ],
            [],
        );
        let dangling = dag.dangling_references();
        assert_eq!(dangling.len(), 1);
        assert!(dangling[0].ambiguous);
    }

    #[test]
    fn test_own_output_reference_is_dangling() {
        let dag = WorkflowDag::new(
            vec![
                WorkflowStep::new("load", "load").with_output("text"),
                WorkflowStep::new("clean", "clean")
                    .with_input("text")
                    .with_input("clean_out")
                    .with_input("clean.clean_out")
                    .with_input("clean")
                    .with_output("clean_out"),
            ],
            [],
        );
        assert_eq!(dag.flow_strings(), vec!["load -> clean"]);
        assert_eq!(dag.dangling_references().len(), 3);
        assert!(dag.topological_order().is_ok());
    }

    #[test]
    fn test_explicit_self_flow_is_cycle() {
        let dag = WorkflowDag::new(
            vec![WorkflowStep::new("a", "load")],
            [Edge::new("a", "a")],
        );
        assert!(dag.topological_order().is_err());
    }

    #[test]
    fn test_cycle_reports_members() {
        let dag = WorkflowDag::new(
            vec![
                WorkflowStep::new("a", "x").with_input("b_out").with_output("a_out"),
                WorkflowStep::new("b", "y").with_input("a_out").with_output("b_out"),
                WorkflowStep::new("c", "z"),
            ],
            [],
        );
        let members = dag.topological_order().unwrap_err();
        assert_eq!(members, vec!["a", "b"]);
    }

    #[test]
    fn test_flow_edges_with_unknown_steps_are_rejected() {
        let assembly = WorkflowDag::assemble(
            vec![WorkflowStep::new("a", "x"), WorkflowStep::new("b", "y")],
            vec![Edge::new("a", "b"), Edge::new("b", "ghost")],
        );
        assert_eq!(assembly.dag.edges().len(), 1);
        assert_eq!(assembly.rejected_flow, vec![Edge::new("b", "ghost")]);
    }

    #[test]
    fn test_parse_chain() {
        let edges = Edge::parse_chain("a -> b → c").unwrap();
        assert_eq!(edges, vec![Edge::new("a", "b"), Edge::new("b", "c")]);
        assert!(Edge::parse_chain("a").is_none());
        assert!(Edge::parse_chain("a -> ").is_none());
    }

    #[test]
    fn test_param_value_reference_syntax() {
        assert_eq!(
            ParamValue::from_json(json!("$entities")),
            ParamValue::Reference("entities".to_string())
        );
        assert_eq!(
            ParamValue::from_json(json!("$100")),
            ParamValue::Literal(json!("$100"))
        );
        assert_eq!(
            ParamValue::Reference("x".to_string()).to_json(),
            json!("$x")
        );
    }
}
