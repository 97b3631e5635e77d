//! Agent output parsing and workflow normalization.
//!
//! Agents return free text that usually, but not always, contains a JSON
//! object shaped like:
//!
//! ```json
//! {
//!   "steps": [{"id": "s1", "tool": "load_document", "parameters": {}, "inputs": [], "outputs": ["text"]}],
//!   "flow": ["s1 -> s2"],
//!   "rationale": "..."
//! }
//! ```
//!
//! [`parse`] locates that object inside prose or markdown fences and turns it
//! into a [`WorkflowDag`]. Only three conditions reject the whole response:
//! no JSON at all, no `steps` array, or a cycle. Everything else is recorded
//! as a [`ParseIssue`] and the offending step is dropped or flagged.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::catalog::{ParameterProblem, ToolCatalog};
use crate::domain::candidate::{ParseFailure, ParseIssue};
use crate::domain::workflow::{Edge, ParamValue, WorkflowDag, WorkflowStep};

/// A successfully normalized candidate workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWorkflow {
    pub dag: WorkflowDag,
    pub issues: Vec<ParseIssue>,
    pub rationale: Option<String>,
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fence regex is valid")
    })
}

fn trailing_comma_regex() -> &'static Regex {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    TRAILING.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("trailing comma regex is valid"))
}

/// Top-level `{...}` spans, skipping braces inside JSON strings.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// Text spans worth trying as JSON, most specific first.
fn candidate_spans(raw: &str) -> Vec<&str> {
    let mut spans = vec![raw.trim()];
    for caps in fence_regex().captures_iter(raw) {
        if let Some(body) = caps.get(1) {
            spans.push(body.as_str().trim());
        }
    }
    spans.extend(balanced_objects(raw));
    spans
}

fn parse_lenient(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok().or_else(|| {
        let repaired = trailing_comma_regex().replace_all(text, "$1");
        serde_json::from_str(&repaired).ok()
    })
}

fn has_steps_array(obj: &Map<String, Value>) -> bool {
    obj.get("steps").is_some_and(Value::is_array)
}

/// The object carrying `steps`, looking one level into `workflow` if needed.
fn workflow_object(value: Value) -> Option<Map<String, Value>> {
    let Value::Object(mut outer) = value else {
        return None;
    };
    if has_steps_array(&outer) {
        return Some(outer);
    }
    match outer.remove("workflow") {
        Some(Value::Object(mut inner)) if has_steps_array(&inner) => {
            if !inner.contains_key("rationale") {
                if let Some(r) = outer.remove("rationale") {
                    inner.insert("rationale".to_string(), r);
                }
            }
            Some(inner)
        }
        _ => None,
    }
}

fn locate_workflow(raw: &str) -> Result<Map<String, Value>, ParseFailure> {
    let mut saw_json = false;
    for span in candidate_spans(raw) {
        let Some(value) = parse_lenient(span) else {
            continue;
        };
        if !(value.is_object() || value.is_array()) {
            continue;
        }
        saw_json = true;
        if let Some(obj) = workflow_object(value) {
            return Ok(obj);
        }
    }

    if saw_json {
        Err(ParseFailure::missing_steps(
            "response contains JSON but no `steps` array",
        ))
    } else {
        Err(ParseFailure::malformed("no JSON object found in response"))
    }
}

// ---------------------------------------------------------------------------
// Step normalization
// ---------------------------------------------------------------------------

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// An ordered, de-duplicated list of names from a string or array field.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_string).collect(),
        Some(v) => scalar_string(v).into_iter().collect(),
        None => Vec::new(),
    };
    let mut seen = HashSet::new();
    raw.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

fn tool_name(obj: &Map<String, Value>) -> Option<String> {
    ["tool", "tool_name", "name"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(scalar_string))
}

fn normalize_steps(
    items: &[Value],
    catalog: &ToolCatalog,
    issues: &mut Vec<ParseIssue>,
) -> Vec<WorkflowStep> {
    let mut steps = Vec::with_capacity(items.len());
    let mut ids = HashSet::new();

    for (index, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            issues.push(ParseIssue::MalformedStep {
                index,
                reason: "step is not a JSON object".to_string(),
            });
            continue;
        };

        let id = obj
            .get("id")
            .and_then(scalar_string)
            .unwrap_or_else(|| format!("step_{}", index + 1));

        let Some(tool) = tool_name(obj) else {
            issues.push(ParseIssue::MalformedStep {
                index,
                reason: format!("step {id} has no tool name"),
            });
            continue;
        };

        let Some(descriptor) = catalog.get(&tool) else {
            issues.push(ParseIssue::UnknownTool { step_id: id, tool });
            continue;
        };

        if !ids.insert(id.clone()) {
            issues.push(ParseIssue::DuplicateStepId { step_id: id });
            continue;
        }

        let mut parameters = BTreeMap::new();
        match obj.get("parameters").or_else(|| obj.get("params")) {
            Some(Value::Object(map)) => {
                for (name, value) in map {
                    parameters.insert(name.clone(), ParamValue::from_json(value.clone()));
                }
            }
            None | Some(Value::Null) => {}
            Some(_) => issues.push(ParseIssue::InvalidParameter {
                step_id: id.clone(),
                parameter: "*".to_string(),
                reason: "parameters must be a JSON object".to_string(),
            }),
        }

        for problem in descriptor.check_parameters(&parameters) {
            issues.push(match problem {
                ParameterProblem::Missing { parameter } => ParseIssue::MissingParameter {
                    step_id: id.clone(),
                    parameter,
                },
                ParameterProblem::Invalid { parameter, reason } => ParseIssue::InvalidParameter {
                    step_id: id.clone(),
                    parameter,
                    reason,
                },
            });
        }

        steps.push(WorkflowStep {
            id,
            tool,
            parameters,
            inputs: string_list(obj.get("inputs")),
            outputs: string_list(obj.get("outputs")),
        });
    }

    steps
}

fn flow_edges(value: Option<&Value>, issues: &mut Vec<ParseIssue>) -> Vec<Edge> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    let mut edges = Vec::new();
    for entry in entries {
        let parsed = match entry {
            Value::String(s) => Edge::parse_chain(s),
            Value::Object(obj) => match (
                obj.get("from").and_then(scalar_string),
                obj.get("to").and_then(scalar_string),
            ) {
                (Some(from), Some(to)) => Some(vec![Edge::new(from, to)]),
                _ => None,
            },
            _ => None,
        };
        match parsed {
            Some(list) => edges.extend(list),
            None => issues.push(ParseIssue::UnknownFlowStep {
                entry: entry.to_string(),
            }),
        }
    }
    edges
}

fn rationale(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("rationale")? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse raw agent text into a validated workflow against `catalog`.
///
/// Pure: no I/O beyond debug logging, no shared state.
pub fn parse(raw: &str, catalog: &ToolCatalog) -> Result<ParsedWorkflow, ParseFailure> {
    let obj = locate_workflow(raw).inspect_err(|failure| {
        debug!(kind = %failure.kind, "agent response rejected");
    })?;

    let items = obj
        .get("steps")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut issues = Vec::new();
    let steps = normalize_steps(items, catalog, &mut issues);

    if !items.is_empty() && steps.is_empty() {
        return Err(ParseFailure::missing_steps(format!(
            "none of the {} steps were usable",
            items.len()
        )));
    }

    let flow = flow_edges(obj.get("flow"), &mut issues);
    let assembly = WorkflowDag::assemble(steps, flow);

    for edge in assembly.rejected_flow {
        issues.push(ParseIssue::UnknownFlowStep {
            entry: edge.to_string(),
        });
    }
    for dangling in assembly.dangling {
        issues.push(ParseIssue::DanglingReference {
            step_id: dangling.step_id,
            reference: dangling.reference,
            ambiguous: dangling.ambiguous,
        });
    }

    if let Err(members) = assembly.dag.topological_order() {
        debug!(members = ?members, "agent workflow is cyclic");
        return Err(ParseFailure::cyclic(&members));
    }

    Ok(ParsedWorkflow {
        dag: assembly.dag,
        issues,
        rationale: rationale(&obj),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_objects_skips_braces_in_strings() {
        let text = r#"prose {"a": "}"} more {"b": {"c": 1}} tail {"#;
        let spans = balanced_objects(text);
        assert_eq!(spans, vec![r#"{"a": "}"}"#, r#"{"b": {"c": 1}}"#]);
    }

    #[test]
    fn test_fence_regex_captures_body() {
        let text = "Here:\n```json\n{\"steps\": []}\n```\nDone";
        let spans = candidate_spans(text);
        assert!(spans.contains(&"{\"steps\": []}"));
    }

    #[test]
    fn test_trailing_commas_are_repaired() {
        let v = parse_lenient(r#"{"steps": [1, 2,],}"#).unwrap();
        assert_eq!(v["steps"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_string_list_dedups_and_accepts_scalar() {
        let v = serde_json::json!(["a", "b", "a", 3]);
        assert_eq!(string_list(Some(&v)), vec!["a", "b", "3"]);
        let s = serde_json::json!("only");
        assert_eq!(string_list(Some(&s)), vec!["only"]);
    }

    #[test]
    fn test_workflow_object_unwraps_nested_workflow() {
        let v = serde_json::json!({"workflow": {"steps": []}, "rationale": "why"});
        let obj = workflow_object(v).unwrap();
        assert!(obj.contains_key("steps"));
        assert_eq!(obj["rationale"], "why");
    }
}
