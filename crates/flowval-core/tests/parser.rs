//! Agent response parsing against the fixture catalog.

use std::path::PathBuf;

use flowval_core::{parse, Edge, FailureKind, ParamValue, ParseIssue, ToolCatalog};
use serde_json::json;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn catalog() -> ToolCatalog {
    ToolCatalog::load(&fixtures().join("catalog.json")).expect("fixture catalog")
}

fn failure_kind(raw: &str) -> FailureKind {
    parse(raw, &catalog()).expect_err("parse should fail").kind
}

#[test]
fn test_json_inside_prose_and_fence() {
    let raw = r#"Sure! Here is my plan:

```json
{
  "steps": [
    {"id": "load", "tool": "load_document", "parameters": {"path": "a.pdf"}, "outputs": ["document_text"]},
    {"id": "extract", "tool": "extract_entities", "parameters": {"text": "$document_text"}, "outputs": ["entities"]}
  ],
  "flow": ["load -> extract"],
  "rationale": "load first"
}
```

Let me know if you need anything else."#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 2);
    assert!(parsed.dag.edges().contains(&Edge::new("load", "extract")));
    assert_eq!(parsed.rationale.as_deref(), Some("load first"));
    assert!(parsed.issues.is_empty(), "{:?}", parsed.issues);
    assert_eq!(
        parsed.dag.step("extract").expect("step").parameters["text"],
        ParamValue::Reference("document_text".to_string())
    );
}

#[test]
fn test_unfenced_object_after_prose() {
    let raw = r#"The workflow is {"steps": [{"id": "s1", "tool": "search_web", "parameters": {"query": "rust {braces}"}}]} and that is all."#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 1);
}

#[test]
fn test_no_json_is_malformed_output() {
    assert_eq!(
        failure_kind("I think you should use load_document and extract_entities"),
        FailureKind::MalformedOutput
    );
    assert_eq!(failure_kind(""), FailureKind::MalformedOutput);
    assert_eq!(failure_kind("{not json at all"), FailureKind::MalformedOutput);
}

#[test]
fn test_json_without_steps_is_missing_steps() {
    assert_eq!(
        failure_kind(r#"{"plan": ["load_document"]}"#),
        FailureKind::MissingSteps
    );
    assert_eq!(
        failure_kind(r#"{"steps": "load_document then extract"}"#),
        FailureKind::MissingSteps
    );
}

#[test]
fn test_all_steps_unusable_is_missing_steps() {
    let raw = r#"{"steps": [{"id": "a", "tool": "teleport"}, 42]}"#;
    assert_eq!(failure_kind(raw), FailureKind::MissingSteps);
}

#[test]
fn test_empty_steps_is_an_empty_workflow() {
    let parsed = parse(r#"{"steps": []}"#, &catalog()).expect("parse");
    assert!(parsed.dag.is_empty());
}

#[test]
fn test_unknown_tool_drops_only_that_step() {
    let raw = r#"{"steps": [
        {"id": "a", "tool": "load_document", "parameters": {"path": "x"}},
        {"id": "b", "tool": "teleport"}
    ], "flow": ["a -> b"]}"#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 1);
    assert!(parsed.issues.contains(&ParseIssue::UnknownTool {
        step_id: "b".to_string(),
        tool: "teleport".to_string(),
    }));
    assert!(parsed.issues.contains(&ParseIssue::UnknownFlowStep {
        entry: "a -> b".to_string(),
    }));
    assert!(parsed.dag.edges().is_empty());
}

#[test]
fn test_dangling_reference_keeps_step() {
    let raw = r#"{"steps": [
        {"id": "sum", "tool": "summarize_text", "parameters": {"text": "$document_text"}}
    ]}"#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 1);
    assert_eq!(
        parsed.issues,
        vec![ParseIssue::DanglingReference {
            step_id: "sum".to_string(),
            reference: "document_text".to_string(),
            ambiguous: false,
        }]
    );
}

#[test]
fn test_step_reading_its_own_output_is_dangling_not_cyclic() {
    let raw = r#"{"steps": [
        {"id": "load", "tool": "load_document", "parameters": {"path": "a.pdf"}, "outputs": ["document_text"]},
        {"id": "clean", "tool": "summarize_text", "parameters": {"text": "$document_text"},
         "inputs": ["document_text", "summary"], "outputs": ["summary"]}
    ]}"#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 2);
    assert_eq!(parsed.dag.flow_strings(), vec!["load -> clean"]);
    assert_eq!(
        parsed.issues,
        vec![ParseIssue::DanglingReference {
            step_id: "clean".to_string(),
            reference: "summary".to_string(),
            ambiguous: false,
        }]
    );
}

#[test]
fn test_explicit_self_flow_is_cyclic() {
    let raw = r#"{"steps": [
        {"id": "a", "tool": "search_web", "parameters": {"query": "q"}}
    ], "flow": ["a -> a"]}"#;
    assert_eq!(failure_kind(raw), FailureKind::CyclicWorkflow);
}

#[test]
fn test_cycle_is_rejected() {
    let raw = r#"{"steps": [
        {"id": "a", "tool": "summarize_text", "parameters": {"text": "$translation"}, "outputs": ["summary"]},
        {"id": "b", "tool": "translate_text", "parameters": {"text": "$summary", "target_language": "de"}, "outputs": ["translation"]}
    ]}"#;
    assert_eq!(failure_kind(raw), FailureKind::CyclicWorkflow);
}

#[test]
fn test_explicit_flow_cycle_is_rejected() {
    let raw = r#"{"steps": [
        {"id": "a", "tool": "search_web", "parameters": {"query": "q"}},
        {"id": "b", "tool": "export_report", "parameters": {"content": "c"}}
    ], "flow": ["a -> b -> a"]}"#;
    assert_eq!(failure_kind(raw), FailureKind::CyclicWorkflow);
}

#[test]
fn test_parameter_problems_are_flagged_not_fatal() {
    let raw = r#"{"steps": [
        {"id": "t", "tool": "translate_text", "parameters": {"text": "hello", "target_language": "klingon"}},
        {"id": "l", "tool": "load_document", "params": {}}
    ]}"#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 2);
    assert!(parsed.issues.iter().any(|i| matches!(
        i,
        ParseIssue::InvalidParameter { step_id, parameter, .. }
            if step_id == "t" && parameter == "target_language"
    )));
    assert!(parsed.issues.contains(&ParseIssue::MissingParameter {
        step_id: "l".to_string(),
        parameter: "path".to_string(),
    }));
}

#[test]
fn test_tolerant_field_names_and_defaults() {
    let raw = r#"{"workflow": {"steps": [
        {"tool_name": "load_document", "params": {"path": "x"}, "outputs": "document_text"},
        {"name": "summarize_text", "inputs": ["document_text"], "params": {"text": "$document_text"}}
    ], "flow": [{"from": "step_1", "to": "step_2"}]}, "rationale": 7}"#;
    let parsed = parse(raw, &catalog()).expect("parse");
    let ids: Vec<&str> = parsed.dag.steps().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["step_1", "step_2"]);
    assert_eq!(parsed.dag.steps()[0].outputs, vec!["document_text".to_string()]);
    assert!(parsed.dag.edges().contains(&Edge::new("step_1", "step_2")));
    assert_eq!(parsed.rationale.as_deref(), Some("7"));
}

#[test]
fn test_duplicate_ids_keep_the_first_step() {
    let raw = r#"{"steps": [
        {"id": "a", "tool": "load_document", "parameters": {"path": "first"}},
        {"id": "a", "tool": "load_document", "parameters": {"path": "second"}}
    ]}"#;
    let parsed = parse(raw, &catalog()).expect("parse");
    assert_eq!(parsed.dag.len(), 1);
    assert_eq!(
        parsed.dag.steps()[0].parameters["path"].to_json(),
        json!("first")
    );
    assert!(parsed.issues.contains(&ParseIssue::DuplicateStepId {
        step_id: "a".to_string()
    }));
}

#[test]
fn test_trailing_commas_are_tolerated() {
    let raw = r#"{"steps": [{"id": "a", "tool": "search_web", "parameters": {"query": "q",},},],}"#;
    assert_eq!(parse(raw, &catalog()).expect("parse").dag.len(), 1);
}

#[test]
fn test_parse_is_pure() {
    let raw = r#"{"steps": [{"id": "a", "tool": "search_web", "parameters": {"query": "q"}}]}"#;
    let catalog = catalog();
    assert_eq!(parse(raw, &catalog), parse(raw, &catalog));
}
