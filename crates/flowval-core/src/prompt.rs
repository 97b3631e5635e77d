//! Agent instructions.

use std::fmt::Write as _;

use crate::domain::catalog::ToolDescriptor;

const RESPONSE_SHAPE: &str = r#"{
  "steps": [
    {"id": "s1", "tool": "<tool name>", "parameters": {"<name>": "<value or $output_ref>"}, "inputs": [], "outputs": ["<output name>"]}
  ],
  "flow": ["s1 -> s2"],
  "rationale": "<why these tools, in this order>"
}"#;

/// Render the instructions sent to an agent for one query.
///
/// Lists each tool with its parameters and declared outputs, then the JSON
/// shape the parser expects. Deterministic for a given input.
pub fn render_prompt(query: &str, tools: &[ToolDescriptor]) -> String {
    let mut out = String::new();
    out.push_str("You are planning a tool-call workflow. Do not execute any tool.\n\n");
    let _ = writeln!(out, "Task: {}\n", query.trim());
    out.push_str("Available tools:\n");

    if tools.is_empty() {
        out.push_str("- (none)\n");
    }
    for tool in tools {
        let _ = write!(out, "- {}", tool.name);
        if let Some(category) = &tool.category {
            let _ = write!(out, " [{category}]");
        }
        if !tool.description.is_empty() {
            let _ = write!(out, ": {}", tool.description);
        }
        out.push('\n');

        for (name, spec) in &tool.parameters {
            let _ = write!(
                out,
                "    - {name} ({}{})",
                spec.constraint.kind_name(),
                if spec.required { ", required" } else { "" }
            );
            if let Some(default) = &spec.default {
                let _ = write!(out, " default={default}");
            }
            if let Some(description) = &spec.description {
                let _ = write!(out, ": {description}");
            }
            out.push('\n');
        }
        if !tool.outputs.is_empty() {
            let _ = writeln!(out, "    outputs: {}", tool.outputs.join(", "));
        }
    }

    out.push_str(
        "\nReply with a single JSON object of this shape. Reference another step's \
         output through `inputs` or a parameter value of the form \"$name\"; the \
         graph must not contain cycles.\n",
    );
    out.push_str(RESPONSE_SHAPE);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{ParamConstraint, ParameterSpec};

    #[test]
    fn test_prompt_lists_tools_and_shape() {
        let tools = vec![ToolDescriptor::new("extract_entities", "Find named entities")
            .with_category("nlp")
            .with_parameter(
                "mode",
                ParameterSpec::required(ParamConstraint::String { allowed: None }),
            )
            .with_output("entities")];
        let prompt = render_prompt("  Extract people  ", &tools);
        assert!(prompt.contains("Task: Extract people\n"));
        assert!(prompt.contains("- extract_entities [nlp]: Find named entities"));
        assert!(prompt.contains("mode (string, required)"));
        assert!(prompt.contains("outputs: entities"));
        assert!(prompt.contains("\"steps\""));
    }

    #[test]
    fn test_prompt_without_tools() {
        assert!(render_prompt("q", &[]).contains("- (none)"));
    }
}
