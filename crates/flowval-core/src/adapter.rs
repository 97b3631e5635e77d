//! Agent adapter boundary.
//!
//! An [`AgentAdapter`] turns a query plus a tool list into raw text. The
//! engine never trusts that text; it goes straight to [`crate::parser`].
//! Timeouts and the optional single retry live in [`invoke_with_policy`],
//! outside every adapter.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::catalog::{ParamConstraint, ToolDescriptor};
use crate::domain::error::{FlowvalError, Result};

/// What an adapter is asked to do for one tuple.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// The natural-language task.
    pub query: String,
    /// Fully rendered instructions, see [`crate::prompt::render_prompt`].
    pub prompt: String,
    /// The strategy's view of the catalog.
    pub tools: Vec<ToolDescriptor>,
    pub timeout_ms: u64,
}

/// Failure at the agent boundary. Always recorded, never escalated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("agent timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The agent cannot answer this request at all; retrying will not help.
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("agent backend error: {0}")]
    Backend(String),
}

impl AdapterError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}

/// Contract for agents under test.
#[async_trait]
pub trait AgentAdapter: Send + Sync + 'static {
    /// Stable identifier used as the report's agent key.
    fn id(&self) -> &str;

    async fn invoke(&self, request: &AgentRequest) -> std::result::Result<String, AdapterError>;
}

/// Timeout and retry bounds around a single adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationPolicy {
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl InvocationPolicy {
    /// Upper bound on retries regardless of configuration.
    pub const RETRY_CAP: u32 = 1;

    pub fn new(timeout_ms: u64, max_retries: u32) -> Self {
        Self {
            timeout_ms,
            max_retries: max_retries.min(Self::RETRY_CAP),
        }
    }
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self::new(30_000, 0)
    }
}

/// Result of [`invoke_with_policy`].
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub outcome: std::result::Result<String, AdapterError>,
    /// Attempts spent, at least 1.
    pub attempts: u32,
}

/// Call `adapter` under `policy`.
///
/// Each attempt is wrapped in `tokio::time::timeout`; on expiry the adapter
/// future is dropped, which cancels whatever it had in flight.
pub async fn invoke_with_policy(
    adapter: &dyn AgentAdapter,
    request: &AgentRequest,
    policy: &InvocationPolicy,
) -> Invocation {
    let max_retries = policy.max_retries.min(InvocationPolicy::RETRY_CAP);
    let timeout = tokio::time::Duration::from_millis(policy.timeout_ms);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let outcome = match tokio::time::timeout(timeout, adapter.invoke(request)).await {
            Err(_) => Err(AdapterError::Timeout {
                timeout_ms: policy.timeout_ms,
            }),
            Ok(result) => result,
        };

        match outcome {
            Err(err) if err.is_retryable() && attempts <= max_retries => {
                tracing::debug!(
                    agent = adapter.id(),
                    attempt = attempts,
                    error = %err,
                    "retrying agent call"
                );
                continue;
            }
            outcome => return Invocation { outcome, attempts },
        }
    }
}

// ---------------------------------------------------------------------------
// Heuristic agent
// ---------------------------------------------------------------------------

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn related(a: &str, b: &str) -> bool {
    let shorter = a.len().min(b.len());
    (shorter >= 4 && (a.starts_with(b) || b.starts_with(a))) || (shorter >= 3 && a == b)
}

/// A plausible literal for a parameter the agent must supply.
fn placeholder(constraint: &ParamConstraint, query: &str) -> Value {
    match constraint {
        ParamConstraint::String { allowed: Some(allowed) } if !allowed.is_empty() => {
            json!(allowed[0])
        }
        ParamConstraint::String { .. } => json!(query),
        ParamConstraint::Number { minimum, maximum } => {
            let v = minimum.unwrap_or(1.0);
            json!(maximum.map_or(v, |m| v.min(m)))
        }
        ParamConstraint::Integer { minimum, maximum } => {
            let v = minimum.unwrap_or(1);
            json!(maximum.map_or(v, |m| v.min(m)))
        }
        ParamConstraint::Boolean => json!(false),
        ParamConstraint::StringArray => json!([]),
        ParamConstraint::Object => json!({}),
    }
}

/// Rule-based agent that needs no model or API key.
///
/// Picks every tool whose name shares a word stem with the query, keeps
/// catalog order, and chains each step to the previous step's first output.
#[derive(Debug, Clone)]
pub struct HeuristicAdapter {
    id: String,
}

impl HeuristicAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Build the workflow JSON this agent answers with.
    pub fn plan(&self, query: &str, tools: &[ToolDescriptor]) -> Value {
        let query_words = words(query);
        let picked: Vec<&ToolDescriptor> = tools
            .iter()
            .filter(|tool| {
                words(&tool.name.replace('_', " "))
                    .iter()
                    .any(|t| query_words.iter().any(|w| related(t, w)))
            })
            .collect();

        let mut steps = Vec::with_capacity(picked.len());
        let mut flow = Vec::new();
        let mut previous: Option<(String, String)> = None;

        for (i, tool) in picked.iter().enumerate() {
            let id = format!("s{}", i + 1);
            let output = tool
                .outputs
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{}_output", tool.name));

            let mut parameters = serde_json::Map::new();
            for (name, spec) in &tool.parameters {
                if let Some(default) = &spec.default {
                    parameters.insert(name.clone(), default.clone());
                } else if spec.required {
                    parameters.insert(name.clone(), placeholder(&spec.constraint, query));
                }
            }

            let inputs: Vec<String> = previous.iter().map(|(_, out)| out.clone()).collect();
            if let Some((prev_id, _)) = &previous {
                flow.push(format!("{prev_id} -> {id}"));
            }

            steps.push(json!({
                "id": id,
                "tool": tool.name,
                "parameters": parameters,
                "inputs": inputs,
                "outputs": [output],
            }));
            previous = Some((id, output));
        }

        let rationale = if steps.is_empty() {
            "no catalog tool matched the query".to_string()
        } else {
            format!("matched {} tool(s) by name against the query", steps.len())
        };
        json!({ "steps": steps, "flow": flow, "rationale": rationale })
    }
}

#[async_trait]
impl AgentAdapter for HeuristicAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, request: &AgentRequest) -> std::result::Result<String, AdapterError> {
        let plan = self.plan(&request.query, &request.tools);
        let body = serde_json::to_string_pretty(&plan)
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(format!("Proposed workflow:\n\n```json\n{body}\n```\n"))
    }
}

// ---------------------------------------------------------------------------
// Replay agent
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RecordedResponse {
    query: String,
    response: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
    Map { responses: HashMap<String, String> },
    List { responses: Vec<RecordedResponse> },
}

/// Serves previously recorded raw responses, keyed by query text.
///
/// Lets historical transcripts be re-scored without calling the agent again.
#[derive(Debug, Clone)]
pub struct ReplayAdapter {
    id: String,
    responses: HashMap<String, String>,
}

impl ReplayAdapter {
    pub fn new(id: impl Into<String>, responses: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            responses: responses
                .into_iter()
                .map(|(q, r)| (q.trim().to_string(), r))
                .collect(),
        }
    }

    /// Parse `{"responses": {query: text}}` or `{"responses": [{query, response}]}`.
    pub fn from_json_str(id: impl Into<String>, raw: &str) -> Result<Self> {
        let responses = match serde_json::from_str::<ReplayFile>(raw)? {
            ReplayFile::Map { responses } => responses,
            ReplayFile::List { responses } => responses
                .into_iter()
                .map(|r| (r.query, r.response))
                .collect(),
        };
        Ok(Self::new(id, responses))
    }

    pub fn load(id: impl Into<String>, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlowvalError::Config(format!("read replay log {}: {e}", path.display()))
        })?;
        Self::from_json_str(id, &raw)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[async_trait]
impl AgentAdapter for ReplayAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, request: &AgentRequest) -> std::result::Result<String, AdapterError> {
        self.responses
            .get(request.query.trim())
            .cloned()
            .ok_or_else(|| {
                AdapterError::Unavailable(format!("no recorded response for {:?}", request.query))
            })
    }
}
