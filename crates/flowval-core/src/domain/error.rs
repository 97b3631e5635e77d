//! Domain-level error taxonomy for flowval.
//!
//! Only configuration and startup problems are errors here. Per-tuple
//! failures (adapter timeouts, unparseable agent output) are data and live on
//! [`crate::domain::candidate::CandidateResult`].

/// Errors produced while loading or validating a tool catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("tool name must not be empty")]
    EmptyToolName,

    #[error("duplicate tool in catalog: {name}")]
    DuplicateTool { name: String },

    #[error("tool {tool} parameter {parameter}: default value violates its constraint: {reason}")]
    InvalidDefault {
        tool: String,
        parameter: String,
        reason: String,
    },

    #[error("tool {tool} parameter {parameter}: minimum {minimum} exceeds maximum {maximum}")]
    InvertedBounds {
        tool: String,
        parameter: String,
        minimum: f64,
        maximum: f64,
    },
}

/// Errors produced while loading reference workflows.
///
/// Any of these aborts a run before the first worker starts.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task id must not be empty")]
    EmptyTaskId,

    #[error("duplicate reference task: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("task {task_id}: step {step_id} uses unknown tool {tool}")]
    UnknownTool {
        task_id: String,
        step_id: String,
        tool: String,
    },

    #[error("task {task_id}: duplicate step id {step_id}")]
    DuplicateStep { task_id: String, step_id: String },

    #[error("task {task_id}: step {step_id} references unresolved output {reference}")]
    DanglingReference {
        task_id: String,
        step_id: String,
        reference: String,
    },

    #[error("task {task_id}: flow entry {entry:?} names an unknown step")]
    UnknownFlowStep { task_id: String, entry: String },

    #[error("task {task_id}: step {step_id} parameter {parameter}: {reason}")]
    InvalidParameter {
        task_id: String,
        step_id: String,
        parameter: String,
        reason: String,
    },

    #[error("task {task_id}: workflow contains a cycle through {members:?}")]
    Cyclic {
        task_id: String,
        members: Vec<String>,
    },

    #[error("reference task not found: {task_id}")]
    TaskNotFound { task_id: String },
}

/// flowval domain errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowvalError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid run: {0}")]
    InvalidRun(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for flowval domain operations.
pub type Result<T> = std::result::Result<T, FlowvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display_names_task_and_step() {
        let err = RegistryError::UnknownTool {
            task_id: "doc-pipeline".to_string(),
            step_id: "s2".to_string(),
            tool: "extract_tables".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("doc-pipeline"));
        assert!(msg.contains("s2"));
        assert!(msg.contains("extract_tables"));
    }

    #[test]
    fn test_catalog_error_wraps_into_flowval_error() {
        let err: FlowvalError = CatalogError::DuplicateTool {
            name: "load_document".to_string(),
        }
        .into();
        assert!(err.to_string().contains("catalog error"));
        assert!(err.to_string().contains("load_document"));
    }

    #[test]
    fn test_cycle_error_lists_members() {
        let err = RegistryError::Cyclic {
            task_id: "t".to_string(),
            members: vec!["a".to_string(), "b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("\"a\""));
        assert!(msg.contains("\"b\""));
    }
}
