//! Domain models for flowval.
//!
//! Canonical definitions for the core entities:
//! - `ToolCatalog` / `ToolDescriptor`: the tools an agent may plan with
//! - `WorkflowDag` / `WorkflowStep`: a tool-call plan and its dependency edges
//! - `CandidateResult`: what one agent produced for one test tuple

pub mod candidate;
pub mod catalog;
pub mod digest;
pub mod error;
pub mod workflow;

pub use candidate::{CandidateResult, FailureKind, ParseFailure, ParseIssue, TupleKey};
pub use catalog::{
    ConstraintViolation, ParamConstraint, ParameterProblem, ParameterSpec, ToolCatalog,
    ToolDescriptor,
};
pub use digest::canonical_digest;
pub use error::{CatalogError, FlowvalError, RegistryError, Result};
pub use workflow::{
    Assembly, DanglingRef, Edge, ParamValue, ReferenceStats, WorkflowDag, WorkflowStep,
};
