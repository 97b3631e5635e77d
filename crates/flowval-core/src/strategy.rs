//! Tool-organization strategies.
//!
//! A strategy is a pure transform from the full catalog to the tool list an
//! agent gets to see, simulating different ways of organizing tools
//! (everything at once, a curated subset, category routing, rewritten
//! descriptions).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::catalog::{ToolCatalog, ToolDescriptor};

/// Catalog transform applied before each agent call.
pub trait CatalogStrategy: Send + Sync + 'static {
    /// Stable identifier used as the report's strategy key.
    fn id(&self) -> &str;

    fn apply(&self, catalog: &ToolCatalog) -> Vec<ToolDescriptor>;
}

/// Built-in strategy kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Every tool, unchanged.
    FullExposure,
    /// Only the named tools, in catalog order.
    Subset { tools: Vec<String> },
    /// Tools whose category matches one of `categories` (case-insensitive).
    Category { categories: Vec<String> },
    /// Rewrite descriptions; with `only_listed`, drop tools not mentioned.
    Relabel {
        descriptions: BTreeMap<String, String>,
        #[serde(default)]
        only_listed: bool,
    },
}

/// A named [`StrategyKind`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolStrategy {
    pub id: String,
    #[serde(flatten)]
    pub kind: StrategyKind,
}

impl ToolStrategy {
    pub fn new(id: impl Into<String>, kind: StrategyKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn full_exposure() -> Self {
        Self::new("full_exposure", StrategyKind::FullExposure)
    }

    /// Tool names this strategy mentions that the catalog lacks.
    pub fn unknown_tools(&self, catalog: &ToolCatalog) -> Vec<String> {
        let named: Vec<&String> = match &self.kind {
            StrategyKind::Subset { tools } => tools.iter().collect(),
            StrategyKind::Relabel { descriptions, .. } => descriptions.keys().collect(),
            StrategyKind::FullExposure | StrategyKind::Category { .. } => Vec::new(),
        };
        named
            .into_iter()
            .filter(|name| !catalog.contains(name))
            .cloned()
            .collect()
    }
}

impl CatalogStrategy for ToolStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, catalog: &ToolCatalog) -> Vec<ToolDescriptor> {
        let tools = catalog.tools().iter();
        match &self.kind {
            StrategyKind::FullExposure => tools.cloned().collect(),
            StrategyKind::Subset { tools: names } => tools
                .filter(|t| names.contains(&t.name))
                .cloned()
                .collect(),
            StrategyKind::Category { categories } => tools
                .filter(|t| {
                    t.category.as_deref().is_some_and(|c| {
                        categories.iter().any(|want| want.eq_ignore_ascii_case(c))
                    })
                })
                .cloned()
                .collect(),
            StrategyKind::Relabel {
                descriptions,
                only_listed,
            } => tools
                .filter_map(|t| match descriptions.get(&t.name) {
                    Some(text) => {
                        let mut relabeled = t.clone();
                        relabeled.description = text.clone();
                        Some(relabeled)
                    }
                    None if *only_listed => None,
                    None => Some(t.clone()),
                })
                .collect(),
        }
    }
}
