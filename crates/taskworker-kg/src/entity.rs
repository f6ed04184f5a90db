//! The knowledge-graph entity shape (spec §3).

use serde::{Deserialize, Serialize};

/// `instance_of` (property P31) values the enrichers are allowed to match
/// against (spec §4.3 "allowed types are fixed").
pub const ALLOWED_INSTANCE_OF: [&str; 3] = ["Q5", "Q891723", "Q1153191"];

pub fn is_allowed_instance_of(instance_of: &[String]) -> bool {
    instance_of
        .iter()
        .any(|id| ALLOWED_INSTANCE_OF.contains(&id.as_str()))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KgEntity {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub sitelinks: Vec<String>,
    #[serde(default)]
    pub statements: serde_json::Value,
    #[serde(default)]
    pub inbound_links: u64,
    #[serde(default)]
    pub pageviews: u64,
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(default)]
    pub occupations: Vec<String>,
    #[serde(default)]
    pub positions: Vec<String>,
    #[serde(default)]
    pub awards: Vec<String>,
    #[serde(default)]
    pub instance_of: Vec<String>,
}

/// The per-entity fallback used when severity's fetch-by-id pathway cannot
/// resolve an upstream ID (spec §4.5 "DefiningSeverity").
#[derive(Debug, Clone, Serialize)]
pub struct UserProvidedFallback {
    pub label: String,
    pub source: &'static str,
}

impl UserProvidedFallback {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: "user_provided",
        }
    }
}
