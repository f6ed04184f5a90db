//! Shared request/response shapes for the language-model gateway (spec §4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Renders messages as `"System: ...\nUser: ...\nAssistant: ..."`, the
/// transcript the local backend feeds to `generate` (spec §4.4).
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn prompt_only(prompt_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens: 0,
            total_tokens: prompt_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Embedding {
    pub embedding: Vec<f32>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// Fixed embedding width used throughout (spec §6: cloud embeddings fixed
/// at 1024; the mock provider and local backend both conform so output
/// shapes are interchangeable).
pub const EMBEDDING_DIM: usize = 1024;

/// Approximates token count as whitespace-delimited word count; good
/// enough for the worker's own accounting, not meant to match any
/// particular provider's tokenizer exactly.
pub fn approximate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Records a `model-requests(provider,model,status)` observation (spec §4.9).
pub(crate) fn record_model_request(provider: &str, model: &str, succeeded: bool) {
    metrics::counter!(
        "model_requests_total",
        "provider" => provider.to_string(),
        "model" => model.to_string(),
        "status" => if succeeded { "success" } else { "error" },
    )
    .increment(1);
}

/// Records a `model-tokens(provider,model,kind)` observation per token kind.
pub(crate) fn record_model_tokens(provider: &str, model: &str, usage: &Usage) {
    for (kind, tokens) in [
        ("prompt", usage.prompt_tokens),
        ("completion", usage.completion_tokens),
        ("total", usage.total_tokens),
    ] {
        metrics::counter!(
            "model_tokens_total",
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "kind" => kind,
        )
        .increment(tokens);
    }
}
