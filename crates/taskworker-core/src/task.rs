//! The task data model (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;

/// One of the five job kinds the control plane can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    TextEmbedding,
    IdentifyingData,
    DefiningTopics,
    DefiningImpactArea,
    DefiningSeverity,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::TextEmbedding,
        TaskKind::IdentifyingData,
        TaskKind::DefiningTopics,
        TaskKind::DefiningImpactArea,
        TaskKind::DefiningSeverity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::TextEmbedding => "text-embedding",
            TaskKind::IdentifyingData => "identifying-data",
            TaskKind::DefiningTopics => "defining-topics",
            TaskKind::DefiningImpactArea => "defining-impact-area",
            TaskKind::DefiningSeverity => "defining-severity",
        }
    }
}

/// Lifecycle state as observed by the worker. The control plane is the only
/// writer of authoritative state; the worker never mutates a task locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// A unit of work claimed from the control plane.
///
/// Field names mirror the wire representation via `serde(rename)`: the
/// control plane uses `_id`, `state`, `callbackRoute`, `callbackParams`,
/// `createdAt`, `updatedAt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub kind: TaskKind,
    #[serde(rename = "state")]
    pub state: TaskState,
    /// Opaque payload; its shape depends on `kind` (spec §6).
    pub content: Value,
    #[serde(rename = "callbackRoute", default)]
    pub callback_route: Option<Value>,
    #[serde(rename = "callbackParams", default)]
    pub callback_params: Option<Value>,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of processing one task. Exactly one of `output`/`error` is set,
/// enforced by the constructors below rather than at the type level, to
/// keep the wire shape a flat, easily-`PATCH`-able object.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    #[serde(skip)]
    pub task_id: String,
    pub status: TaskState,
    #[serde(rename = "output_data", skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(rename = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn succeeded(task_id: impl Into<String>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskState::Succeeded,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskState::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskState::Succeeded)
    }
}

/// The shared `{text, model}` shape used by four of the five task kinds
/// (spec §4.5 "Shared input contract"). `DefiningSeverity` has its own,
/// structurally different, content shape and parses `content` itself.
pub struct TextModelContent {
    pub text: String,
    pub model: String,
}

/// Decodes `task.content` into `{text, model}`.
///
/// `content` is either a bare string (legacy: the text with no model — the
/// caller supplies `default_model`, used only by the one kind that still
/// honours the legacy decoder) or a JSON object carrying at least `text` and
/// `model`. A mapping missing `model` is a fatal validation error.
pub fn parse_text_model_content(
    content: &Value,
    legacy_default_model: Option<&str>,
) -> Result<TextModelContent, WorkerError> {
    match content {
        Value::String(text) => {
            let model = legacy_default_model.ok_or_else(|| {
                WorkerError::Validation("Model is required in task content".to_string())
            })?;
            Ok(TextModelContent {
                text: text.clone(),
                model: model.to_string(),
            })
        }
        Value::Object(map) => {
            let text = map
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| WorkerError::Validation("content.text is required".to_string()))?
                .to_string();
            let model = map
                .get("model")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    WorkerError::Validation("Model is required in task content".to_string())
                })?
                .to_string();
            Ok(TextModelContent { text, model })
        }
        other => Err(WorkerError::Validation(format!(
            "unsupported content shape: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_mapping_without_model() {
        let content = json!({"text": "hello"});
        let err = parse_text_model_content(&content, None).unwrap_err();
        assert!(err.to_string().contains("Model is required"));
    }

    #[test]
    fn accepts_mapping_with_model() {
        let content = json!({"text": "hello world", "model": "m"});
        let parsed = parse_text_model_content(&content, None).unwrap();
        assert_eq!(parsed.text, "hello world");
        assert_eq!(parsed.model, "m");
    }

    #[test]
    fn legacy_string_requires_default_model() {
        let content = json!("hello");
        assert!(parse_text_model_content(&content, None).is_err());
        let parsed = parse_text_model_content(&content, Some("fallback")).unwrap();
        assert_eq!(parsed.model, "fallback");
    }

    #[test]
    fn task_result_serializes_flat() {
        let result = TaskResult::succeeded("t1", json!({"embedding": [0.1]}));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert!(value.get("error_message").is_none());
    }
}
