//! `TextEmbedding` (spec §4.5): calls the gateway's `create_embedding`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use taskworker_core::{parse_text_model_content, Task, TaskKind, TaskResult};
use taskworker_llm::LanguageModel;

use crate::processor::Processor;

pub struct TextEmbeddingProcessor {
    gateway: Arc<dyn LanguageModel>,
}

impl TextEmbeddingProcessor {
    pub fn new(gateway: Arc<dyn LanguageModel>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Processor for TextEmbeddingProcessor {
    fn can_process(&self, task: &Task) -> bool {
        task.kind == TaskKind::TextEmbedding
    }

    async fn process(&self, task: &Task) -> TaskResult {
        let parsed = match parse_text_model_content(&task.content, Some("text-embedding-3-small")) {
            Ok(parsed) => parsed,
            Err(err) => return TaskResult::failed(task.id.clone(), err.task_message()),
        };

        if !self.gateway.supports_model(&parsed.model) {
            return TaskResult::failed(
                task.id.clone(),
                format!("model {} is not supported", parsed.model),
            );
        }

        match self.gateway.create_embedding(&parsed.model, &parsed.text).await {
            Ok(embedding) => TaskResult::succeeded(
                task.id.clone(),
                json!({
                    "embedding": embedding.embedding,
                    "model": embedding.model,
                    "usage": embedding.usage,
                }),
            ),
            Err(err) => TaskResult::failed(task.id.clone(), err.task_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskworker_core::TaskState;
    use taskworker_llm::MockProvider;

    fn task(content: serde_json::Value) -> Task {
        Task {
            id: "t1".into(),
            kind: TaskKind::TextEmbedding,
            state: TaskState::Pending,
            content,
            callback_route: None,
            callback_params: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn happy_path_returns_fixed_width_embedding() {
        let processor = TextEmbeddingProcessor::new(Arc::new(MockProvider));
        let result = processor
            .process(&task(json!({"text": "hello world", "model": "m"})))
            .await;
        assert!(result.is_success());
        let output = result.output.unwrap();
        assert_eq!(output["embedding"].as_array().unwrap().len(), 1024);
        assert_eq!(output["usage"]["prompt_tokens"], 2);
    }

    #[tokio::test]
    async fn missing_model_is_fatal_validation() {
        let processor = TextEmbeddingProcessor::new(Arc::new(MockProvider));
        let result = processor.process(&task(json!({"text": "t"}))).await;
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("Model is required"));
    }
}
