//! `DefiningTopics` (spec §4.5): Portuguese topic extraction + per-topic
//! knowledge-graph lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use taskworker_core::{parse_text_model_content, Task, TaskKind, TaskResult};
use taskworker_kg::{batch_enrich, KgClient, Mention};
use taskworker_llm::{LanguageModel, Message};

use crate::processor::Processor;

#[derive(Debug, Deserialize)]
struct RawTopic {
    name: String,
    confidence: f64,
    context: String,
}

pub struct DefiningTopicsProcessor {
    gateway: Arc<dyn LanguageModel>,
    kg: Arc<KgClient>,
}

impl DefiningTopicsProcessor {
    pub fn new(gateway: Arc<dyn LanguageModel>, kg: Arc<KgClient>) -> Self {
        Self { gateway, kg }
    }
}

const SYSTEM_PROMPT: &str = "Liste os principais temas abordados no texto. Responda apenas com \
um array JSON de objetos: {\"name\": string, \"confidence\": number, \"context\": string}, \
em portugues.";

#[async_trait]
impl Processor for DefiningTopicsProcessor {
    fn can_process(&self, task: &Task) -> bool {
        task.kind == TaskKind::DefiningTopics
    }

    async fn process(&self, task: &Task) -> TaskResult {
        let parsed = match parse_text_model_content(&task.content, None) {
            Ok(parsed) => parsed,
            Err(err) => return TaskResult::failed(task.id.clone(), err.task_message()),
        };

        if !self.gateway.supports_model(&parsed.model) {
            return TaskResult::failed(
                task.id.clone(),
                format!("model {} is not supported", parsed.model),
            );
        }

        let completion = match self
            .gateway
            .chat_completion(
                &parsed.model,
                &[Message::system(SYSTEM_PROMPT), Message::user(parsed.text)],
            )
            .await
        {
            Ok(completion) => completion,
            Err(err) => return TaskResult::failed(task.id.clone(), err.task_message()),
        };

        let topics: Vec<RawTopic> = match serde_json::from_str(&completion.content) {
            Ok(topics) => topics,
            Err(err) => {
                return TaskResult::failed(
                    task.id.clone(),
                    format!("model did not return a valid topic array: {err}"),
                )
            }
        };

        let mentions: Vec<Mention> = topics
            .iter()
            .map(|t| Mention {
                name: t.name.clone(),
                mentioned_as: None,
            })
            .collect();
        let enriched = batch_enrich(&self.kg, &mentions).await;

        let output: Vec<_> = topics
            .into_iter()
            .zip(enriched)
            .map(|(topic, entity)| {
                json!({
                    "name": topic.name,
                    "wikidataId": entity.map(|e| e.id),
                    "language": "pt",
                })
            })
            .collect();

        TaskResult::succeeded(task.id.clone(), json!(output))
    }
}
