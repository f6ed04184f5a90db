//! `IdentifyingData` (spec §4.5): extracts personality mentions and
//! resolves each against the knowledge graph.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use taskworker_core::{parse_text_model_content, Task, TaskKind, TaskResult};
use taskworker_kg::{batch_enrich, KgClient, Mention};
use taskworker_llm::{LanguageModel, Message};

use crate::processor::Processor;

#[derive(Debug, Deserialize)]
struct RawMention {
    name: String,
    #[serde(default)]
    mentioned_as: Option<String>,
    confidence: f64,
    context: String,
}

pub struct IdentifyingDataProcessor {
    gateway: Arc<dyn LanguageModel>,
    kg: Arc<KgClient>,
}

impl IdentifyingDataProcessor {
    pub fn new(gateway: Arc<dyn LanguageModel>, kg: Arc<KgClient>) -> Self {
        Self { gateway, kg }
    }
}

const SYSTEM_PROMPT: &str = "Identify every named person, company or publication mentioned in \
the text. Respond with a JSON array of objects: \
{\"name\": string, \"mentioned_as\": string, \"confidence\": number, \"context\": string}. \
Respond with only the JSON array.";

#[async_trait]
impl Processor for IdentifyingDataProcessor {
    fn can_process(&self, task: &Task) -> bool {
        task.kind == TaskKind::IdentifyingData
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

        let mentions: Vec<RawMention> = match serde_json::from_str(&completion.content) {
            Ok(mentions) => mentions,
            Err(err) => {
                return TaskResult::failed(
                    task.id.clone(),
                    format!("model did not return a valid mention array: {err}"),
                )
            }
        };

        let kg_mentions: Vec<Mention> = mentions
            .iter()
            .map(|m| Mention {
                name: m.name.clone(),
                mentioned_as: m.mentioned_as.clone(),
            })
            .collect();
        let enriched = batch_enrich(&self.kg, &kg_mentions).await;

        let output: Vec<_> = mentions
            .into_iter()
            .zip(enriched)
            .map(|(mention, entity)| {
                json!({
                    "name": mention.name,
                    "mentioned_as": mention.mentioned_as,
                    "confidence": mention.confidence,
                    "context": mention.context,
                    "wikidata": entity,
                })
            })
            .collect();

        TaskResult::succeeded(task.id.clone(), json!(output))
    }
}
