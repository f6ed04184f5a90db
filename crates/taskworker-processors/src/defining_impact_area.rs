//! `DefiningImpactArea` (spec §4.5): Portuguese single-object impact area
//! extraction + knowledge-graph lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use taskworker_core::{parse_text_model_content, Task, TaskKind, TaskResult};
use taskworker_kg::{batch_enrich, KgClient, Mention};
use taskworker_llm::{LanguageModel, Message};

use crate::processor::Processor;

#[derive(Debug, Deserialize)]
struct RawImpactArea {
    name: String,
    description: String,
    #[allow(dead_code)]
    confidence: f64,
}

pub struct DefiningImpactAreaProcessor {
    gateway: Arc<dyn LanguageModel>,
    kg: Arc<KgClient>,
}

impl DefiningImpactAreaProcessor {
    pub fn new(gateway: Arc<dyn LanguageModel>, kg: Arc<KgClient>) -> Self {
        Self { gateway, kg }
    }
}

const SYSTEM_PROMPT: &str = "Identifique a principal area de impacto do texto. Responda apenas \
com um objeto JSON: {\"name\": string, \"description\": string, \"confidence\": number}, em \
portugues.";

#[async_trait]
impl Processor for DefiningImpactAreaProcessor {
    fn can_process(&self, task: &Task) -> bool {
        task.kind == TaskKind::DefiningImpactArea
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

        let impact_area: RawImpactArea = match serde_json::from_str(&completion.content) {
            Ok(impact_area) => impact_area,
            Err(err) => {
                return TaskResult::failed(
                    task.id.clone(),
                    format!("model did not return a valid impact area object: {err}"),
                )
            }
        };

        let mention = Mention {
            name: impact_area.name.clone(),
            mentioned_as: None,
        };
        let mut enriched = batch_enrich(&self.kg, std::slice::from_ref(&mention)).await;
        let entity = enriched.pop().flatten();

        TaskResult::succeeded(
            task.id.clone(),
            json!({
                "name": impact_area.name,
                "description": impact_area.description,
                "wikidataId": entity.map(|e| e.id),
                "language": "pt",
            }),
        )
    }
}
