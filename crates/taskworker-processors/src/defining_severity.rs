//! `DefiningSeverity` (spec §4.5): fetches already-resolved KG entities by
//! ID and asks the model to classify severity from a closed enum set.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use taskworker_core::{Task, TaskKind, TaskResult, WorkerError};
use taskworker_kg::{fetch_with_fallback, KgClient};
use taskworker_llm::{LanguageModel, Message};

use crate::processor::Processor;

/// The closed set of severity labels the model must choose from (spec
/// §4.5). Order matters only in that it is the scan order for matching the
/// model's free-text response.
const SEVERITIES: [&str; 10] = [
    "critical", "high_3", "high_2", "high_1", "medium_3", "medium_2", "medium_1", "low_3",
    "low_2", "low_1",
];
const DEFAULT_SEVERITY: &str = "medium_2";

#[derive(Debug, Deserialize, Clone)]
struct ResolvedRef {
    id: String,
    name: String,
}

/// `personalities` is a list (spec §9 Open Questions: the source has both a
/// scalar `personalityWikidataId` and a list `personalities[]` variant; the
/// list form is the one that survives here).
#[derive(Debug, Deserialize)]
struct SeverityContent {
    model: String,
    personalities: Vec<ResolvedRef>,
    #[serde(default)]
    topics: Vec<ResolvedRef>,
    impact_area: ResolvedRef,
}

fn parse_content(content: &serde_json::Value) -> Result<SeverityContent, WorkerError> {
    serde_json::from_value(content.clone())
        .map_err(|e| WorkerError::Validation(format!("invalid defining-severity content: {e}")))
}

pub struct DefiningSeverityProcessor {
    gateway: Arc<dyn LanguageModel>,
    kg: Arc<KgClient>,
}

impl DefiningSeverityProcessor {
    pub fn new(gateway: Arc<dyn LanguageModel>, kg: Arc<KgClient>) -> Self {
        Self { gateway, kg }
    }
}

#[async_trait]
impl Processor for DefiningSeverityProcessor {
    fn can_process(&self, task: &Task) -> bool {
        task.kind == TaskKind::DefiningSeverity
    }

    async fn process(&self, task: &Task) -> TaskResult {
        let content = match parse_content(&task.content) {
            Ok(content) => content,
            Err(err) => return TaskResult::failed(task.id.clone(), err.task_message()),
        };

        if !self.gateway.supports_model(&content.model) {
            return TaskResult::failed(
                task.id.clone(),
                format!("model {} is not supported", content.model),
            );
        }

        let mut ids: Vec<String> = content.personalities.iter().map(|p| p.id.clone()).collect();
        ids.extend(content.topics.iter().map(|t| t.id.clone()));
        ids.push(content.impact_area.id.clone());

        let mut names: Vec<String> =
            content.personalities.iter().map(|p| p.name.clone()).collect();
        names.extend(content.topics.iter().map(|t| t.name.clone()));
        names.push(content.impact_area.name.clone());
        let personality_count = content.personalities.len();

        // Gather-like concurrency: every ID is fetched as part of one
        // bulk-fetch pipeline; the fan-out over individual entities below
        // is purely about composing the prompt, not re-issuing requests.
        let fetched = fetch_with_fallback(&self.kg, &ids, &names).await;
        let signals: Vec<_> = join_all(fetched.into_iter().map(|result| async move {
            match result {
                Ok(entity) => json!({
                    "label": entity.label,
                    "occupations": entity.occupations,
                    "positions": entity.positions,
                    "awards": entity.awards,
                    "inbound_links": entity.inbound_links,
                    "pageviews": entity.pageviews,
                }),
                Err(fallback) => json!({
                    "label": fallback.label,
                    "source": fallback.source,
                }),
            }
        }))
        .await;

        let (personality_signals, rest) = signals.split_at(personality_count);
        let (topic_signals, impact_signal) = rest.split_at(rest.len() - 1);
        let prompt = format!(
            "Personalidades: {}\nTopicos: {}\nArea de impacto: {}\n\nCom base nestes sinais, \
             classifique a gravidade escolhendo exatamente um destes valores: {}.",
            serde_json::to_string(personality_signals).unwrap_or_default(),
            serde_json::to_string(topic_signals).unwrap_or_default(),
            impact_signal[0],
            SEVERITIES.join(", "),
        );

        let completion = match self
            .gateway
            .chat_completion(&content.model, &[Message::user(prompt)])
            .await
        {
            Ok(completion) => completion,
            Err(err) => return TaskResult::failed(task.id.clone(), err.task_message()),
        };

        let severity = SEVERITIES
            .iter()
            .find(|candidate| completion.content.contains(*candidate))
            .copied()
            .unwrap_or_else(|| {
                tracing::warn!(
                    task_id = %task.id,
                    response = %completion.content,
                    "model response did not match any severity label, defaulting to medium_2"
                );
                DEFAULT_SEVERITY
            });

        TaskResult::succeeded(task.id.clone(), json!({ "severity": severity }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_scan_prefers_exact_match_over_default() {
        let response = "After review, the severity is high_2 given the signals.";
        let found = SEVERITIES.iter().find(|c| response.contains(*c));
        assert_eq!(found, Some(&"high_2"));
    }

    #[test]
    fn unrecognized_response_falls_back_to_default() {
        let response = "I cannot decide.";
        let found = SEVERITIES.iter().find(|c| response.contains(*c));
        assert!(found.is_none());
    }
}
