//! The cloud backend (spec §4.4 "cloud").

use async_trait::async_trait;
use serde_json::json;
use taskworker_core::WorkerError;
use taskworker_envelope::{default_classify, Envelope};

use crate::gateway::LanguageModel;
use crate::mock::{is_placeholder_key, MockProvider};
use crate::types::{record_model_request, record_model_tokens, ChatCompletion, Embedding, Message, Role, Usage};

pub struct CloudBackend {
    envelope: Envelope,
    base_url: String,
    api_key: String,
    mock: MockProvider,
}

impl CloudBackend {
    pub fn new(envelope: Envelope, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            envelope,
            base_url: base_url.into(),
            api_key: api_key.into(),
            mock: MockProvider,
        }
    }

    fn using_mock(&self) -> bool {
        is_placeholder_key(&self.api_key)
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }
}

#[async_trait]
impl LanguageModel for CloudBackend {
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Embedding, WorkerError> {
        let result = if self.using_mock() {
            self.mock.create_embedding(model, text).await
        } else {
            self.create_embedding_remote(model, text).await
        };
        record_model_request("cloud", model, result.is_ok());
        if let Ok(embedding) = &result {
            record_model_tokens("cloud", model, &embedding.usage);
        }
        result
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<ChatCompletion, WorkerError> {
        let result = if self.using_mock() {
            self.mock.chat_completion(model, messages).await
        } else {
            self.chat_completion_remote(model, messages).await
        };
        record_model_request("cloud", model, result.is_ok());
        if let Ok(completion) = &result {
            record_model_tokens("cloud", model, &completion.usage);
        }
        result
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, WorkerError> {
        let completion = self
            .chat_completion(model, &[Message::user(prompt)])
            .await?;
        Ok(completion.content)
    }

    fn supports_model(&self, _model: &str) -> bool {
        // The remote provider validates; the gateway accepts any identifier.
        true
    }
}

impl CloudBackend {
    async fn create_embedding_remote(&self, model: &str, text: &str) -> Result<Embedding, WorkerError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let api_key = self.api_key.clone();
        let body = json!({ "model": model, "input": text });

        let response = self
            .envelope
            .execute(
                &self.host(),
                "llm/cloud/embeddings",
                "POST",
                || {
                    self.envelope
                        .client()
                        .post(&url)
                        .bearer_auth(&api_key)
                        .json(&body)
                },
                &default_classify,
            )
            .await?;

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding embedding response: {e}")))?;

        let vector: Vec<f32> = parsed["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| WorkerError::Fatal("embedding response missing data".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        let prompt_tokens = parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0);

        Ok(Embedding {
            embedding: vector,
            model: model.to_string(),
            usage: Usage::prompt_only(prompt_tokens),
        })
    }

    async fn chat_completion_remote(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<ChatCompletion, WorkerError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let api_key = self.api_key.clone();
        let wire_messages: Vec<_> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();
        let body = json!({ "model": model, "messages": wire_messages });

        let response = self
            .envelope
            .execute(
                &self.host(),
                "llm/cloud/chat-completions",
                "POST",
                || {
                    self.envelope
                        .client()
                        .post(&url)
                        .bearer_auth(&api_key)
                        .json(&body)
                },
                &default_classify,
            )
            .await?;

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding chat response: {e}")))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let prompt_tokens = parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        Ok(ChatCompletion {
            content,
            model: model.to_string(),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

