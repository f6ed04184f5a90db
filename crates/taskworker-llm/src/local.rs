//! The local inference backend (spec §4.4 "local").

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use taskworker_core::WorkerError;
use taskworker_envelope::{default_classify, Envelope};

use crate::gateway::LanguageModel;
use crate::types::{record_model_request, record_model_tokens, render_transcript, ChatCompletion, Embedding, Message, Usage};

pub struct LocalBackend {
    envelope: Envelope,
    base_url: String,
    /// Models this backend claims to support; any other model is rejected
    /// without attempting a pull.
    supported_models: Vec<String>,
    model_download_timeout: Duration,
}

impl LocalBackend {
    pub fn new(
        envelope: Envelope,
        base_url: impl Into<String>,
        supported_models: Vec<String>,
        model_download_timeout: Duration,
    ) -> Self {
        Self {
            envelope,
            base_url: base_url.into(),
            supported_models,
            model_download_timeout,
        }
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }

    async fn installed_models(&self) -> Result<Vec<String>, WorkerError> {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        let response = self
            .envelope
            .execute(
                &self.host(),
                "llm/local/tags",
                "GET",
                || self.envelope.client().get(&url),
                &default_classify,
            )
            .await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding /api/tags: {e}")))?;
        Ok(body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Streams `POST /api/pull` to completion, bounded by
    /// `model_download_timeout`.
    async fn pull_model(&self, model: &str) -> Result<(), WorkerError> {
        let url = format!("{}/api/pull", self.base_url.trim_end_matches('/'));
        let model = model.to_string();
        let response = self
            .envelope
            .execute(
                &self.host(),
                "llm/local/pull",
                "POST",
                || self.envelope.client().post(&url).json(&json!({ "name": model })),
                &default_classify,
            )
            .await?;

        let stream_fut = async {
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                chunk.map_err(|e| WorkerError::Transient(format!("pull stream error: {e}")))?;
            }
            Ok::<(), WorkerError>(())
        };

        tokio::time::timeout(self.model_download_timeout, stream_fut)
            .await
            .map_err(|_| WorkerError::Transient("model pull timed out".to_string()))?
    }

    /// Ensures `model` is locally available, pulling it on first use.
    async fn ensure_available(&self, model: &str) -> Result<(), WorkerError> {
        if !self.supports_model(model) {
            return Err(WorkerError::Fatal(format!(
                "model {model} is not in the local backend's supported list"
            )));
        }
        let installed = self.installed_models().await?;
        if installed.iter().any(|m| m == model) {
            return Ok(());
        }
        tracing::info!(model, "pulling model into local backend");
        self.pull_model(model).await
    }
}

#[async_trait]
impl LanguageModel for LocalBackend {
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Embedding, WorkerError> {
        let result = self.create_embedding_remote(model, text).await;
        record_model_request("local", model, result.is_ok());
        if let Ok(embedding) = &result {
            record_model_tokens("local", model, &embedding.usage);
        }
        result
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<ChatCompletion, WorkerError> {
        let transcript = render_transcript(messages);
        let content = self.generate(model, &transcript).await?;
        Ok(ChatCompletion {
            content: content.clone(),
            model: model.to_string(),
            usage: Usage::prompt_only(crate::types::approximate_tokens(&transcript)),
        })
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, WorkerError> {
        let result = self.generate_remote(model, prompt).await;
        record_model_request("local", model, result.is_ok());
        result
    }

    fn supports_model(&self, model: &str) -> bool {
        self.supported_models.iter().any(|m| m == model)
    }
}

impl LocalBackend {
    async fn create_embedding_remote(&self, model: &str, text: &str) -> Result<Embedding, WorkerError> {
        self.ensure_available(model).await?;

        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let model_owned = model.to_string();
        let text_owned = text.to_string();

        let response = self
            .envelope
            .execute(
                &self.host(),
                "llm/local/embeddings",
                "POST",
                || {
                    self.envelope.client().post(&url).json(&json!({
                        "model": model_owned,
                        "prompt": text_owned,
                    }))
                },
                &default_classify,
            )
            .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding /api/embeddings: {e}")))?;
        let embedding: Vec<f32> = body["embedding"]
            .as_array()
            .ok_or_else(|| WorkerError::Fatal("embeddings response missing 'embedding'".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(Embedding {
            embedding,
            model: model.to_string(),
            usage: Usage::prompt_only(crate::types::approximate_tokens(text)),
        })
    }

    async fn generate_remote(&self, model: &str, prompt: &str) -> Result<String, WorkerError> {
        self.ensure_available(model).await?;

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let model_owned = model.to_string();
        let prompt_owned = prompt.to_string();

        let response = self
            .envelope
            .execute(
                &self.host(),
                "llm/local/generate",
                "POST",
                || {
                    self.envelope.client().post(&url).json(&json!({
                        "model": model_owned,
                        "prompt": prompt_owned,
                        "stream": false,
                    }))
                },
                &default_classify,
            )
            .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding /api/generate: {e}")))?;
        Ok(body["response"].as_str().unwrap_or_default().to_string())
    }
}
