//! The single interface every backend implements (spec §4.4).

use async_trait::async_trait;
use taskworker_core::WorkerError;

use crate::types::{ChatCompletion, Embedding, Message};

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Embedding, WorkerError>;

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<ChatCompletion, WorkerError>;

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, WorkerError>;

    fn supports_model(&self, model: &str) -> bool;
}
