//! Deterministic mock outputs used when no real API key is configured
//! (spec §4.4 "cloud"), so the worker stays usable in development.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use taskworker_core::WorkerError;

use crate::gateway::LanguageModel;
use crate::types::{approximate_tokens, ChatCompletion, Embedding, Message, Usage, EMBEDDING_DIM};

const PLACEHOLDER_KEYS: [&str; 4] = ["", "sk-placeholder", "your-api-key-here", "changeme"];

pub fn is_placeholder_key(key: &str) -> bool {
    PLACEHOLDER_KEYS.contains(&key)
}

/// Always accepts any model: the real cloud provider validates, and a mock
/// has no way to know what's real.
pub struct MockProvider;

fn seeded_embedding(model: &str, text: &str) -> Vec<f32> {
    let seed = {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in format!("{model}:{text}").bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    };
    let mut rng = StdRng::seed_from_u64(seed);
    (0..EMBEDDING_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[async_trait]
impl LanguageModel for MockProvider {
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Embedding, WorkerError> {
        Ok(Embedding {
            embedding: seeded_embedding(model, text),
            model: model.to_string(),
            usage: Usage::prompt_only(approximate_tokens(text)),
        })
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<ChatCompletion, WorkerError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::types::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(ChatCompletion {
            content: format!("[mock completion for: {last_user}]"),
            model: model.to_string(),
            usage: Usage::prompt_only(approximate_tokens(last_user)),
        })
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, WorkerError> {
        let _ = model;
        Ok(format!("[mock generation for: {prompt}]"))
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic_and_fixed_width() {
        let provider = MockProvider;
        let a = provider.create_embedding("m", "hello world").await.unwrap();
        let b = provider.create_embedding("m", "hello world").await.unwrap();
        assert_eq!(a.embedding.len(), EMBEDDING_DIM);
        assert_eq!(a.embedding, b.embedding);
        assert_eq!(a.usage.prompt_tokens, 2);
    }

    #[test]
    fn detects_placeholder_keys() {
        assert!(is_placeholder_key(""));
        assert!(is_placeholder_key("your-api-key-here"));
        assert!(!is_placeholder_key("sk-real-looking-key"));
    }
}
