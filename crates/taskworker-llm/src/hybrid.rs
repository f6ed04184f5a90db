//! The hybrid fallback policy (spec §4.4 "hybrid").

use async_trait::async_trait;
use taskworker_core::WorkerError;

use crate::gateway::LanguageModel;
use crate::types::{ChatCompletion, Embedding, Message};

pub struct HybridBackend<L, C> {
    local: L,
    cloud: C,
}

impl<L, C> HybridBackend<L, C>
where
    L: LanguageModel,
    C: LanguageModel,
{
    pub fn new(local: L, cloud: C) -> Self {
        Self { local, cloud }
    }

    /// Chooses which backend a call for `model` should go through.
    fn route(&self, model: &str) -> Result<Route, WorkerError> {
        if self.local.supports_model(model) {
            Ok(Route::LocalThenCloud)
        } else if self.cloud.supports_model(model) {
            Ok(Route::CloudOnly)
        } else {
            Err(WorkerError::Fatal(format!(
                "model {model} is not supported by either backend"
            )))
        }
    }
}

enum Route {
    LocalThenCloud,
    CloudOnly,
}

#[async_trait]
impl<L, C> LanguageModel for HybridBackend<L, C>
where
    L: LanguageModel,
    C: LanguageModel,
{
    async fn create_embedding(&self, model: &str, text: &str) -> Result<Embedding, WorkerError> {
        match self.route(model)? {
            Route::CloudOnly => self.cloud.create_embedding(model, text).await,
            Route::LocalThenCloud => match self.local.create_embedding(model, text).await {
                Ok(embedding) => Ok(embedding),
                Err(err) => {
                    tracing::warn!(model, error = %err, "local backend failed, falling back to cloud");
                    self.cloud.create_embedding(model, text).await
                }
            },
        }
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<ChatCompletion, WorkerError> {
        match self.route(model)? {
            Route::CloudOnly => self.cloud.chat_completion(model, messages).await,
            Route::LocalThenCloud => match self.local.chat_completion(model, messages).await {
                Ok(completion) => Ok(completion),
                Err(err) => {
                    tracing::warn!(model, error = %err, "local backend failed, falling back to cloud");
                    self.cloud.chat_completion(model, messages).await
                }
            },
        }
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, WorkerError> {
        match self.route(model)? {
            Route::CloudOnly => self.cloud.generate(model, prompt).await,
            Route::LocalThenCloud => match self.local.generate(model, prompt).await {
                Ok(text) => Ok(text),
                Err(err) => {
                    tracing::warn!(model, error = %err, "local backend failed, falling back to cloud");
                    self.cloud.generate(model, prompt).await
                }
            },
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        self.local.supports_model(model) || self.cloud.supports_model(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskworker_core::WorkerError;

    struct Stub {
        supports: bool,
        fails: bool,
        tag: &'static str,
    }

    #[async_trait]
    impl LanguageModel for Stub {
        async fn create_embedding(&self, _model: &str, _text: &str) -> Result<Embedding, WorkerError> {
            if self.fails {
                Err(WorkerError::Transient(format!("{} failed", self.tag)))
            } else {
                Ok(Embedding {
                    embedding: vec![0.0],
                    model: self.tag.to_string(),
                    usage: Default::default(),
                })
            }
        }

        async fn chat_completion(&self, _: &str, _: &[Message]) -> Result<ChatCompletion, WorkerError> {
            unimplemented!()
        }

        async fn generate(&self, _: &str, _: &str) -> Result<String, WorkerError> {
            unimplemented!()
        }

        fn supports_model(&self, _model: &str) -> bool {
            self.supports
        }
    }

    #[tokio::test]
    async fn falls_back_to_cloud_when_local_fails() {
        let hybrid = HybridBackend::new(
            Stub { supports: true, fails: true, tag: "local" },
            Stub { supports: true, fails: false, tag: "cloud" },
        );
        let embedding = hybrid.create_embedding("m", "hi").await.unwrap();
        assert_eq!(embedding.model, "cloud");
    }

    #[tokio::test]
    async fn uses_cloud_only_when_local_does_not_support_model() {
        let hybrid = HybridBackend::new(
            Stub { supports: false, fails: true, tag: "local" },
            Stub { supports: true, fails: false, tag: "cloud" },
        );
        let embedding = hybrid.create_embedding("m", "hi").await.unwrap();
        assert_eq!(embedding.model, "cloud");
    }

    #[tokio::test]
    async fn fatal_when_neither_supports_model() {
        let hybrid = HybridBackend::new(
            Stub { supports: false, fails: true, tag: "local" },
            Stub { supports: false, fails: true, tag: "cloud" },
        );
        assert!(hybrid.create_embedding("m", "hi").await.is_err());
    }
}
