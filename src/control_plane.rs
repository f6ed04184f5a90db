//! Control-plane client (spec §4.6, §6 "Control-plane HTTP API").

use std::sync::Arc;

use taskworker_core::{Task, TaskResult, WorkerError};
use taskworker_envelope::{default_classify, Envelope};

use crate::oauth::OAuth2TokenCache;

pub struct ControlPlaneClient {
    envelope: Arc<Envelope>,
    base_url: String,
    oauth: Arc<OAuth2TokenCache>,
}

impl ControlPlaneClient {
    pub fn new(envelope: Arc<Envelope>, base_url: impl Into<String>, oauth: Arc<OAuth2TokenCache>) -> Self {
        Self {
            envelope,
            base_url: base_url.into(),
            oauth,
        }
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }

    pub async fn get_pending(&self, limit: usize) -> Result<Vec<Task>, WorkerError> {
        let token = self.oauth.get_token().await?;
        let url = format!(
            "{}/api/ai-tasks/pending",
            self.base_url.trim_end_matches('/')
        );
        let limit_str = limit.to_string();

        let response = self
            .envelope
            .execute(
                &self.host(),
                "ai-tasks/pending",
                "GET",
                || {
                    self.envelope
                        .client()
                        .get(&url)
                        .bearer_auth(&token)
                        .query(&[("limit", limit_str.as_str())])
                },
                &default_classify,
            )
            .await?;

        response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding pending tasks: {e}")))
    }

    /// Idempotent under repeated identical submissions (spec §8).
    pub async fn update_status(&self, result: &TaskResult) -> Result<bool, WorkerError> {
        let token = self.oauth.get_token().await?;
        let url = format!(
            "{}/api/ai-tasks/{}",
            self.base_url.trim_end_matches('/'),
            result.task_id
        );
        let body = serde_json::to_value(result)
            .map_err(|e| WorkerError::Fatal(format!("encoding task result: {e}")))?;

        let response = self
            .envelope
            .execute(
                &self.host(),
                "ai-tasks/:id",
                "PATCH",
                || {
                    self.envelope
                        .client()
                        .patch(&url)
                        .bearer_auth(&token)
                        .json(&body)
                },
                &default_classify,
            )
            .await?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;
    use taskworker_core::TaskKind;
    use taskworker_envelope::RetryPolicy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_for(server: &MockServer) -> Arc<OAuth2TokenCache> {
        let envelope = Arc::new(Envelope::new(
            reqwest::Client::new(),
            RetryPolicy::new(1, 0.01),
            Duration::from_secs(5),
            5,
            Duration::from_secs(60),
        ));
        Arc::new(OAuth2TokenCache::new(
            envelope,
            format!("{}/oauth2/token", server.uri()),
            "id",
            "secret",
            "read write",
        ))
    }

    #[tokio::test]
    async fn get_pending_decodes_task_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ai-tasks/pending"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "_id": "t1",
                "kind": "text-embedding",
                "state": "pending",
                "content": {"text": "hi", "model": "m"},
                "createdAt": Utc::now().to_rfc3339(),
                "updatedAt": Utc::now().to_rfc3339(),
            }])))
            .mount(&server)
            .await;

        let client = ControlPlaneClient::new(
            Arc::new(Envelope::new(
                reqwest::Client::new(),
                RetryPolicy::new(1, 0.01),
                Duration::from_secs(5),
                5,
                Duration::from_secs(60),
            )),
            server.uri(),
            oauth_for(&server),
        );

        let tasks = client.get_pending(10).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
        assert_eq!(tasks[0].kind, TaskKind::TextEmbedding);
    }

    #[tokio::test]
    async fn update_status_reports_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/ai-tasks/t1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = ControlPlaneClient::new(
            Arc::new(Envelope::new(
                reqwest::Client::new(),
                RetryPolicy::new(1, 0.01),
                Duration::from_secs(5),
                5,
                Duration::from_secs(60),
            )),
            server.uri(),
            oauth_for(&server),
        );

        let result = TaskResult::succeeded("t1", json!({"embedding": [0.1]}));
        assert!(client.update_status(&result).await.unwrap());
    }
}
