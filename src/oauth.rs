//! OAuth2 client-credentials token cache (spec §4.6, §5 "shared resource
//! policy (b)"): a single cached token, refreshed through a single-flight
//! lock so at most one refresh request is ever in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use taskworker_core::WorkerError;
use taskworker_envelope::{default_classify, Envelope};
use tokio::sync::Mutex;

/// Safety margin applied before expiry when deciding whether to refresh
/// (spec §6 "OAuth2").
const EXPIRY_GUARD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

pub struct OAuth2TokenCache {
    envelope: Arc<Envelope>,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuth2TokenCache {
    pub fn new(
        envelope: Arc<Envelope>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            envelope,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.token_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.token_url.clone())
    }

    /// Returns a valid access token, refreshing it if absent or within
    /// `EXPIRY_GUARD` of expiry. The lock is held across the refresh
    /// request itself, so concurrent callers serialize onto one refresh.
    pub async fn get_token(&self) -> Result<String, WorkerError> {
        let mut cached = self.cached.lock().await;

        let needs_refresh = match &*cached {
            Some(token) => Utc::now() + chrono::Duration::from_std(EXPIRY_GUARD).unwrap() >= token.expires_at,
            None => true,
        };

        if needs_refresh {
            let token = self.fetch_token().await?;
            let access_token = token.access_token.clone();
            *cached = Some(token);
            return Ok(access_token);
        }

        Ok(cached.as_ref().expect("checked above").access_token.clone())
    }

    async fn fetch_token(&self) -> Result<CachedToken, WorkerError> {
        let url = self.token_url.clone();
        let client_id = self.client_id.clone();
        let client_secret = self.client_secret.clone();
        let scope = self.scope.clone();

        let response = self
            .envelope
            .execute(
                &self.host(),
                "oauth2/token",
                "POST",
                || {
                    self.envelope
                        .client()
                        .post(&url)
                        .basic_auth(&client_id, Some(&client_secret))
                        .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
                },
                &default_classify,
            )
            .await?;

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding oauth2 token response: {e}")))?;

        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskworker_envelope::RetryPolicy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope() -> Arc<Envelope> {
        Arc::new(Envelope::new(
            reqwest::Client::new(),
            RetryPolicy::new(1, 0.01),
            Duration::from_secs(5),
            5,
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn caches_token_until_near_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600,
                "token_type": "bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = OAuth2TokenCache::new(
            envelope(),
            format!("{}/oauth2/token", server.uri()),
            "id",
            "secret",
            "read write",
        );

        let first = cache.get_token().await.unwrap();
        let second = cache.get_token().await.unwrap();
        assert_eq!(first, "tok-1");
        assert_eq!(second, "tok-1");
    }

    #[tokio::test]
    async fn refreshes_once_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-expired",
                "expires_in": 0,
                "token_type": "bearer",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-fresh",
                "expires_in": 3600,
                "token_type": "bearer",
            })))
            .mount(&server)
            .await;

        let cache = OAuth2TokenCache::new(
            envelope(),
            format!("{}/oauth2/token", server.uri()),
            "id",
            "secret",
            "read write",
        );

        let first = cache.get_token().await.unwrap();
        let second = cache.get_token().await.unwrap();
        assert_eq!(first, "tok-expired");
        assert_eq!(second, "tok-fresh");
    }
}
