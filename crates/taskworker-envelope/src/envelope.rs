//! The single choke point every outbound call flows through (spec §4.1).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Response;
use taskworker_core::{EventListeners, Outcome, TracingListener, WorkerError};

use crate::circuit::{CircuitBreaker, CircuitEvent};
use crate::retry::RetryPolicy;

/// Classifies the result of one attempt. Implementations typically inspect
/// the status code on `Ok` and the error kind on `Err`; they should not need
/// to read the response body.
pub type Classify = dyn Fn(&Result<Response, reqwest::Error>) -> Outcome + Send + Sync;

pub struct Envelope {
    client: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    circuit_threshold: u64,
    recovery_timeout: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    events: EventListeners<CircuitEvent>,
}

impl Envelope {
    pub fn new(
        client: reqwest::Client,
        retry: RetryPolicy,
        request_timeout: Duration,
        circuit_threshold: u64,
        recovery_timeout: Duration,
    ) -> Self {
        let mut events = EventListeners::new();
        events.add(TracingListener);
        Self {
            client,
            retry,
            request_timeout,
            circuit_threshold,
            recovery_timeout,
            breakers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn breaker_for(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map poisoned");
        breakers
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    host,
                    self.circuit_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    /// Executes one logical call against `host`, retrying retryable
    /// failures with backoff+jitter and honouring that host's circuit
    /// breaker. `build_request` is called fresh on every attempt so it
    /// should be cheap (e.g. cloning a small struct into a new body).
    /// `endpoint`/`method` are used only as metric labels, not for routing.
    pub async fn execute<F>(
        &self,
        host: &str,
        endpoint: &str,
        method: &str,
        build_request: F,
        classify: &Classify,
    ) -> Result<Response, WorkerError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let breaker = self.breaker_for(host);
        let mut last_message = String::new();
        let start = std::time::Instant::now();

        for attempt in 0..=self.retry.max_retries {
            if !breaker.try_acquire(&self.events) {
                record_api_request(endpoint, method, "circuit_open");
                record_api_duration(endpoint, method, start.elapsed());
                return Err(WorkerError::Fatal(format!(
                    "circuit breaker open for {host}"
                )));
            }

            let result = build_request()
                .timeout(self.request_timeout)
                .send()
                .await;
            let outcome = classify(&result);
            record_api_request(endpoint, method, &status_label(&result));

            match outcome {
                Outcome::Ok => {
                    breaker.record_success(&self.events);
                    record_api_duration(endpoint, method, start.elapsed());
                    return Ok(result.expect("Outcome::Ok implies a successful response"));
                }
                Outcome::Fatal => {
                    breaker.record_failure(&self.events);
                    record_api_duration(endpoint, method, start.elapsed());
                    return Err(WorkerError::Fatal(describe(&result)));
                }
                Outcome::Retryable => {
                    breaker.record_failure(&self.events);
                    last_message = describe(&result);
                    if attempt == self.retry.max_retries {
                        break;
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(host, attempt, ?delay, "retrying after retryable error");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        record_api_duration(endpoint, method, start.elapsed());
        Err(WorkerError::Transient(last_message))
    }
}

fn describe(result: &Result<Response, reqwest::Error>) -> String {
    match result {
        Ok(response) => format!("HTTP {}", response.status()),
        Err(err) => err.to_string(),
    }
}

fn status_label(result: &Result<Response, reqwest::Error>) -> String {
    match result {
        Ok(response) => response.status().as_u16().to_string(),
        Err(_) => "error".to_string(),
    }
}

fn record_api_request(endpoint: &str, method: &str, status_code: &str) {
    metrics::counter!(
        "api_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status_code" => status_code.to_string(),
    )
    .increment(1);
}

fn record_api_duration(endpoint: &str, method: &str, elapsed: Duration) {
    metrics::histogram!(
        "api_request_duration_seconds",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
    )
    .record(elapsed.as_secs_f64());
}

/// The default classifier for JSON REST upstreams (spec §4.1): timeouts,
/// connection errors, 5xx and 429 are retryable; other 4xx and auth
/// failures are fatal.
pub fn default_classify(result: &Result<Response, reqwest::Error>) -> Outcome {
    match result {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                Outcome::Ok
            } else if status.as_u16() == 429 || status.is_server_error() {
                Outcome::Retryable
            } else {
                Outcome::Fatal
            }
        }
        Err(err) => {
            if err.is_timeout() || err.is_connect() {
                Outcome::Retryable
            } else {
                Outcome::Fatal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope() -> Envelope {
        Envelope::new(
            reqwest::Client::new(),
            RetryPolicy::new(3, 0.01),
            Duration::from_secs(5),
            5,
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let env = envelope();
        let url = format!("{}/ok", server.uri());
        let response = env
            .execute(
                &server.address().to_string(),
                "test/ok",
                "GET",
                || env.client().get(&url),
                &default_classify,
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let env = envelope();
        let url = format!("{}/flaky", server.uri());
        let response = env
            .execute(
                &server.address().to_string(),
                "test/flaky",
                "GET",
                || env.client().get(&url),
                &default_classify,
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn fatal_4xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nope"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let env = envelope();
        let url = format!("{}/nope", server.uri());
        let err = env
            .execute(
                &server.address().to_string(),
                "test/nope",
                "GET",
                || env.client().get(&url),
                &default_classify,
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_rejects_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let env = Envelope::new(
            reqwest::Client::new(),
            RetryPolicy::new(0, 0.01),
            Duration::from_secs(5),
            5,
            Duration::from_secs(60),
        );
        let url = format!("{}/boom", server.uri());
        let host = server.address().to_string();

        for _ in 0..5 {
            let _ = env
                .execute(&host, "test/boom", "GET", || env.client().get(&url), &default_classify)
                .await;
        }

        let err = env
            .execute(&host, "test/boom", "GET", || env.client().get(&url), &default_classify)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("circuit breaker open"));
    }
}
