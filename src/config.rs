//! Process-wide configuration (spec §6 "Configuration surface", AMBIENT-2).
//!
//! Layered: built-in defaults → optional `config.toml` → environment
//! variables prefixed `WORKER_` (double underscore as the nesting
//! separator, e.g. `WORKER_RATE_LIMIT_PER_MINUTE`). Validated once, eagerly,
//! in `main` before any task is claimed.

use serde::Deserialize;
use taskworker_core::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Cloud,
    Local,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategyConfig {
    Rolling,
    Fixed,
}

/// Mirrors spec §6's configuration surface table one field each.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub api_base_url: String,
    pub polling_interval_seconds: u64,
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub retry_backoff_factor: f64,
    pub request_timeout_seconds: u64,
    pub model_timeout_seconds: u64,
    pub model_download_timeout_seconds: u64,
    pub circuit_breaker_threshold: u64,
    pub circuit_breaker_recovery_seconds: u64,

    pub processing_mode: ProcessingMode,
    pub cloud_api_base_url: String,
    pub cloud_api_key: String,
    pub local_api_base_url: String,
    pub local_supported_models: Vec<String>,

    pub rate_limit_enabled: bool,
    pub rate_limit_strategy: RateLimitStrategyConfig,
    pub rate_limit_storage_path: String,
    pub rate_limit_per_minute: u64,
    pub rate_limit_per_hour: u64,
    pub rate_limit_per_day: u64,
    pub rate_limit_per_week: u64,
    pub rate_limit_per_month: u64,

    pub oauth2_token_url: String,
    pub oauth2_client_id: String,
    pub oauth2_client_secret: String,
    pub oauth2_scope: String,

    pub kg_base_url: String,
    pub kg_sparql_url: String,
    pub kg_pageviews_base_url: String,
    pub kg_user_agent: String,
    pub kg_language: String,

    pub metrics_port: u16,
    pub log_format: String,
}

impl WorkerConfig {
    /// Builds the layered config and validates it. Returns
    /// `WorkerError::Configuration` on anything a startup check can catch,
    /// per spec §7's "Configuration" error class.
    pub fn load() -> Result<Self, WorkerError> {
        let raw = config::Config::builder()
            .set_default("polling_interval_seconds", 30)?
            .set_default("concurrency_limit", 5)?
            .set_default("max_retries", 3)?
            .set_default("retry_backoff_factor", 2.0)?
            .set_default("request_timeout_seconds", 30)?
            .set_default("model_timeout_seconds", 60)?
            .set_default("model_download_timeout_seconds", 600)?
            .set_default("circuit_breaker_threshold", 5)?
            .set_default("circuit_breaker_recovery_seconds", 60)?
            .set_default("processing_mode", "cloud")?
            .set_default("cloud_api_base_url", "https://api.openai.com/v1")?
            .set_default("cloud_api_key", "")?
            .set_default("local_api_base_url", "http://localhost:11434")?
            .set_default("local_supported_models", Vec::<String>::new())?
            .set_default("rate_limit_enabled", true)?
            .set_default("rate_limit_strategy", "rolling")?
            .set_default("rate_limit_storage_path", "rate_limits.db")?
            .set_default("rate_limit_per_minute", 0)?
            .set_default("rate_limit_per_hour", 0)?
            .set_default("rate_limit_per_day", 0)?
            .set_default("rate_limit_per_week", 0)?
            .set_default("rate_limit_per_month", 0)?
            .set_default("oauth2_token_url", "")?
            .set_default("oauth2_client_id", "")?
            .set_default("oauth2_client_secret", "")?
            .set_default("oauth2_scope", "read write")?
            .set_default("kg_base_url", "https://www.wikidata.org/w/api.php")?
            .set_default("kg_sparql_url", "https://query.wikidata.org/sparql")?
            .set_default(
                "kg_pageviews_base_url",
                "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article/en.wikipedia/all-access/user",
            )?
            .set_default("kg_user_agent", "taskworker/0.1 (+https://example.invalid)")?
            .set_default("kg_language", "en")?
            .set_default("metrics_port", 9898)?
            .set_default("log_format", "compact")?
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()
            .map_err(|e| WorkerError::Configuration(e.to_string()))?;

        let config: WorkerConfig = raw
            .try_deserialize()
            .map_err(|e| WorkerError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WorkerError> {
        if self.api_base_url.trim().is_empty() {
            return Err(WorkerError::Configuration(
                "api_base_url is required".to_string(),
            ));
        }
        if self.oauth2_client_id.trim().is_empty() || self.oauth2_client_secret.trim().is_empty() {
            return Err(WorkerError::Configuration(
                "oauth2_client_id and oauth2_client_secret are required".to_string(),
            ));
        }
        if self.oauth2_token_url.trim().is_empty() {
            return Err(WorkerError::Configuration(
                "oauth2_token_url is required".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(WorkerError::Configuration(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<config::ConfigError> for WorkerError {
    fn from(err: config::ConfigError) -> Self {
        WorkerError::Configuration(err.to_string())
    }
}
