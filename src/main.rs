//! Entry point: CLI, wiring, and the run/healthcheck subcommands
//! (spec §4.9, AMBIENT-5).

mod config;
mod control_plane;
mod oauth;
mod observability;
mod scheduler;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use taskworker_envelope::{Envelope, RetryPolicy};
use taskworker_kg::KgClient;
use taskworker_llm::{CloudBackend, HybridBackend, LanguageModel, LocalBackend};
use taskworker_processors::{
    DefiningImpactAreaProcessor, DefiningSeverityProcessor, DefiningTopicsProcessor,
    IdentifyingDataProcessor, Registry, TextEmbeddingProcessor,
};
use taskworker_ratelimiter::{RateLimiter, Store, Strategy, TierLimits};
use taskworker_core::TaskKind;

use crate::config::{ProcessingMode, RateLimitStrategyConfig, WorkerConfig};
use crate::control_plane::ControlPlaneClient;
use crate::oauth::OAuth2TokenCache;
use crate::observability::ObservabilityState;
use crate::scheduler::Scheduler;
use crate::shutdown::ShutdownCoordinator;

#[derive(Parser)]
#[command(name = "taskworker", version, about = "AI task processing worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the worker until signalled to stop. The default when no
    /// subcommand is given.
    Run,
    /// Queries the local `/health` endpoint once and exits 0/1. Meant for
    /// container probes that prefer an exit code over parsing curl output.
    Healthcheck {
        #[arg(long, env = "WORKER_METRICS_PORT", default_value_t = 9898)]
        port: u16,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(),
        Command::Healthcheck { port } => healthcheck(port),
    }
}

fn run() -> ExitCode {
    let config = match WorkerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config.log_format);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run_worker(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "worker exited with error");
            ExitCode::from(1)
        }
    }
}

fn healthcheck(port: u16) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(_) => return ExitCode::from(1),
    };

    let healthy = runtime.block_on(async {
        let url = format!("http://127.0.0.1:{port}/health");
        match reqwest::get(&url).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    });

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn init_tracing(log_format: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_worker(config: WorkerConfig) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let retry = RetryPolicy::new(config.max_retries, config.retry_backoff_factor);
    let request_timeout = Duration::from_secs(config.request_timeout_seconds);
    let circuit_recovery = Duration::from_secs(config.circuit_breaker_recovery_seconds);

    let new_envelope = || {
        Envelope::new(
            client.clone(),
            retry,
            request_timeout,
            config.circuit_breaker_threshold,
            circuit_recovery,
        )
    };

    let control_plane_envelope = Arc::new(new_envelope());
    let oauth = Arc::new(OAuth2TokenCache::new(
        Arc::clone(&control_plane_envelope),
        config.oauth2_token_url.clone(),
        config.oauth2_client_id.clone(),
        config.oauth2_client_secret.clone(),
        config.oauth2_scope.clone(),
    ));
    let control_plane = Arc::new(ControlPlaneClient::new(
        control_plane_envelope,
        config.api_base_url.clone(),
        Arc::clone(&oauth),
    ));

    let kg_client = Arc::new(KgClient::new(
        new_envelope(),
        config.kg_base_url.clone(),
        config.kg_sparql_url.clone(),
        config.kg_pageviews_base_url.clone(),
        config.kg_user_agent.clone(),
        config.kg_language.clone(),
    ));

    let gateway = build_gateway(&config, new_envelope);

    let store = Store::open(&config.rate_limit_storage_path)?;
    let limits = TierLimits {
        minute: if config.rate_limit_enabled { config.rate_limit_per_minute } else { 0 },
        hour: if config.rate_limit_enabled { config.rate_limit_per_hour } else { 0 },
        day: if config.rate_limit_enabled { config.rate_limit_per_day } else { 0 },
        week: if config.rate_limit_enabled { config.rate_limit_per_week } else { 0 },
        month: if config.rate_limit_enabled { config.rate_limit_per_month } else { 0 },
    };
    let strategy = match config.rate_limit_strategy {
        RateLimitStrategyConfig::Rolling => Strategy::Rolling,
        RateLimitStrategyConfig::Fixed => Strategy::Fixed,
    };
    let rate_limiter = Arc::new(RateLimiter::new(limits, strategy, store));

    let mut registry = Registry::new();
    registry.register(
        TaskKind::TextEmbedding,
        Arc::new(TextEmbeddingProcessor::new(Arc::clone(&gateway))),
    );
    registry.register(
        TaskKind::IdentifyingData,
        Arc::new(IdentifyingDataProcessor::new(Arc::clone(&gateway), Arc::clone(&kg_client))),
    );
    registry.register(
        TaskKind::DefiningTopics,
        Arc::new(DefiningTopicsProcessor::new(Arc::clone(&gateway), Arc::clone(&kg_client))),
    );
    registry.register(
        TaskKind::DefiningImpactArea,
        Arc::new(DefiningImpactAreaProcessor::new(Arc::clone(&gateway), Arc::clone(&kg_client))),
    );
    registry.register(
        TaskKind::DefiningSeverity,
        Arc::new(DefiningSeverityProcessor::new(Arc::clone(&gateway), Arc::clone(&kg_client))),
    );
    let registry = Arc::new(registry);

    let shutdown = ShutdownCoordinator::new();
    tokio::spawn(prune_rate_limit_store(
        Arc::clone(&rate_limiter),
        Arc::clone(&shutdown),
    ));
    let scheduler = Arc::new(Scheduler::new(
        control_plane,
        rate_limiter,
        registry,
        Arc::clone(&shutdown),
        config.concurrency_limit,
        Duration::from_secs(config.polling_interval_seconds),
    ));

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let observability_state = ObservabilityState {
        scheduler: Arc::clone(&scheduler),
        prometheus,
    };
    let router = observability::router(observability_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.metrics_port)).await?;

    shutdown
        .register_cleanup(|| tracing::info!("closing knowledge-graph and control-plane sessions"))
        .await;
    shutdown
        .register_cleanup(|| tracing::info!("closing rate limit store"))
        .await;

    tokio::spawn(Arc::clone(&shutdown).listen_for_signals());

    let server_shutdown = Arc::clone(&shutdown);
    let server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { server_shutdown.wait_for_shutdown().await })
            .await
    });

    tracing::info!(
        concurrency_limit = config.concurrency_limit,
        processing_mode = ?config.processing_mode,
        "taskworker starting"
    );
    scheduler.run().await;

    shutdown.drain().await;
    shutdown.run_cleanups().await;
    let _ = server.await;

    tracing::info!("taskworker stopped");
    Ok(())
}

/// Deletes completion records past the 35-day retention window every six
/// hours (spec §4.2 "Retained for 35 days then pruned").
async fn prune_rate_limit_store(rate_limiter: Arc<RateLimiter>, shutdown: Arc<ShutdownCoordinator>) {
    let mut interval = tokio::time::interval(Duration::from_secs(6 * 60 * 60));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match rate_limiter.prune(Utc::now()).await {
                    Ok(deleted) if deleted > 0 => tracing::info!(deleted, "pruned rate limit completion log"),
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "failed to prune rate limit store"),
                }
            }
            _ = shutdown.wait_for_shutdown() => return,
        }
    }
}

fn build_gateway(
    config: &WorkerConfig,
    new_envelope: impl Fn() -> Envelope,
) -> Arc<dyn LanguageModel> {
    match config.processing_mode {
        ProcessingMode::Cloud => Arc::new(CloudBackend::new(
            new_envelope(),
            config.cloud_api_base_url.clone(),
            config.cloud_api_key.clone(),
        )),
        ProcessingMode::Local => Arc::new(LocalBackend::new(
            new_envelope(),
            config.local_api_base_url.clone(),
            config.local_supported_models.clone(),
            Duration::from_secs(config.model_download_timeout_seconds),
        )),
        ProcessingMode::Hybrid => Arc::new(HybridBackend::new(
            LocalBackend::new(
                new_envelope(),
                config.local_api_base_url.clone(),
                config.local_supported_models.clone(),
                Duration::from_secs(config.model_download_timeout_seconds),
            ),
            CloudBackend::new(
                new_envelope(),
                config.cloud_api_base_url.clone(),
                config.cloud_api_key.clone(),
            ),
        )),
    }
}
