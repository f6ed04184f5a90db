//! The periodic poll loop and bounded-concurrency dispatcher (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use taskworker_core::{Task, TaskResult};
use taskworker_processors::Registry;
use taskworker_ratelimiter::{Decision, RateLimiter, Tier, Usage};
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::control_plane::ControlPlaneClient;
use crate::shutdown::ShutdownCoordinator;

pub struct Scheduler {
    control_plane: Arc<ControlPlaneClient>,
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<Registry>,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<ShutdownCoordinator>,
    concurrency_limit: usize,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        control_plane: Arc<ControlPlaneClient>,
        rate_limiter: Arc<RateLimiter>,
        registry: Arc<Registry>,
        shutdown: Arc<ShutdownCoordinator>,
        concurrency_limit: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            control_plane,
            rate_limiter,
            registry,
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            shutdown,
            concurrency_limit,
            poll_interval,
        }
    }

    /// Runs ticks back-to-back until shutdown is requested. A tick is never
    /// started while the previous one is still running — the loop body
    /// simply awaits each tick to completion before sleeping and checking
    /// again (spec §4.7 "ticks are serialized").
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_shutdown_requested() {
                return;
            }
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.wait_for_shutdown() => {}
            }
        }
    }

    pub async fn rate_limit_snapshot(&self) -> Value {
        let usage = self.rate_limiter.usage(Utc::now()).await.unwrap_or_default();
        let tiers: Value = usage
            .into_iter()
            .map(|(tier, usage)| {
                (
                    tier.as_str().to_string(),
                    json!({
                        "current": usage.current,
                        "limit": usage.limit,
                        "remaining": usage.remaining(),
                        "reset_at": usage.reset_at,
                    }),
                )
            })
            .collect();
        tiers
    }

    async fn tick(&self) {
        if self.shutdown.is_shutdown_requested() {
            return;
        }

        let now = Utc::now();
        let pre_check = match self.rate_limiter.check(self.concurrency_limit as u64, now).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, "rate limiter pre-check failed");
                return;
            }
        };
        publish_rate_limit_gauges(pre_check.usage());
        if matches!(pre_check, Decision::Denied { .. }) {
            tracing::debug!("tick skipped: rate limit denied pre-check");
            return;
        }

        let tasks = match self.control_plane.get_pending(self.concurrency_limit * 2).await {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch pending tasks");
                return;
            }
        };
        if tasks.is_empty() {
            return;
        }

        let batch = tasks.len().min(self.concurrency_limit);
        let tasks = &tasks[..batch];

        let now = Utc::now();
        let decision = match self.rate_limiter.check(batch as u64, now).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, "rate limiter re-check failed");
                return;
            }
        };
        publish_rate_limit_gauges(decision.usage());
        if matches!(decision, Decision::Denied { .. }) {
            tracing::debug!(batch, "tick skipped: rate limit denied re-check");
            return;
        }

        let handles: Vec<_> = tasks
            .iter()
            .cloned()
            .map(|task| {
                let semaphore = Arc::clone(&self.semaphore);
                let registry = Arc::clone(&self.registry);
                let control_plane = Arc::clone(&self.control_plane);
                let shutdown = Arc::clone(&self.shutdown);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    let _in_flight = shutdown.register_in_flight();
                    run_one(&registry, &control_plane, task).await
                })
            })
            .collect();

        let mut succeeded: u64 = 0;
        let mut completed_ids: Vec<String> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(result) if result.is_success() => {
                    succeeded += 1;
                    completed_ids.push(result.task_id);
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "task worker panicked"),
            }
        }

        if succeeded > 0 {
            let now = Utc::now();
            if let Err(err) = self
                .rate_limiter
                .record(succeeded, "batch", &completed_ids, now)
                .await
            {
                tracing::error!(error = %err, "failed to credit rate limiter");
            }
        }
    }
}

/// Publishes each tier's current/max/remaining as gauges (spec §4.7 step 2
/// "Publish usage gauges").
fn publish_rate_limit_gauges(usage: &std::collections::HashMap<Tier, Usage>) {
    for (tier, usage) in usage {
        let period = tier.as_str();
        metrics::gauge!("rate_limit_current", "period" => period).set(usage.current as f64);
        metrics::gauge!("rate_limit_max", "period" => period).set(usage.limit as f64);
        metrics::gauge!("rate_limit_remaining", "period" => period).set(usage.remaining() as f64);
    }
}

/// Per-task flow: look up processor → run → post status. The semaphore
/// permit and in-flight registration are held by the caller for this
/// future's whole lifetime.
async fn run_one(registry: &Registry, control_plane: &ControlPlaneClient, task: Task) -> TaskResult {
    let span = tracing::info_span!("task", task_id = %task.id, kind = ?task.kind);
    async move {
        let start = std::time::Instant::now();
        let result = registry.execute_with_error_handling(&task).await;
        metrics::histogram!("task_processing_duration_seconds", "kind" => task.kind.as_str())
            .record(start.elapsed().as_secs_f64());

        metrics::counter!(
            "tasks_processed_total",
            "kind" => task.kind.as_str(),
            "status" => if result.is_success() { "succeeded" } else { "failed" }
        )
        .increment(1);

        if let Err(err) = control_plane.update_status(&result).await {
            tracing::error!(task_id = %task.id, error = %err, "failed to post status update");
        }

        result
    }
    .instrument(span)
    .await
}
