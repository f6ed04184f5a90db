//! Shutdown coordinator (spec §4.8): signal handling, in-flight drain,
//! ordered cleanup fan-out. Re-entrant and idempotent.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, Notify};

pub struct ShutdownCoordinator {
    requested: AtomicBool,
    requested_notify: Notify,
    in_flight: StdMutex<HashSet<u64>>,
    drained_notify: Notify,
    next_id: AtomicU64,
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// Releases its slot in the in-flight set on drop, regardless of whether the
/// task it guards succeeded, failed, or panicked.
pub struct InFlightGuard {
    id: u64,
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.id);
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requested: AtomicBool::new(false),
            requested_notify: Notify::new(),
            in_flight: StdMutex::new(HashSet::new()),
            drained_notify: Notify::new(),
            next_id: AtomicU64::new(0),
            cleanups: Mutex::new(Vec::new()),
        })
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Flips the shutdown flag. Re-entry is a no-op (spec §4.8 "Re-entry is
    /// idempotent").
    pub fn request_shutdown(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("shutdown requested");
        self.requested_notify.notify_waiters();
    }

    /// Blocks until `request_shutdown` has been called.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.requested_notify.notified().await;
    }

    /// Registers an in-flight task worker, returning a guard that releases
    /// it on drop. The scheduler holds one of these for the lifetime of
    /// each dispatched task.
    pub fn register_in_flight(self: &Arc<Self>) -> InFlightGuard {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.in_flight.lock().expect("in_flight poisoned").insert(id);
        metrics::gauge!("tasks_in_flight").increment(1.0);
        InFlightGuard {
            id,
            coordinator: Arc::clone(self),
        }
    }

    fn release(&self, id: u64) {
        let mut in_flight = self.in_flight.lock().expect("in_flight poisoned");
        if in_flight.remove(&id) {
            metrics::gauge!("tasks_in_flight").decrement(1.0);
        }
        if in_flight.is_empty() {
            self.drained_notify.notify_waiters();
        }
    }

    /// Waits until the in-flight set is empty. No timeout: the operator is
    /// expected to use container-level kill for escalation (spec §4.8).
    pub async fn drain(&self) {
        loop {
            if self.in_flight.lock().expect("in_flight poisoned").is_empty() {
                return;
            }
            self.drained_notify.notified().await;
        }
    }

    /// Registers a cleanup callback, run in registration order by
    /// `run_cleanups` (scheduler stop, metrics server stop, HTTP/KG session
    /// close, DB close, per spec §4.8).
    pub async fn register_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanups.lock().await.push(Box::new(f));
    }

    pub async fn run_cleanups(&self) {
        let callbacks = std::mem::take(&mut *self.cleanups.lock().await);
        for callback in callbacks {
            callback();
        }
    }

    /// Spawns the SIGINT/SIGTERM listener. Returns once either signal
    /// fires, having already called `request_shutdown`.
    pub async fn listen_for_signals(self: Arc<Self>) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
            self.request_shutdown();
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            self.request_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_until_all_guards_drop() {
        let coordinator = ShutdownCoordinator::new();
        let guard_a = coordinator.register_in_flight();
        let guard_b = coordinator.register_in_flight();

        let drain_coordinator = Arc::clone(&coordinator);
        let drained = tokio::spawn(async move { drain_coordinator.drain().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!drained.is_finished());

        drop(guard_a);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!drained.is_finished());

        drop(guard_b);
        tokio::time::timeout(Duration::from_secs(1), drained)
            .await
            .expect("drain should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn request_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();
        coordinator.request_shutdown();
        assert!(coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn cleanups_run_in_registration_order() {
        let coordinator = ShutdownCoordinator::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        coordinator.register_cleanup(move || {
            order_a.try_lock().unwrap().push("a");
        }).await;
        let order_b = Arc::clone(&order);
        coordinator.register_cleanup(move || {
            order_b.try_lock().unwrap().push("b");
        }).await;

        coordinator.run_cleanups().await;
        assert_eq!(*order.lock().await, vec!["a", "b"]);
    }
}
