//! Shared event system for observability.
//!
//! Every resilience component in this workspace (the HTTP envelope, the
//! circuit breaker, the rate limiter) emits events through the same small
//! trait objects so callers can attach a tracing/metrics listener once
//! instead of re-implementing observability per component.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An event emitted by a resilience component.
pub trait WorkerEvent: Send + Sync + fmt::Debug {
    /// The event's kind, e.g. `"circuit_opened"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// Name of the component instance that emitted the event (e.g. the
    /// upstream host).
    fn source(&self) -> &str;
}

/// Receives events of a given type.
pub trait EventListener<E: WorkerEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn EventListener<E>>;

/// A collection of listeners for one event type.
///
/// Cloning an `EventListeners` is cheap: listeners are reference-counted and
/// shared, not duplicated.
#[derive(Clone)]
pub struct EventListeners<E: WorkerEvent> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: WorkerEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every registered listener.
    ///
    /// A panicking listener is caught and logged; it does not prevent the
    /// remaining listeners from running.
    pub fn emit(&self, event: &E) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if result.is_err() {
                tracing::warn!(
                    listener_index = index,
                    source = event.source(),
                    event_type = event.event_type(),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: WorkerEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a plain closure into an [`EventListener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: WorkerEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

/// Logs every event at `warn` through `tracing`. Useful as a default
/// listener wired in at startup so nothing silently goes unobserved.
pub struct TracingListener;

impl<E: WorkerEvent> EventListener<E> for TracingListener {
    fn on_event(&self, event: &E) {
        tracing::warn!(source = event.source(), event_type = event.event_type(), ?event, "resilience event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        source: String,
        timestamp: Instant,
    }

    impl WorkerEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }
        fn timestamp(&self) -> Instant {
            self.timestamp
        }
        fn source(&self) -> &str {
            &self.source
        }
    }

    #[test]
    fn emits_to_all_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(move |_: &TestEvent| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let event = TestEvent {
            source: "host".into(),
            timestamp: Instant::now(),
        };
        listeners.emit(&event);
        listeners.emit(&event);

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &TestEvent| panic!("boom")));
        listeners.add(FnListener::new(move |_: &TestEvent| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let event = TestEvent {
            source: "host".into(),
            timestamp: Instant::now(),
        };
        listeners.emit(&event);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
