//! The HTTP envelope: retry + jitter + per-host circuit breaker wrapper
//! around every outbound call (spec §4.1).

pub mod circuit;
pub mod envelope;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitEvent, CircuitState};
pub use envelope::{default_classify, Classify, Envelope};
pub use retry::RetryPolicy;
