//! The worker's error taxonomy (spec §7).
//!
//! [`Outcome`] is what the HTTP envelope's `classify` callback produces for
//! a single attempt; [`WorkerError`] is what finally reaches a processor or
//! the scheduler once the envelope has exhausted retries or hit a fatal
//! error outright.

use std::fmt;

/// Classification of a single upstream call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded.
    Ok,
    /// The call failed in a way that is worth retrying (timeout, connection
    /// reset, 5xx, upstream rate limiting).
    Retryable,
    /// The call failed in a way retrying cannot fix (4xx other than 429,
    /// auth denied, schema invalid).
    Fatal,
}

/// The top-level error taxonomy described in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Upstream error surfaced after the retry budget was exhausted.
    #[error("Retryable error: {0}")]
    Transient(String),

    /// Upstream error that the envelope never retried.
    #[error("{0}")]
    Fatal(String),

    /// The task payload failed validation (missing `content`, missing
    /// `model`, unsupported model, wrong shape).
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid configuration, discovered at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WorkerError {
    /// The message to use in a failed [`crate::task::TaskResult`]; retains
    /// the `Retryable error:` prefix the control plane's consumers key off
    /// of for re-emission decisions.
    pub fn task_message(&self) -> String {
        self.to_string()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::Retryable => write!(f, "retryable"),
            Outcome::Fatal => write!(f, "fatal"),
        }
    }
}
