//! Retry policy (spec §4.1): bounded attempts, exponential backoff with
//! uniform jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
        }
    }

    /// Delay before attempt `k` (0-indexed), including uniform jitter in
    /// `[0, 0.1*base]`.
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        let base = self.backoff_factor.powi(k as i32);
        let jitter = rand::thread_rng().gen_range(0.0..(0.1 * base).max(0.0));
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt() {
        let policy = RetryPolicy::new(3, 2.0);
        let d0 = policy.delay_for_attempt(0).as_secs_f64();
        let d2 = policy.delay_for_attempt(2).as_secs_f64();
        assert!(d0 >= 1.0 && d0 < 1.1);
        assert!(d2 >= 4.0 && d2 < 4.4);
    }
}
