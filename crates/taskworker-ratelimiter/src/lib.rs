//! Multi-tier admission control with durable counters (spec §4.2).

pub mod decision;
pub mod limiter;
pub mod store;
pub mod tier;
pub mod window;

pub use decision::{Decision, Usage};
pub use limiter::RateLimiter;
pub use store::Store;
pub use tier::{Strategy, Tier, TierLimits};
