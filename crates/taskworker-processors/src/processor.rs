//! The processor trait every task kind implements (spec §4.5).

use async_trait::async_trait;
use taskworker_core::{Task, TaskResult};

#[async_trait]
pub trait Processor: Send + Sync {
    fn can_process(&self, task: &Task) -> bool;

    /// Never returns `Err`: retryable and fatal failures alike become a
    /// failed [`TaskResult`] (spec §4.5 "Error discipline").
    async fn process(&self, task: &Task) -> TaskResult;
}
