//! The kind→processor dispatch table (spec §4.5), with the
//! `execute_with_error_handling` panic boundary (spec §4.5 "Error
//! discipline", grounded on `ai_task_processor/processors/base_processor.py`).

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use taskworker_core::{Task, TaskKind, TaskResult};

use crate::processor::Processor;

#[derive(Default)]
pub struct Registry {
    processors: HashMap<TaskKind, Arc<dyn Processor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: TaskKind, processor: Arc<dyn Processor>) {
        self.processors.insert(kind, processor);
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn Processor>> {
        self.processors.get(&kind)
    }

    /// Runs the registered processor for `task.kind`, catching any panic
    /// and converting it into a failed result rather than letting it
    /// propagate to the scheduler.
    pub async fn execute_with_error_handling(&self, task: &Task) -> TaskResult {
        let Some(processor) = self.processors.get(&task.kind) else {
            return TaskResult::failed(
                task.id.clone(),
                format!("no processor registered for kind {:?}", task.kind),
            );
        };

        match AssertUnwindSafe(processor.process(task)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(task_id = %task.id, "processor panicked");
                TaskResult::failed(task.id.clone(), "processor panicked")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use taskworker_core::TaskState;

    struct Panicky;

    #[async_trait]
    impl Processor for Panicky {
        fn can_process(&self, _task: &Task) -> bool {
            true
        }

        async fn process(&self, _task: &Task) -> TaskResult {
            panic!("boom");
        }
    }

    fn task(kind: TaskKind) -> Task {
        Task {
            id: "t1".into(),
            kind,
            state: TaskState::Pending,
            content: json!({}),
            callback_route: None,
            callback_params: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn panicking_processor_becomes_failed_result() {
        let mut registry = Registry::new();
        registry.register(TaskKind::TextEmbedding, Arc::new(Panicky));

        let result = registry
            .execute_with_error_handling(&task(TaskKind::TextEmbedding))
            .await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn missing_processor_fails_with_message() {
        let registry = Registry::new();
        let result = registry
            .execute_with_error_handling(&task(TaskKind::DefiningSeverity))
            .await;
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("no processor registered"));
    }
}
