//! Shared data model, error taxonomy and event infrastructure for the task
//! worker. Every other `taskworker-*` crate depends on this one; it depends
//! on nothing in the workspace.

pub mod error;
pub mod events;
pub mod task;

pub use error::{Outcome, WorkerError};
pub use events::{EventListener, EventListeners, FnListener, TracingListener, WorkerEvent};
pub use task::{parse_text_model_content, Task, TaskKind, TaskResult, TaskState, TextModelContent};
