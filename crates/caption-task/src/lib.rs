//! Batch captioning jobs: the dispatcher that runs them, the store that tracks their
//! progress and the task model pollers see.
mod dispatcher;
mod error;
mod status;
mod store;
mod task;

pub use dispatcher::JobDispatcher;
pub use error::{TaskError, TaskResult};
pub use status::TaskStatus;
pub use store::ProgressStore;
pub use task::{CaptionOutcome, CaptionResult, Task};
