use caption_engine::CaptionError;
use storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("no images were submitted")]
    EmptyBatch,

    #[error(transparent)]
    Engine(#[from] CaptionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
