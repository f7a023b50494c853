use std::time::Duration;
use thiserror::Error;

pub type CaptionResult<T> = std::result::Result<T, CaptionError>;

#[derive(Error, Debug)]
pub enum CaptionError {
    /// The engine has been disabled for the rest of the process lifetime.
    #[error("failed to load engine {engine}: {reason}")]
    EngineLoadFailure { engine: String, reason: String },

    #[error("engine {0} is not available")]
    EngineUnavailable(String),

    #[error("unknown engine {0}")]
    UnknownEngine(String),

    #[error("caption generation failed: {0}")]
    GenerationFailure(String),

    #[error("remote service error {status}: {body}")]
    RemoteService { status: u16, body: String },

    #[error("remote service timed out after {0:?}")]
    RemoteTimeout(Duration),

    #[error("remote api key is not configured")]
    MissingApiKey,

    #[error("invalid image: {0}")]
    Image(#[from] image::ImageError),
}
