use opendal::{Error as OpenDalError, ErrorKind};
use thiserror::Error;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    OpenDalError(#[from] OpenDalError),

    #[error("Storage io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid image filename: {0:?}")]
    InvalidPath(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::OpenDalError(e) => e.kind() == ErrorKind::NotFound,
            StorageError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            StorageError::InvalidPath(_) => false,
        }
    }
}
