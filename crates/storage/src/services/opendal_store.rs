use crate::{traits::ImageStore, utils::validate_filename, StorageError, StorageResult};
use async_trait::async_trait;
use opendal::{
    services::{Fs, Memory},
    Operator,
};
use std::path::Path;

#[derive(Clone, Debug)]
pub struct OpendalImageStore {
    op: Operator,
}

impl OpendalImageStore {
    /// Store images as files directly under `root`, creating it if needed.
    pub fn new_fs(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root_str = root
            .to_str()
            .ok_or_else(|| StorageError::InvalidPath(root.display().to_string()))?;

        let mut builder = Fs::default();
        builder.root(root_str);
        let op: Operator = Operator::new(builder)?.finish();

        Ok(Self { op })
    }

    /// Process-local store, used when no upload directory is wanted.
    pub fn new_memory() -> StorageResult<Self> {
        let op: Operator = Operator::new(Memory::default())?.finish();
        Ok(Self { op })
    }
}

#[async_trait]
impl ImageStore for OpendalImageStore {
    async fn read(&self, filename: &str) -> StorageResult<Vec<u8>> {
        let filename = validate_filename(filename)?;
        let buffer = self.op.read(filename).await?;
        Ok(buffer.to_vec())
    }

    async fn exists(&self, filename: &str) -> StorageResult<bool> {
        let filename = validate_filename(filename)?;
        Ok(self.op.is_exist(filename).await?)
    }

    async fn write(&self, filename: &str, bytes: Vec<u8>) -> StorageResult<()> {
        let filename = validate_filename(filename)?;
        self.op.write(filename, bytes).await?;
        tracing::debug!("stored image {}", filename);
        Ok(())
    }
}
