use crate::error::StorageResult;
use async_trait::async_trait;

/// Flat store of uploaded images, addressed by bare filename.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn read(&self, filename: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, filename: &str) -> StorageResult<bool>;

    async fn write(&self, filename: &str, bytes: Vec<u8>) -> StorageResult<()>;
}
