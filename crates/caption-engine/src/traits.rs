use crate::{error::CaptionResult, params::DecodeParams, GenerationParams};
use async_trait::async_trait;
use std::future::Future;

/// A local inference backend. Implementations hold the heavyweight runtime resources
/// (weights, accelerator buffers) for as long as they are alive.
#[async_trait]
pub trait LocalModel: Send {
    /// Run one decode pass over raw image bytes and return the raw caption.
    async fn decode(&mut self, image: &[u8], params: &DecodeParams) -> anyhow::Result<String>;

    /// Release accelerator memory ahead of drop. Default is to rely on `Drop`.
    fn release(&mut self) {}
}

/// The single capability every engine variant offers.
pub trait CaptionGenerator {
    fn generate(
        &self,
        image: &[u8],
        params: &GenerationParams,
    ) -> impl Future<Output = CaptionResult<String>> + Send;
}
