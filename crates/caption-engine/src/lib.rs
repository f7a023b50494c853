//! Caption engines and the residency manager that keeps at most one local model loaded.
//!
//! Engines form a closed set ([`CaptionEngine`]): local engines decode through a
//! [`LocalModel`] leased from the shared [`ResidencyManager`], the remote engine talks
//! to a chat completion endpoint and never occupies the residency slot.
#[cfg(feature = "candle")]
mod blip;
mod engine;
mod error;
mod loader;
mod local;
mod params;
mod registry;
mod remote;
mod remote_image;
mod residency;
mod traits;

#[cfg(feature = "candle")]
pub use blip::{BlipModel, BlipSize};
pub use engine::{
    CaptionEngine, EngineDescriptor, EngineInfo, EngineKind, EngineSession, EngineStatus, BLIP2_ENGINE_ID,
    BLIP_ENGINE_ID, LLAMA_VISION_ENGINE_ID,
};
pub use error::{CaptionError, CaptionResult};
pub use loader::{BoxedLocalModel, LocalModelPaths, ModelLoader};
pub use local::{LocalEngine, LocalSession};
pub use params::{DecodeParams, EscalationStep, GenerationParams, LocalVariant};
pub use registry::{standard_loaders, EngineRegistry};
pub use remote::{
    RemoteEngine, RemoteEngineConfig, DEFAULT_ENDPOINT_URL, DEFAULT_PROMPT, DEFAULT_REMOTE_MODEL,
};
pub use remote_image::{prepare_remote_image, PreparedImage};
pub use residency::{ModelLease, ResidencyManager};
pub use traits::{CaptionGenerator, LocalModel};
