use crate::{
    engine::{CaptionEngine, EngineDescriptor, EngineInfo},
    error::{CaptionError, CaptionResult},
    loader::{LocalModelPaths, ModelLoader},
    local::LocalEngine,
    params::LocalVariant,
    remote::{RemoteEngine, RemoteEngineConfig},
    residency::ResidencyManager,
};
use std::{collections::HashMap, sync::Arc};

#[cfg(feature = "candle")]
use crate::engine::{BLIP2_ENGINE_ID, BLIP_ENGINE_ID};

/// The engines known to the process, all sharing one residency slot.
#[derive(Clone)]
pub struct EngineRegistry {
    engines: Vec<CaptionEngine>,
    residency: Arc<ResidencyManager>,
}

impl EngineRegistry {
    pub fn new(residency: ResidencyManager) -> Self {
        Self {
            engines: vec![],
            residency: Arc::new(residency),
        }
    }

    /// The standard catalogue: `blip`, `blip2` and `llama-vision`. Local engines only
    /// become usable if a loader for their id was registered on `residency`.
    pub fn standard(residency: ResidencyManager, remote: RemoteEngineConfig) -> Self {
        Self::new(residency)
            .with_local(EngineDescriptor::blip(), LocalVariant::Blip)
            .with_local(EngineDescriptor::blip2(), LocalVariant::Blip2)
            .with_remote(EngineDescriptor::llama_vision(), remote)
    }

    pub fn with_local(mut self, descriptor: EngineDescriptor, variant: LocalVariant) -> Self {
        let engine = LocalEngine::new(descriptor, variant, self.residency.clone());
        self.engines.push(CaptionEngine::Local(engine));
        self
    }

    pub fn with_remote(mut self, descriptor: EngineDescriptor, config: RemoteEngineConfig) -> Self {
        self.engines
            .push(CaptionEngine::Remote(RemoteEngine::new(descriptor, config)));
        self
    }

    pub fn get(&self, engine_id: &str) -> CaptionResult<&CaptionEngine> {
        self.engines
            .iter()
            .find(|engine| engine.id() == engine_id)
            .ok_or_else(|| CaptionError::UnknownEngine(engine_id.to_string()))
    }

    pub fn engines(&self) -> &[CaptionEngine] {
        &self.engines
    }

    pub async fn catalogue(&self) -> Vec<EngineInfo> {
        let mut infos = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            infos.push(engine.info().await);
        }
        infos
    }

    pub fn residency(&self) -> &Arc<ResidencyManager> {
        &self.residency
    }
}

/// Loaders for the standard local engines that have model paths configured.
/// Builds without a local backend get none, so every local engine fails to load.
pub fn standard_loaders(models: &HashMap<String, LocalModelPaths>) -> Vec<ModelLoader> {
    #[cfg(feature = "candle")]
    {
        use crate::blip::{BlipModel, BlipSize};

        [(BLIP_ENGINE_ID, BlipSize::Base), (BLIP2_ENGINE_ID, BlipSize::Large)]
            .into_iter()
            .filter_map(|(engine_id, size)| {
                let paths = models.get(engine_id)?.clone();
                Some(ModelLoader::new(engine_id, move || {
                    BlipModel::new(paths.clone(), size)
                }))
            })
            .collect()
    }

    #[cfg(not(feature = "candle"))]
    {
        if !models.is_empty() {
            tracing::warn!("built without a local inference backend, local engines are unavailable");
        }
        vec![]
    }
}
