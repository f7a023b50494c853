use crate::{
    engine::EngineStatus,
    error::{CaptionError, CaptionResult},
    loader::{BoxedLocalModel, ModelLoader},
    params::DecodeParams,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info};

struct ResidentModel {
    engine_id: String,
    model: BoxedLocalModel,
}

#[derive(Debug, Default)]
struct ResidencyState {
    loaded_engine_id: Option<String>,
    unavailable: HashSet<String>,
}

/// Exclusive use of the resident model. Holding a lease keeps the slot locked, so no
/// other engine can be loaded until it is dropped.
pub struct ModelLease<'a> {
    slot: MutexGuard<'a, Option<ResidentModel>>,
}

impl ModelLease<'_> {
    pub fn engine_id(&self) -> Option<&str> {
        self.slot.as_ref().map(|resident| resident.engine_id.as_str())
    }

    pub async fn decode(&mut self, image: &[u8], params: &DecodeParams) -> anyhow::Result<String> {
        match self.slot.as_mut() {
            Some(resident) => resident.model.decode(image, params).await,
            None => anyhow::bail!("no engine is resident"),
        }
    }
}

impl std::fmt::Debug for ModelLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLease")
            .field("engine_id", &self.engine_id())
            .finish()
    }
}

/// Owns the single slot in which a local engine may be resident.
///
/// The slot mutex is held across the whole "offload previous, load requested"
/// sequence and for as long as a caller holds the model returned by [`Self::acquire`],
/// so at most one local model is alive at any instant. `state` mirrors the slot for
/// readers that must not wait behind a long load. Lock order is always slot, then state.
pub struct ResidencyManager {
    loaders: HashMap<String, ModelLoader>,
    slot: Mutex<Option<ResidentModel>>,
    state: RwLock<ResidencyState>,
}

impl Default for ResidencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResidencyManager {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            slot: Mutex::new(None),
            state: RwLock::new(ResidencyState::default()),
        }
    }

    pub fn with_loader(mut self, loader: ModelLoader) -> Self {
        self.register(loader);
        self
    }

    pub fn register(&mut self, loader: ModelLoader) {
        self.loaders.insert(loader.engine_id().to_string(), loader);
    }

    /// Make `engine_id` the resident engine and lease its model.
    /// The lease blocks every other load until it is dropped.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, engine_id: &str) -> CaptionResult<ModelLease<'_>> {
        let mut slot = self.slot.lock().await;

        let resident = slot.as_ref().is_some_and(|m| m.engine_id == engine_id);

        if !resident {
            if self.state.read().await.unavailable.contains(engine_id) {
                return Err(CaptionError::EngineUnavailable(engine_id.to_string()));
            }

            if let Some(previous) = slot.take() {
                debug!("evicting {} to make room for {}", previous.engine_id, engine_id);
                self.offload(previous).await;
            }

            match self.load(engine_id).await {
                Ok(model) => {
                    *slot = Some(ResidentModel {
                        engine_id: engine_id.to_string(),
                        model,
                    });
                    self.state.write().await.loaded_engine_id = Some(engine_id.to_string());
                }
                Err(e) => {
                    error!("failed to load engine {}: {:#}", engine_id, e);
                    self.state
                        .write()
                        .await
                        .unavailable
                        .insert(engine_id.to_string());
                    return Err(CaptionError::EngineLoadFailure {
                        engine: engine_id.to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        Ok(ModelLease { slot })
    }

    /// Release `engine_id` if it is the resident engine. Evicting anything else is a no-op.
    pub async fn evict(&self, engine_id: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|m| m.engine_id == engine_id) {
            if let Some(resident) = slot.take() {
                self.offload(resident).await;
            }
        }
    }

    pub async fn evict_all(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(resident) = slot.take() {
            self.offload(resident).await;
        }
    }

    pub async fn status(&self, engine_id: &str) -> EngineStatus {
        let state = self.state.read().await;
        EngineStatus {
            loaded: state.loaded_engine_id.as_deref() == Some(engine_id),
            available: !state.unavailable.contains(engine_id),
        }
    }

    pub async fn loaded_engine(&self) -> Option<String> {
        self.state.read().await.loaded_engine_id.clone()
    }

    async fn load(&self, engine_id: &str) -> anyhow::Result<BoxedLocalModel> {
        match self.loaders.get(engine_id) {
            Some(loader) => loader.load().await,
            None => anyhow::bail!("no local backend is registered for engine {}", engine_id),
        }
    }

    async fn offload(&self, resident: ResidentModel) {
        let ResidentModel { engine_id, model } = resident;
        match self.loaders.get(&engine_id) {
            Some(loader) => loader.offload(model),
            None => drop(model),
        }
        self.state.write().await.loaded_engine_id = None;
        info!("engine {} evicted", engine_id);
    }
}
