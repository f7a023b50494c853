use crate::traits::LocalModel;
use futures::{future::BoxFuture, Future, FutureExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Where a local backend finds its weights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelPaths {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

pub type BoxedLocalModel = Box<dyn LocalModel>;

type CreateModelFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<BoxedLocalModel>> + Send + Sync>;

/// Knows how to build one local engine's backend. Holds no model itself, the
/// residency manager owns whatever is currently loaded.
pub struct ModelLoader {
    engine_id: String, // for better logging
    create_model_fn: CreateModelFn,
}

impl ModelLoader {
    pub fn new<T, TFut, TFn>(engine_id: impl Into<String>, create_model: TFn) -> Self
    where
        T: LocalModel + 'static,
        TFut: Future<Output = anyhow::Result<T>> + Send + 'static,
        TFn: Fn() -> TFut + Send + Sync + 'static,
    {
        Self {
            engine_id: engine_id.into(),
            create_model_fn: Box::new(move || {
                create_model()
                    .map(|result| result.map(|model| Box::new(model) as BoxedLocalModel))
                    .boxed()
            }),
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub async fn load(&self) -> anyhow::Result<BoxedLocalModel> {
        debug!("loading model for engine {}", self.engine_id);
        let model = (self.create_model_fn)().await?;
        info!("engine {} loaded", self.engine_id);
        Ok(model)
    }

    pub fn offload(&self, mut model: BoxedLocalModel) {
        model.release();
        drop(model);
        info!("engine {} offloaded", self.engine_id);
    }
}

impl std::fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("engine_id", &self.engine_id)
            .finish()
    }
}
