use crate::{
    error::{TaskError, TaskResult},
    store::ProgressStore,
    task::{CaptionResult, Task},
    TaskStatus,
};
use caption_engine::{
    CaptionEngine, EngineInfo, EngineKind, EngineRegistry, EngineSession, GenerationParams,
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use storage::ImageStore;
use uuid::Uuid;

/// Runs caption batches in the background and answers progress queries.
#[derive(Clone)]
pub struct JobDispatcher {
    registry: Arc<EngineRegistry>,
    store: ProgressStore,
    images: Arc<dyn ImageStore>,
}

impl JobDispatcher {
    pub fn new(registry: EngineRegistry, store: ProgressStore, images: Arc<dyn ImageStore>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            images,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Register a task and start it on a background unit. Returns as soon as the task
    /// is pollable.
    pub async fn submit(
        &self,
        filenames: Vec<String>,
        engine_id: &str,
        params: GenerationParams,
    ) -> TaskResult<Uuid> {
        if filenames.is_empty() {
            return Err(TaskError::EmptyBatch);
        }
        let engine = self.registry.get(engine_id)?.clone();

        let task = Task::new(engine_id, filenames.len());
        let task_id = task.id;
        self.store.insert(task).await;
        tracing::info!(
            "task {} created: {} images with {}",
            task_id,
            filenames.len(),
            engine_id
        );

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run(task_id, engine, filenames, params).await;
        });

        Ok(task_id)
    }

    pub async fn poll(&self, task_id: Uuid) -> TaskResult<Task> {
        self.store
            .get(task_id)
            .await
            .ok_or(TaskError::TaskNotFound(task_id))
    }

    /// Caption a single stored image synchronously, outside the progress store. The
    /// engine stays resident afterwards.
    pub async fn regenerate_one(
        &self,
        filename: &str,
        engine_id: &str,
        params: &GenerationParams,
    ) -> TaskResult<String> {
        let engine = self.registry.get(engine_id)?;
        let image = self.read_image(filename).await?;

        tracing::info!("regenerating caption for {} with {}", filename, engine_id);
        Ok(engine.caption(&image, params).await?)
    }

    pub async fn engine_catalogue(&self) -> Vec<EngineInfo> {
        self.registry.catalogue().await
    }

    pub async fn loaded_engine(&self) -> Option<String> {
        self.registry.residency().loaded_engine().await
    }

    /// Release whatever engine is resident. Called on process shutdown.
    pub async fn shutdown(&self) {
        self.registry.residency().evict_all().await;
    }

    async fn read_image(&self, filename: &str) -> TaskResult<Vec<u8>> {
        match self.images.read(filename).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_found() => Err(TaskError::ImageNotFound(filename.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip_all, fields(task_id = %task_id, engine = %engine.id()))]
    async fn run(
        &self,
        task_id: Uuid,
        engine: CaptionEngine,
        filenames: Vec<String>,
        params: GenerationParams,
    ) {
        let is_local = engine.kind() == EngineKind::Local;
        let title = engine.descriptor().title.clone();

        if is_local {
            self.store
                .update(task_id, |task| {
                    task.set_status(
                        TaskStatus::DownloadingModel,
                        Some(format!("Loading model {}...", title)),
                    )
                })
                .await;
        }

        // the session keeps a local engine resident until the whole batch is done
        let mut session = match engine.session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("task {} aborted: {}", task_id, e);
                self.store
                    .update(task_id, |task| task.fail(e.to_string()))
                    .await;
                return;
            }
        };

        if is_local {
            self.store
                .update(task_id, |task| {
                    task.set_status(
                        TaskStatus::ModelLoaded,
                        Some(format!("Model {} loaded", title)),
                    )
                })
                .await;
        }
        self.store
            .update(task_id, |task| {
                task.set_status(TaskStatus::Processing, Some("Generating captions".to_string()))
            })
            .await;

        for filename in &filenames {
            let result = self
                .caption_one(&mut session, engine.id(), filename, &params)
                .await;
            self.store.update(task_id, |task| task.record(result)).await;
        }

        // release before reporting completion so a finished task never leaves a model resident
        drop(session);
        engine.release().await;

        let failed = self
            .store
            .get(task_id)
            .await
            .map(|task| task.results.iter().filter(|r| r.is_failed()).count())
            .unwrap_or_default();
        self.store.update(task_id, |task| task.complete()).await;
        tracing::info!(
            "task {} completed: {} images, {} failed",
            task_id,
            filenames.len(),
            failed
        );
    }

    /// Per-image boundary: every error, panics included, becomes a failed result so the
    /// batch keeps going.
    async fn caption_one(
        &self,
        session: &mut EngineSession<'_>,
        engine_id: &str,
        filename: &str,
        params: &GenerationParams,
    ) -> CaptionResult {
        let work = async {
            let image = self.read_image(filename).await?;
            Ok::<_, TaskError>(session.caption(&image, params).await?)
        };

        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(caption)) => CaptionResult::captioned(filename, engine_id, caption),
            Ok(Err(e)) => {
                tracing::warn!("failed to caption {}: {}", filename, e);
                CaptionResult::failed(filename, engine_id, e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!("captioning {} panicked: {}", filename, reason);
                CaptionResult::failed(filename, engine_id, reason)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "caption generation panicked".to_string()
    }
}
