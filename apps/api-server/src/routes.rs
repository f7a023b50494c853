use crate::{
    config::AppConfig,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as PathParams, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use caption_engine::{EngineKind, GenerationParams, BLIP_ENGINE_ID};
use caption_task::{JobDispatcher, Task, TaskError};
use caption_text::ConsistencyMode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use storage::{sanitize_filename, ImageStore};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

const UPLOAD_FIELD: &str = "files";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: JobDispatcher,
    pub images: Arc<dyn ImageStore>,
    pub config: Arc<AppConfig>,
}

/// Options shared by batch generation and single-image regeneration. Omitted and
/// `null` fields both fall back to their defaults.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CaptionOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub min_words: Option<usize>,
    #[serde(default)]
    pub consistency_mode: Option<ConsistencyMode>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

impl CaptionOptions {
    fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(BLIP_ENGINE_ID)
    }

    fn params(&self) -> GenerationParams {
        let custom_prompt = self.custom_prompt.as_deref().unwrap_or_default().trim();
        GenerationParams {
            min_words: self.min_words.unwrap_or_default(),
            keyword: self.keyword.clone().unwrap_or_default(),
            consistency_mode: self.consistency_mode.clone().unwrap_or_default(),
            custom_prompt: (!custom_prompt.is_empty()).then(|| custom_prompt.to_string()),
            attempt: 0,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct GenerateRequest {
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(flatten)]
    pub options: CaptionOptions,
}

#[derive(Deserialize, Debug)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub options: CaptionOptions,
}

pub fn get_routes(state: AppState) -> Router {
    let body_limit = state.config.limits.max_request_bytes();

    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/models/status", get(models_status))
        .route(
            "/api/upload",
            post(upload_images).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/uploads/:filename", get(serve_image))
        .route("/api/generate", post(generate_captions))
        .route("/api/progress/:task_id", get(task_progress))
        .route("/api/regenerate_caption", post(regenerate_caption))
        .route("/api/config", get(active_config))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any);
            cors
        })
        .with_state(state)
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let models = state.dispatcher.engine_catalogue().await;
    let current_loaded = state.dispatcher.loaded_engine().await;

    Json(json!({
        "models": models,
        "current_loaded": current_loaded,
        "loading_system": "dynamic",
    }))
}

async fn models_status(State(state): State<AppState>) -> Json<Value> {
    let mut models = serde_json::Map::new();
    for info in state.dispatcher.engine_catalogue().await {
        let in_memory = info.descriptor.kind == EngineKind::Local && info.status.loaded;
        models.insert(
            info.descriptor.id.clone(),
            json!({
                "loaded": info.status.loaded,
                "available": info.status.available,
                "in_memory": in_memory,
            }),
        );
    }

    Json(json!({
        "current_loaded": state.dispatcher.loaded_engine().await,
        "loading_system": "dynamic",
        "models": models,
    }))
}

async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let limits = &state.config.limits;
    let mut files = vec![];

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().and_then(sanitize_filename) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        files.push((filename, bytes));
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("no files were uploaded".to_string()));
    }
    if files.len() > limits.max_files {
        return Err(ApiError::BadRequest(format!(
            "at most {} files are allowed",
            limits.max_files
        )));
    }
    let total_size: usize = files.iter().map(|(_, bytes)| bytes.len()).sum();
    if total_size > limits.max_request_bytes() {
        return Err(ApiError::PayloadTooLarge(format!(
            "total upload size exceeds {}MB",
            limits.max_files * limits.max_file_size_mb
        )));
    }

    let mut uploaded = vec![];
    for (filename, bytes) in files {
        state.images.write(&filename, bytes.to_vec()).await?;
        uploaded.push(filename);
    }
    tracing::info!("{} images uploaded", uploaded.len());

    Ok(Json(json!({
        "message": format!("{} files uploaded", uploaded.len()),
        "files": uploaded,
    })))
}

async fn serve_image(
    State(state): State<AppState>,
    PathParams(filename): PathParams<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = match state.images.read(&filename).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Err(TaskError::ImageNotFound(filename).into()),
        Err(e) => return Err(e.into()),
    };
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();

    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes))
}

async fn generate_captions(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<Value>> {
    let files = request.files.unwrap_or_default();
    let max_files = state.config.limits.max_files;
    if files.len() > max_files {
        return Err(ApiError::BadRequest(format!(
            "at most {} files are allowed",
            max_files
        )));
    }

    let task_id = state
        .dispatcher
        .submit(files, request.options.model(), request.options.params())
        .await?;

    Ok(Json(json!({ "task_id": task_id })))
}

async fn task_progress(
    State(state): State<AppState>,
    PathParams(task_id): PathParams<Uuid>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.dispatcher.poll(task_id).await?))
}

async fn regenerate_caption(
    State(state): State<AppState>,
    Json(request): Json<RegenerateRequest>,
) -> ApiResult<Json<Value>> {
    let filename = match request.filename.as_deref() {
        Some(filename) if !filename.is_empty() => filename,
        _ => return Err(ApiError::BadRequest("no image specified".to_string())),
    };
    let model = request.options.model();

    let caption = state
        .dispatcher
        .regenerate_one(filename, model, &request.options.params())
        .await?;

    Ok(Json(json!({
        "success": true,
        "caption": caption,
        "model_used": model,
    })))
}

async fn active_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.config.redacted())
}
