use crate::{
    engine::EngineDescriptor,
    error::{CaptionError, CaptionResult},
    remote_image::prepare_remote_image,
    traits::CaptionGenerator,
    GenerationParams,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};

pub const DEFAULT_PROMPT: &str = "Describe this image in detail.";
pub const DEFAULT_ENDPOINT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_REMOTE_MODEL: &str = "meta-llama/llama-3.2-11b-vision-instruct";

#[derive(Debug, Clone)]
pub struct RemoteEngineConfig {
    pub endpoint_url: String,
    pub model: String,
    pub api_key: String,
    /// Longest image side sent to the service, in pixels.
    pub max_image_size: u32,
    pub image_quality: u8,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            model: DEFAULT_REMOTE_MODEL.to_string(),
            api_key: String::new(),
            max_image_size: 384,
            image_quality: 85,
            timeout: Duration::from_secs(30),
            max_tokens: 200,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatCompletionChoice>,
}

/// Captions through an OpenAI style chat completion endpoint. Never resident, so it
/// bypasses the residency manager entirely.
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    descriptor: EngineDescriptor,
    config: Arc<RemoteEngineConfig>,
    client: reqwest::Client,
}

impl RemoteEngine {
    pub fn new(descriptor: EngineDescriptor, config: RemoteEngineConfig) -> Self {
        Self {
            descriptor,
            config: Arc::new(config),
            client: reqwest::Client::new(),
        }
    }

    pub fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &RemoteEngineConfig {
        &self.config
    }

    fn headers(&self) -> CaptionResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| CaptionError::GenerationFailure(format!("invalid api key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn transport_error(&self, e: reqwest::Error) -> CaptionError {
        if e.is_timeout() {
            CaptionError::RemoteTimeout(self.config.timeout)
        } else {
            CaptionError::GenerationFailure(format!("remote request failed: {}", e))
        }
    }
}

impl CaptionGenerator for RemoteEngine {
    /// One request, no retries. The reply is trimmed and otherwise returned verbatim.
    #[tracing::instrument(skip_all, fields(engine = %self.descriptor.id, model = %self.config.model))]
    async fn generate(&self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        if self.config.api_key.is_empty() {
            return Err(CaptionError::MissingApiKey);
        }

        let prepared = prepare_remote_image(
            image,
            self.config.max_image_size,
            self.config.image_quality,
        )?;

        let prompt = params
            .custom_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .unwrap_or(DEFAULT_PROMPT);

        let body = json!({
            "model": &self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": prepared.data_url } }
                ]
            }],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        tracing::debug!("requesting caption from {}", self.config.endpoint_url);

        let response = self
            .client
            .post(&self.config.endpoint_url)
            .headers(self.headers()?)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("remote service replied {}: {}", status, body);
            return Err(CaptionError::RemoteService {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CaptionError::RemoteTimeout(self.config.timeout)
            } else {
                CaptionError::GenerationFailure(format!("unexpected remote response: {}", e))
            }
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                CaptionError::GenerationFailure("remote response has no caption".to_string())
            })
    }
}
