use caption_engine::{
    LocalModelPaths, RemoteEngineConfig, DEFAULT_ENDPOINT_URL, DEFAULT_REMOTE_MODEL,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

pub const CONFIG_PATH_ENV: &str = "CAPTION_CONFIG";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const DEFAULT_CONFIG_PATH: &str = "config.json";
const EXAMPLE_CONFIG_FILE_NAME: &str = "config.example.json";
const REDACTED: &str = "********";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ApiKeys {
    pub openrouter: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub remote_model_max_image_size: u32,
    pub image_quality: u8,
    pub download_image_quality: u8,
    pub openrouter_model: String,
    pub remote_timeout_secs: u64,
    /// How long finished tasks stay pollable. `0` keeps them forever.
    pub task_retention_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remote_model_max_image_size: 384,
            image_quality: 85,
            download_image_quality: 95,
            openrouter_model: DEFAULT_REMOTE_MODEL.to_string(),
            remote_timeout_secs: 30,
            task_retention_secs: 3600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            debug_mode: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub max_files: usize,
    pub max_file_size_mb: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: 100,
            max_file_size_mb: 200,
        }
    }
}

impl Limits {
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_files * self.max_file_size_bytes()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub openrouter_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            openrouter_url: DEFAULT_ENDPOINT_URL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Paths {
    pub upload_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

/// Contents of `config.json`. Every section falls back to its defaults when missing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_keys: ApiKeys,
    pub settings: Settings,
    pub server: ServerConfig,
    pub limits: Limits,
    pub endpoints: Endpoints,
    pub paths: Paths,
    /// Weights for the local engines, keyed by engine id.
    pub models: HashMap<String, LocalModelPaths>,
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl AppConfig {
    /// Read the config at `path`, seeding it from `config.example.json` next to it when
    /// it does not exist yet. Unreadable or malformed files give the defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            let example = path.with_file_name(EXAMPLE_CONFIG_FILE_NAME);
            if example.exists() {
                match std::fs::copy(&example, path) {
                    Ok(_) => tracing::info!("created {} from {}", path.display(), example.display()),
                    Err(e) => tracing::warn!("failed to create {}: {}", path.display(), e),
                }
            }
        }

        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => {
                    tracing::info!("config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::error!("failed to parse {}: {}, using defaults", path.display(), e);
                    AppConfig::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {}, using defaults", path.display(), e);
                AppConfig::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|key| !key.is_empty()) {
            self.api_keys.openrouter = key;
        }
        if self.api_keys.openrouter.is_empty() {
            tracing::warn!("no OpenRouter api key configured, remote captioning is disabled");
        }
    }

    pub fn remote_engine_config(&self) -> RemoteEngineConfig {
        RemoteEngineConfig {
            endpoint_url: self.endpoints.openrouter_url.clone(),
            model: self.settings.openrouter_model.clone(),
            api_key: self.api_keys.openrouter.clone(),
            max_image_size: self.settings.remote_model_max_image_size,
            image_quality: self.settings.image_quality,
            timeout: Duration::from_secs(self.settings.remote_timeout_secs),
            ..Default::default()
        }
    }

    pub fn task_retention(&self) -> Option<Duration> {
        match self.settings.task_retention_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.api_keys.openrouter.is_empty() {
            config.api_keys.openrouter = REDACTED.to_string();
        }
        config
    }
}
