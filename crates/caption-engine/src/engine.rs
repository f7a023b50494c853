use crate::{
    error::CaptionResult,
    local::{LocalEngine, LocalSession},
    remote::RemoteEngine,
    traits::CaptionGenerator,
    GenerationParams,
};
use serde::{Deserialize, Serialize};

pub const BLIP_ENGINE_ID: &str = "blip";
pub const BLIP2_ENGINE_ID: &str = "blip2";
pub const LLAMA_VISION_ENGINE_ID: &str = "llama-vision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub id: String,
    /// Display name, `name` on the wire.
    #[serde(rename = "name", alias = "title")]
    pub title: String,
    pub description: String,
    pub kind: EngineKind,
}

impl EngineDescriptor {
    pub fn new(id: &str, title: &str, description: &str, kind: EngineKind) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            kind,
        }
    }

    pub fn blip() -> Self {
        Self::new(
            BLIP_ENGINE_ID,
            "BLIP",
            "Fast local captioning with the BLIP base model",
            EngineKind::Local,
        )
    }

    pub fn blip2() -> Self {
        Self::new(
            BLIP2_ENGINE_ID,
            "BLIP-2",
            "More detailed local captions, needs more GPU memory",
            EngineKind::Local,
        )
    }

    pub fn llama_vision() -> Self {
        Self::new(
            LLAMA_VISION_ENGINE_ID,
            "Llama 3.2 Vision",
            "Remote captioning through an OpenRouter compatible API",
            EngineKind::Remote,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub loaded: bool,
    pub available: bool,
}

/// A catalogue entry: the descriptor plus its current residency flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    #[serde(flatten)]
    pub descriptor: EngineDescriptor,
    #[serde(flatten)]
    pub status: EngineStatus,
}

/// The closed set of engine variants. Selected once by id, then driven through
/// [`CaptionGenerator`] without further dispatch on names.
#[derive(Debug, Clone)]
pub enum CaptionEngine {
    Local(LocalEngine),
    Remote(RemoteEngine),
}

impl CaptionEngine {
    pub fn descriptor(&self) -> &EngineDescriptor {
        match self {
            CaptionEngine::Local(engine) => engine.descriptor(),
            CaptionEngine::Remote(engine) => engine.descriptor(),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor().id
    }

    pub fn kind(&self) -> EngineKind {
        self.descriptor().kind
    }

    /// Make the engine resident and hold it for the lifetime of the session.
    /// Remote engines have nothing to load.
    pub async fn session(&self) -> CaptionResult<EngineSession<'_>> {
        match self {
            CaptionEngine::Local(engine) => Ok(EngineSession::Local(engine.session().await?)),
            CaptionEngine::Remote(engine) => Ok(EngineSession::Remote(engine)),
        }
    }

    pub async fn release(&self) {
        if let CaptionEngine::Local(engine) = self {
            engine.release().await;
        }
    }

    pub async fn status(&self) -> EngineStatus {
        match self {
            CaptionEngine::Local(engine) => engine.status().await,
            CaptionEngine::Remote(_) => EngineStatus {
                loaded: false,
                available: true,
            },
        }
    }

    pub async fn info(&self) -> EngineInfo {
        EngineInfo {
            descriptor: self.descriptor().clone(),
            status: self.status().await,
        }
    }

    /// Generate a finished caption: raw generation followed by whatever
    /// post-processing the variant applies.
    pub async fn caption(&self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        self.session().await?.caption(image, params).await
    }
}

/// An engine ready to caption. A local session owns the residency slot until dropped.
#[derive(Debug)]
pub enum EngineSession<'a> {
    Local(LocalSession<'a>),
    Remote(&'a RemoteEngine),
}

impl EngineSession<'_> {
    pub async fn caption(&mut self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        match self {
            EngineSession::Local(session) => session.caption(image, params).await,
            EngineSession::Remote(engine) => engine.generate(image, params).await,
        }
    }
}

impl CaptionGenerator for CaptionEngine {
    async fn generate(&self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        match self {
            CaptionEngine::Local(engine) => engine.generate(image, params).await,
            CaptionEngine::Remote(engine) => engine.generate(image, params).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_engine_info_serializes_flat() {
        let info = EngineInfo {
            descriptor: EngineDescriptor::blip(),
            status: EngineStatus {
                loaded: true,
                available: true,
            },
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["id"], "blip");
        assert_eq!(value["name"], "BLIP");
        assert!(value.get("title").is_none());
        assert_eq!(value["kind"], "local");
        assert_eq!(value["loaded"], true);
        assert_eq!(value["available"], true);
    }

    #[test]
    fn test_descriptor_accepts_either_name_field() {
        let named: EngineDescriptor = serde_json::from_value(serde_json::json!({
            "id": "blip2",
            "name": "BLIP-2",
            "description": "",
            "kind": "local",
        }))
        .unwrap();
        assert_eq!(named.title, "BLIP-2");

        let titled: EngineDescriptor = serde_json::from_value(serde_json::json!({
            "id": "llama-vision",
            "title": "Llama 3.2 Vision",
            "description": "",
            "kind": "remote",
        }))
        .unwrap();
        assert_eq!(titled.title, "Llama 3.2 Vision");
        assert_eq!(titled.kind, EngineKind::Remote);
    }
}
