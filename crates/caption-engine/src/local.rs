use crate::{
    engine::{EngineDescriptor, EngineStatus},
    error::{CaptionError, CaptionResult},
    params::LocalVariant,
    residency::{ModelLease, ResidencyManager},
    traits::CaptionGenerator,
    GenerationParams,
};
use caption_text::{
    clean_caption, count_words, effective_min_words, enforce_word_limit, post_process,
    PostProcess, WordLimit,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// A caption engine backed by a model held in the shared residency slot.
#[derive(Clone)]
pub struct LocalEngine {
    descriptor: EngineDescriptor,
    variant: LocalVariant,
    residency: Arc<ResidencyManager>,
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("descriptor", &self.descriptor)
            .field("variant", &self.variant)
            .finish()
    }
}

impl LocalEngine {
    pub fn new(
        descriptor: EngineDescriptor,
        variant: LocalVariant,
        residency: Arc<ResidencyManager>,
    ) -> Self {
        Self {
            descriptor,
            variant,
            residency,
        }
    }

    pub fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    pub fn variant(&self) -> LocalVariant {
        self.variant
    }

    /// Load the engine if needed and keep it resident for as long as the session lives.
    pub async fn session(&self) -> CaptionResult<LocalSession<'_>> {
        let lease = self.residency.acquire(&self.descriptor.id).await?;
        Ok(LocalSession {
            engine: self,
            lease,
        })
    }

    pub async fn release(&self) {
        self.residency.evict(&self.descriptor.id).await
    }

    pub async fn status(&self) -> EngineStatus {
        self.residency.status(&self.descriptor.id).await
    }

    pub async fn caption(&self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        self.session().await?.caption(image, params).await
    }
}

impl CaptionGenerator for LocalEngine {
    async fn generate(&self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        self.session().await?.generate(image, params).await
    }
}

/// A local engine with its model leased. Every caption produced through one session
/// runs on the same loaded model.
#[derive(Debug)]
pub struct LocalSession<'a> {
    engine: &'a LocalEngine,
    lease: ModelLease<'a>,
}

impl LocalSession<'_> {
    /// Full local pipeline: generate, post-process, check the word minimum and, if the
    /// caption is short, regenerate once from the next escalation step and accept that.
    pub async fn caption(&mut self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        let options = PostProcess {
            consistency: &params.consistency_mode,
            cleanup: self.engine.variant.cleanup_profile(),
            keyword: &params.keyword,
        };

        let raw = self.generate(image, params).await?;
        let caption = post_process(&raw, &options);

        match enforce_word_limit(&caption, params.min_words) {
            WordLimit::Sufficient(caption) => Ok(caption),
            WordLimit::Insufficient { words, required } => {
                debug!(
                    "caption has {} of {} words, regenerating from attempt {}",
                    words,
                    required,
                    params.attempt + 1
                );
                match self.generate(image, &params.escalated()).await {
                    Ok(raw) => Ok(post_process(&raw, &options).trim().to_string()),
                    Err(e) => {
                        warn!("regeneration failed, keeping the short caption: {}", e);
                        Ok(caption.trim().to_string())
                    }
                }
            }
        }
    }

    /// Walk the escalation schedule from `params.attempt` until a cleaned candidate
    /// reaches the word minimum. Short output is never an error: the longest candidate
    /// wins once the schedule is exhausted.
    pub async fn generate(&mut self, image: &[u8], params: &GenerationParams) -> CaptionResult<String> {
        let engine = self.engine;
        let engine_id = engine.descriptor.id.as_str();
        let min_words = effective_min_words(params.min_words);
        let profile = engine.variant.cleanup_profile();
        let schedule = engine.variant.schedule();
        let start = params.attempt.min(schedule.len().saturating_sub(1));

        let mut best: Option<(usize, String)> = None;

        for index in start..schedule.len() {
            let decode_params = schedule[index].decode_params(min_words);

            let raw = match self.lease.decode(image, &decode_params).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("{} decode attempt {} failed: {:#}", engine_id, index, e);
                    return match best {
                        Some((_, caption)) => Ok(caption),
                        None => Err(CaptionError::GenerationFailure(format!("{:#}", e))),
                    };
                }
            };

            let candidate = clean_caption(&raw, profile);
            let words = count_words(&candidate);
            debug!(
                "{} attempt {} produced {} words (min {})",
                engine_id, index, words, min_words
            );

            if words >= min_words {
                return Ok(candidate);
            }
            if best.as_ref().map_or(true, |(best_words, _)| words > *best_words) {
                best = Some((words, candidate));
            }
        }

        best.map(|(_, caption)| caption).ok_or_else(|| {
            CaptionError::GenerationFailure(format!(
                "engine {} has an empty escalation schedule",
                engine_id
            ))
        })
    }
}
