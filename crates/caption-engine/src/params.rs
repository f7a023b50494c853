use caption_text::{CleanupProfile, ConsistencyMode};
use serde::{Deserialize, Serialize};

/// Approximate number of tokens per word, used to turn a word minimum into a token minimum.
const TOKENS_PER_WORD: f64 = 1.3;
const MIN_LENGTH_TOKENS_FLOOR: usize = 10;

/// Per-request generation options. `min_words == 0` means "use the default minimum".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub min_words: usize,
    pub keyword: String,
    pub consistency_mode: ConsistencyMode,
    pub custom_prompt: Option<String>,
    /// Index into the engine's escalation schedule to start from.
    pub attempt: usize,
}

impl GenerationParams {
    pub fn escalated(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Options handed to a local backend for a single decode pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    pub max_length: usize,
    pub min_length: usize,
    pub num_beams: usize,
    pub temperature: f64,
    pub do_sample: bool,
    pub repetition_penalty: f32,
    pub no_repeat_ngram_size: usize,
}

/// One entry of an escalation schedule. Later entries trade precision for length:
/// fewer beams, more randomness and a larger length budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationStep {
    pub num_beams: usize,
    pub temperature: f64,
    pub max_length_factor: f64,
    pub max_length_floor: usize,
}

impl EscalationStep {
    pub const fn new(
        num_beams: usize,
        temperature: f64,
        max_length_factor: f64,
        max_length_floor: usize,
    ) -> Self {
        Self {
            num_beams,
            temperature,
            max_length_factor,
            max_length_floor,
        }
    }

    pub fn decode_params(&self, min_words: usize) -> DecodeParams {
        let max_length = ((min_words as f64 * self.max_length_factor) as usize).max(self.max_length_floor);
        let min_length = ((min_words as f64 * TOKENS_PER_WORD) as usize).max(MIN_LENGTH_TOKENS_FLOOR);

        DecodeParams {
            max_length,
            min_length,
            num_beams: self.num_beams,
            temperature: self.temperature,
            do_sample: true,
            repetition_penalty: 1.2,
            no_repeat_ngram_size: 3,
        }
    }
}

const BLIP_SCHEDULE: [EscalationStep; 3] = [
    EscalationStep::new(7, 1.1, 3.0, 50),
    EscalationStep::new(5, 1.3, 4.5, 75),
    EscalationStep::new(3, 1.6, 9.0, 150),
];

const BLIP2_SCHEDULE: [EscalationStep; 2] = [
    EscalationStep::new(7, 1.1, 2.0, 50),
    EscalationStep::new(5, 1.3, 3.0, 75),
];

/// Profile of a local engine: how it escalates and how its output is cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalVariant {
    Blip,
    Blip2,
}

impl LocalVariant {
    pub fn schedule(&self) -> &'static [EscalationStep] {
        match self {
            LocalVariant::Blip => &BLIP_SCHEDULE,
            LocalVariant::Blip2 => &BLIP2_SCHEDULE,
        }
    }

    pub fn cleanup_profile(&self) -> CleanupProfile {
        match self {
            LocalVariant::Blip => CleanupProfile::Basic,
            LocalVariant::Blip2 => CleanupProfile::Aggressive,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_params_from_word_minimum() {
        let params = BLIP_SCHEDULE[0].decode_params(15);
        assert_eq!(params.max_length, 50);
        assert_eq!(params.min_length, 19);
        assert_eq!(params.num_beams, 7);
        assert!(params.do_sample);

        let params = BLIP_SCHEDULE[0].decode_params(30);
        assert_eq!(params.max_length, 90);
        assert_eq!(params.min_length, 39);

        let params = BLIP_SCHEDULE[2].decode_params(5);
        assert_eq!(params.max_length, 150);
        assert_eq!(params.min_length, 10);
    }

    #[test]
    fn test_schedules_escalate() {
        for variant in [LocalVariant::Blip, LocalVariant::Blip2] {
            let schedule = variant.schedule();
            for pair in schedule.windows(2) {
                assert!(pair[1].temperature > pair[0].temperature);
                assert!(pair[1].num_beams < pair[0].num_beams);
                assert!(pair[1].decode_params(20).max_length > pair[0].decode_params(20).max_length);
            }
        }
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: GenerationParams =
            serde_json::from_str(r#"{"min_words": 20, "consistency_mode": "woman"}"#).unwrap();
        assert_eq!(params.min_words, 20);
        assert_eq!(params.keyword, "");
        assert_eq!(
            params.consistency_mode,
            ConsistencyMode::Explicit(caption_text::PersonTerm::Woman)
        );
        assert_eq!(params.escalated().attempt, 1);
    }
}
