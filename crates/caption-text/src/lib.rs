//! Deterministic post-processing applied to raw captions produced by local engines.
//!
//! The steps are order dependent:
//! 1. person-term consistency normalization
//! 2. artifact cleanup
//! 3. keyword prefix
//! 4. word-limit check, which only reports and never pads
mod cleanup;
mod consistency;
mod limits;

pub use cleanup::{clean_caption, CleanupProfile};
pub use consistency::{normalize_person_terms, ConsistencyMode, PersonTerm};
pub use limits::{
    count_words, effective_min_words, enforce_word_limit, prefix_keyword, WordLimit,
    DEFAULT_MIN_WORDS,
};

#[derive(Debug, Clone)]
pub struct PostProcess<'a> {
    pub consistency: &'a ConsistencyMode,
    pub cleanup: CleanupProfile,
    pub keyword: &'a str,
}

/// Run steps 1-3 of the pipeline. The caller checks step 4 with [`enforce_word_limit`]
/// and decides whether to regenerate.
pub fn post_process(caption: &str, options: &PostProcess) -> String {
    let normalized = normalize_person_terms(caption, options.consistency);
    let cleaned = clean_caption(&normalized, options.cleanup);
    prefix_keyword(&cleaned, options.keyword)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_post_process_order() {
        let mode = ConsistencyMode::Explicit(PersonTerm::Woman);
        let options = PostProcess {
            consistency: &mode,
            cleanup: CleanupProfile::Basic,
            keyword: "ohwx",
        };

        // "girl woman" becomes "woman woman" after normalization and is collapsed by cleanup
        let result = post_process("A girl woman standing  on on the beach", &options);
        assert_eq!(result, "ohwx a woman standing on the beach");
    }

    #[test]
    fn test_post_process_without_consistency() {
        let options = PostProcess {
            consistency: &ConsistencyMode::None,
            cleanup: CleanupProfile::Basic,
            keyword: "",
        };

        let result = post_process("A Girl with a a red hat", &options);
        assert_eq!(result, "A Girl with a red hat");
    }
}
