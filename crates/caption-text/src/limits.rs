/// Minimum word count used when a request does not specify one (sent as `0`).
pub const DEFAULT_MIN_WORDS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordLimit {
    /// The trimmed caption, which has at least the required number of words.
    Sufficient(String),
    Insufficient { words: usize, required: usize },
}

impl WordLimit {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, WordLimit::Sufficient(_))
    }
}

pub fn effective_min_words(min_words: usize) -> usize {
    if min_words == 0 {
        DEFAULT_MIN_WORDS
    } else {
        min_words
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Check a caption against the minimum word count. Short captions are reported, never
/// padded; regenerating is up to the caller.
pub fn enforce_word_limit(caption: &str, min_words: usize) -> WordLimit {
    let required = effective_min_words(min_words);
    let words = count_words(caption);

    if words < required {
        WordLimit::Insufficient { words, required }
    } else {
        WordLimit::Sufficient(caption.trim().to_string())
    }
}

pub fn prefix_keyword(caption: &str, keyword: &str) -> String {
    if keyword.is_empty() {
        caption.to_string()
    } else {
        format!("{} {}", keyword, caption)
    }
}
