use lazy_static::lazy_static;
use regex::Regex;

/// How hard a caption is scrubbed. BLIP output mostly suffers from repetition, BLIP-2
/// additionally hallucinates prices, places, brands and French fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupProfile {
    #[default]
    Basic,
    Aggressive,
}

const PLACE_NAMES: &[&str] = &[
    "marysville", "canada", "france", "paris", "london", "new york", "tokyo", "berlin",
    "madrid", "rome", "barcelona", "milan", "amsterdam", "vienna", "italy", "spain",
    "germany", "japan", "china", "korea", "mexico", "brazil",
];

const FRENCH_PHRASES: &[&str] = &[
    "portait une", "vidienne", "curle", "boux", "tinglers", "cheveux", "pantalle", "romanes",
    "photo", "une femme", "jeune fille", "avec", "dans", "sur", "pour", "avec les", "et une",
    "les cheveux", "romanes photo", "une vidienne", "curle boux",
];

const BRANDS_AND_PRODUCTS: &[&str] = &[
    "lillyhilfshsockwear", "thermal compression", "leggings", "bernies 2018",
    "laurice bergmetscher", "nelis marica", "gr 1 4 class", "project bernies", "apple tree",
    "design challenge", "annual girls", "class project",
];

const HALLUCINATED_OBJECTS: &[&str] = &[
    "toothbrush", "knife", "sword", "gun", "weapon", "tool", "instrument", "device",
    "machine", "equipment", "apparatus", "gadget",
];

const FUNCTION_WORDS: &[&str] = &["the", "a", "an", "and", "in", "on", "at", "to", "of", "with", "for"];

/// Longest repeated phrase collapsed by [`collapse_repeated_phrases`].
const MAX_REPEATED_PHRASE_WORDS: usize = 3;

/// Case-insensitive whole-word alternation, longest phrases first so that multi-word
/// entries win over their prefixes.
fn word_list(words: &[&str]) -> Regex {
    let mut words = words.to_vec();
    words.sort_by_key(|w| std::cmp::Reverse(w.len()));
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("word list regex is valid")
}

lazy_static! {
    static ref PRICE: Regex =
        Regex::new(r"\$\d+(?:\.\d+)?(?:\s*-\s*\$\d+(?:\.\d+)?)?").expect("price regex is valid");
    static ref LONG_NUMBER: Regex = Regex::new(r"\b\d{3,}\b").expect("number regex is valid");
    static ref HAND_PHRASE: Regex = Regex::new(
        r"(?i)\b(?:her right hand|her left hand|her hand)\s+(?:on|in|with)\s+(?:her right hand|her left hand|her hand)\b"
    )
    .expect("hand phrase regex is valid");
    static ref STRANGE_CHARS: Regex = Regex::new(r"[^\w\s.,!?-]").expect("char regex is valid");
    static ref PLACES: Regex = word_list(PLACE_NAMES);
    static ref FRENCH: Regex = word_list(FRENCH_PHRASES);
    static ref BRANDS: Regex = word_list(BRANDS_AND_PRODUCTS);
    static ref OBJECTS: Regex = word_list(HALLUCINATED_OBJECTS);
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop the second copy of any phrase of up to [`MAX_REPEATED_PHRASE_WORDS`] words that
/// is immediately repeated, until no such repetition is left.
fn collapse_repeated_phrases(text: &str) -> String {
    let mut words: Vec<&str> = text.split_whitespace().collect();

    loop {
        let before = words.len();
        let mut i = 0;
        while i < words.len() {
            let repeated = (1..=MAX_REPEATED_PHRASE_WORDS)
                .take_while(|n| i + 2 * n <= words.len())
                .find(|&n| words[i..i + n] == words[i + n..i + 2 * n]);

            match repeated {
                Some(n) => {
                    words.drain(i + n..i + 2 * n);
                }
                None => i += 1,
            }
        }
        if words.len() == before {
            break;
        }
    }

    words.join(" ")
}

/// "The the", "on On" and friends, compared case-insensitively.
fn collapse_function_words(text: &str) -> String {
    let mut output: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        let duplicate = output.last().is_some_and(|last| {
            last.eq_ignore_ascii_case(word)
                && FUNCTION_WORDS.contains(&word.to_ascii_lowercase().as_str())
        });
        if !duplicate {
            output.push(word);
        }
    }

    output.join(" ")
}

fn strip_artifacts(text: &str) -> String {
    let text = PRICE.replace_all(text, "");
    let text = PLACES.replace_all(&text, "");
    let text = FRENCH.replace_all(&text, "");
    let text = BRANDS.replace_all(&text, "");
    let text = LONG_NUMBER.replace_all(&text, "");
    let text = OBJECTS.replace_all(&text, "");
    text.into_owned()
}

/// Remove generation artifacts and collapse whitespace to single spaces.
pub fn clean_caption(caption: &str, profile: CleanupProfile) -> String {
    let text = match profile {
        CleanupProfile::Aggressive => strip_artifacts(caption),
        CleanupProfile::Basic => caption.to_string(),
    };

    let text = collapse_repeated_phrases(&text);
    let text = HAND_PHRASE.replace_all(&text, "her hand");
    let text = collapse_function_words(&text);

    match profile {
        CleanupProfile::Aggressive => squash_whitespace(&STRANGE_CHARS.replace_all(&text, "")),
        CleanupProfile::Basic => text,
    }
}
