use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Every person-referring phrase the scan recognises. Only the phrases that parse as a
/// [`PersonTerm`] are counted when the target is detected automatically.
const PERSON_TERMS: &[&str] = &[
    "girl",
    "little girl",
    "young girl",
    "teenage girl",
    "teen girl",
    "female",
    "lady",
    "woman",
    "boy",
    "little boy",
    "young boy",
    "teenage boy",
    "teen boy",
    "male",
    "gentleman",
    "man",
    "people",
    "person",
    "persons",
    "individual",
    "child",
    "children",
    "kids",
    "kid",
];

/// Phrases are matched greedily, longest first.
const MAX_TERM_WORDS: usize = 3;

/// Canonical replacement targets, declared in auto-detection priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString, EnumIter,
)]
pub enum PersonTerm {
    #[strum(serialize = "little girl")]
    LittleGirl,
    #[strum(serialize = "young girl")]
    YoungGirl,
    #[strum(serialize = "girl")]
    Girl,
    #[strum(serialize = "woman")]
    Woman,
    #[strum(serialize = "boy")]
    Boy,
    #[strum(serialize = "man")]
    Man,
    #[strum(serialize = "person")]
    Person,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConsistencyMode {
    None,
    #[default]
    Auto,
    Explicit(PersonTerm),
}

impl From<&str> for ConsistencyMode {
    fn from(value: &str) -> Self {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "none" => ConsistencyMode::None,
            "auto" | "" => ConsistencyMode::Auto,
            other => match other.parse::<PersonTerm>() {
                Ok(term) => ConsistencyMode::Explicit(term),
                Err(_) => {
                    tracing::warn!("unknown consistency mode {:?}, falling back to auto", other);
                    ConsistencyMode::Auto
                }
            },
        }
    }
}

impl From<String> for ConsistencyMode {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<ConsistencyMode> for String {
    fn from(value: ConsistencyMode) -> Self {
        match value {
            ConsistencyMode::None => "none".to_string(),
            ConsistencyMode::Auto => "auto".to_string(),
            ConsistencyMode::Explicit(term) => term.to_string(),
        }
    }
}

/// Length in words of the person phrase starting at `start`, if any.
fn match_at(words: &[&str], start: usize) -> Option<usize> {
    (1..=MAX_TERM_WORDS).rev().find(|len| {
        start + len <= words.len() && PERSON_TERMS.contains(&words[start..start + len].join(" ").as_str())
    })
}

fn predominant_term(words: &[&str]) -> PersonTerm {
    let mut counts: HashMap<PersonTerm, usize> = HashMap::new();

    let mut i = 0;
    while i < words.len() {
        match match_at(words, i) {
            Some(len) => {
                if let Ok(term) = words[i..i + len].join(" ").parse::<PersonTerm>() {
                    *counts.entry(term).or_default() += 1;
                }
                i += len;
            }
            None => i += 1,
        }
    }

    PersonTerm::iter()
        .find(|term| counts.get(term).is_some_and(|count| *count > 0))
        .unwrap_or(PersonTerm::Person)
}

fn replace_terms(words: &[&str], target: PersonTerm) -> String {
    let mut output = Vec::with_capacity(words.len());

    let mut i = 0;
    while i < words.len() {
        match match_at(words, i) {
            Some(len) => {
                output.push(target.as_ref());
                i += len;
            }
            None => {
                output.push(words[i]);
                i += 1;
            }
        }
    }

    output.join(" ")
}

/// Rewrite every person-referring phrase to a single term.
///
/// Outside of [`ConsistencyMode::None`] the caption is lowercased and its whitespace
/// collapsed. A replacement can create a new phrase together with its neighbour
/// ("little kid" becomes "little girl"), so the scan is repeated until the text stops
/// changing. That fixed point is what makes the function idempotent.
pub fn normalize_person_terms(caption: &str, mode: &ConsistencyMode) -> String {
    if *mode == ConsistencyMode::None {
        return caption.to_string();
    }

    let mut current = caption.to_lowercase();
    let max_passes = current.split_whitespace().count() + 2;

    for _ in 0..max_passes {
        let words: Vec<&str> = current.split_whitespace().collect();
        let target = match mode {
            ConsistencyMode::Explicit(term) => *term,
            _ => predominant_term(&words),
        };

        let next = replace_terms(&words, target);
        if next == current {
            break;
        }
        current = next;
    }

    tracing::debug!("normalized person terms: {:?} -> {:?}", caption, current);

    current
}
