// src/matching/phonetic.rs - Blocking key strategies
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rphonetic::DoubleMetaphone;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("punctuation pattern is valid"));

/// How rows are partitioned into comparison blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingStrategy {
    /// No key: every row lands in one block.
    CompareAll,
    FirstLetter,
    FirstTwoChars,
    /// Double Metaphone code of the whole value.
    Phonetic,
    /// Lowercased, punctuation-free, token-sorted form.
    Fingerprint,
    /// Double Metaphone code per token, sorted.
    TokenPhonetic,
}

impl BlockingStrategy {
    pub const ALL: [BlockingStrategy; 6] = [
        BlockingStrategy::CompareAll,
        BlockingStrategy::FirstLetter,
        BlockingStrategy::FirstTwoChars,
        BlockingStrategy::Phonetic,
        BlockingStrategy::Fingerprint,
        BlockingStrategy::TokenPhonetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingStrategy::CompareAll => "none",
            BlockingStrategy::FirstLetter => "first_letter",
            BlockingStrategy::FirstTwoChars => "first_2_chars",
            BlockingStrategy::Phonetic => "phonetic",
            BlockingStrategy::Fingerprint => "fingerprint",
            BlockingStrategy::TokenPhonetic => "token_phonetic",
        }
    }

    /// Whether rows need a computed key at all.
    pub fn is_keyed(&self) -> bool {
        !matches!(self, BlockingStrategy::CompareAll)
    }
}

impl fmt::Display for BlockingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let strategy = match s.trim().to_lowercase().as_str() {
            "none" | "compare_all" => BlockingStrategy::CompareAll,
            "first_letter" => BlockingStrategy::FirstLetter,
            "first_2_chars" | "first_two_chars" => BlockingStrategy::FirstTwoChars,
            "phonetic" | "double_metaphone" => BlockingStrategy::Phonetic,
            "fingerprint" => BlockingStrategy::Fingerprint,
            "token_phonetic" => BlockingStrategy::TokenPhonetic,
            other => bail!(
                "Unknown blocking strategy '{}' (expected one of: {})",
                other,
                BlockingStrategy::ALL
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        Ok(strategy)
    }
}

/// Computes blocking keys for one strategy. Holds the phonetic encoder so a run
/// builds it once.
pub struct KeyGenerator {
    strategy: BlockingStrategy,
    encoder: DoubleMetaphone,
}

impl KeyGenerator {
    pub fn new(strategy: BlockingStrategy) -> Self {
        Self {
            strategy,
            encoder: DoubleMetaphone::default(),
        }
    }

    /// Returns `None` for the compare-all strategy, which bypasses keying.
    pub fn key_for(&self, value: &str) -> Option<String> {
        let key = match self.strategy {
            BlockingStrategy::CompareAll => return None,
            BlockingStrategy::FirstLetter => first_letter_key(value),
            BlockingStrategy::FirstTwoChars => first_two_chars_key(value),
            BlockingStrategy::Phonetic => self.phonetic_code(value),
            BlockingStrategy::Fingerprint => fingerprint_key(value),
            BlockingStrategy::TokenPhonetic => self.token_phonetic_key(value),
        };
        Some(key)
    }

    /// Primary Double Metaphone code of the letters in `word`.
    ///
    /// Values without any codable letters fall back to their uppercased
    /// alphanumerics so numeric values do not all share an empty key.
    pub fn phonetic_code(&self, word: &str) -> String {
        let letters: String = word
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_uppercase)
            .collect();
        if !letters.is_empty() {
            let code = self.encoder.double_metaphone(&letters).primary().to_string();
            if !code.is_empty() {
                return code;
            }
        }
        alphanumeric_upper(word)
    }

    fn token_phonetic_key(&self, value: &str) -> String {
        let mut codes: Vec<String> = tokenize(value)
            .iter()
            .map(|token| self.phonetic_code(token))
            .filter(|code| !code.is_empty())
            .collect();
        codes.sort();
        codes.join(" ")
    }
}

fn alphanumeric_upper(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Lowercased, punctuation-stripped whitespace tokens.
fn tokenize(value: &str) -> Vec<String> {
    let lowered = value.to_lowercase();
    PUNCTUATION
        .replace_all(&lowered, "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn first_letter_key(value: &str) -> String {
    value
        .trim()
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default()
}

pub fn first_two_chars_key(value: &str) -> String {
    alphanumeric_upper(value).chars().take(2).collect()
}

pub fn fingerprint_key(value: &str) -> String {
    let mut tokens = tokenize(value);
    tokens.sort();
    tokens.join(" ")
}
