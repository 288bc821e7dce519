//! Feature extraction for tariff schedule analysis.
//!
//! Provides pure functions used by the builder and the scorer:
//! - Code normalization and display formatting
//! - Rate-text parsing ("16.5%", "Free", compound rates)
//! - Label cleaning and catch-all detection
//! - Tokenization with plural folding and phonetic term matching

use rphonetic::{Encoder, Metaphone, Soundex};
use thiserror::Error;

/// Reasons a raw schedule code is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("Empty code")]
    Empty,
    #[error("Invalid character {0:?} in code")]
    NonDigit(char),
    #[error("Code has {len} digits, expected {min}..={max}")]
    Length { len: usize, min: usize, max: usize },
}

/// Normalize a raw code to its digit string.
///
/// Dots, spaces and hyphens are accepted as separators; anything else is
/// rejected.
pub fn parse_code(raw: &str, min_len: usize, max_len: usize) -> Result<String, CodeError> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            '.' | ' ' | '-' => {}
            other => return Err(CodeError::NonDigit(other)),
        }
    }

    if digits.is_empty() {
        return Err(CodeError::Empty);
    }
    if digits.len() < min_len || digits.len() > max_len {
        return Err(CodeError::Length {
            len: digits.len(),
            min: min_len,
            max: max_len,
        });
    }

    Ok(digits)
}

/// Dotted display form: "6109100004" -> "6109.10.00.04".
pub fn format_code(digits: &str) -> String {
    if digits.len() <= 4 {
        return digits.to_string();
    }
    let (heading, rest) = digits.split_at(4);
    let mut out = heading.to_string();
    for chunk in rest.as_bytes().chunks(2) {
        out.push('.');
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    out
}

/// Two-digit chapter of a normalized code.
pub fn chapter(code: &str) -> Option<&str> {
    code.get(..2).filter(|c| c.chars().all(|ch| ch.is_ascii_digit()))
}

/// Outcome of parsing a rate string once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedRate {
    /// No rate text at all
    Absent,
    /// Ad valorem percent ("Free" is 0)
    Percent(f64),
    /// Text present but no ad valorem component found
    Unparseable,
}

/// Parse free-form rate text.
///
/// Compound rates ("2.7¢/kg + 5%") yield their ad valorem component.
pub fn parse_rate(text: &str) -> ParsedRate {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParsedRate::Absent;
    }
    if trimmed.to_ascii_lowercase().starts_with("free") {
        return ParsedRate::Percent(0.0);
    }

    if let Some(pos) = trimmed.find('%') {
        let number: String = trimmed[..pos]
            .trim_end()
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return match number.parse::<f64>() {
            Ok(p) if p.is_finite() => ParsedRate::Percent(p),
            _ => ParsedRate::Unparseable,
        };
    }

    match trimmed.parse::<f64>() {
        Ok(p) if p.is_finite() && p >= 0.0 => ParsedRate::Percent(p),
        _ => ParsedRate::Unparseable,
    }
}

/// Collapse whitespace, drop leading dash bullets and the trailing colon.
pub fn clean_label(description: &str) -> String {
    let collapsed = description.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_whitespace())
        .trim_end_matches(|c: char| c == ':' || c.is_whitespace())
        .to_string()
}

/// "Other"-style fallback labels.
pub fn is_catch_all(label: &str) -> bool {
    let lower = label
        .trim()
        .trim_end_matches(|c: char| c == ':' || c == '.')
        .to_lowercase();
    lower == "other"
        || lower.starts_with("other ")
        || lower.starts_with("other,")
        || lower.starts_with("others")
}

/// Normalize text for comparison.
pub fn normalize_text(text: &str) -> String {
    text.to_uppercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fold a normalized (uppercase) word to its singular form.
pub fn fold_plural(word: &str) -> String {
    if word.len() <= 3 {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("IES") {
        return format!("{}Y", stem);
    }
    for suffix in ["SSES", "XES", "CHES", "SHES"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('S') && !word.ends_with("SS") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Normalized, plural-folded tokens.
///
/// Hyphens and apostrophes join their neighbours ("T-shirts" -> "TSHIRT",
/// "men's" -> "MEN").
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .map(fold_plural)
        .collect()
}

/// Phonetic encoding results for a token.
#[derive(Debug, Clone, Default)]
pub struct PhoneticCodes {
    pub soundex: Option<String>,
    pub metaphone: Option<String>,
}

/// Compute phonetic encodings for a token.
pub fn compute_phonetics(text: &str) -> PhoneticCodes {
    let soundex = Soundex::default();
    let metaphone = Metaphone::default();

    let soundex_code = soundex.encode(text);
    let metaphone_code = metaphone.encode(text);

    PhoneticCodes {
        soundex: if soundex_code.is_empty() { None } else { Some(soundex_code) },
        metaphone: if metaphone_code.is_empty() { None } else { Some(metaphone_code) },
    }
}

/// Check if two tokens are phonetically similar.
pub fn phonetic_match(text1: &str, text2: &str) -> Option<(String, String)> {
    let codes1 = compute_phonetics(text1);
    let codes2 = compute_phonetics(text2);

    if let (Some(s1), Some(s2)) = (&codes1.soundex, &codes2.soundex) {
        if s1 == s2 {
            return Some(("soundex".to_string(), s1.clone()));
        }
    }

    if let (Some(m1), Some(m2)) = (&codes1.metaphone, &codes2.metaphone) {
        if m1 == m2 {
            return Some(("metaphone".to_string(), m1.clone()));
        }
    }

    None
}

/// Compute Levenshtein edit distance between two strings.
pub fn edit_distance(s1: &str, s2: &str) -> usize {
    let s1: Vec<char> = s1.chars().collect();
    let s2: Vec<char> = s2.chars().collect();

    let mut prev: Vec<usize> = (0..=s2.len()).collect();
    let mut curr = vec![0; s2.len() + 1];

    for i in 1..=s1.len() {
        curr[0] = i;
        for j in 1..=s2.len() {
            let cost = if s1[i - 1] == s2[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[s2.len()]
}

/// Shortest keyword eligible for the phonetic fallback.
const PHONETIC_MIN_LEN: usize = 5;

/// Whether `term` occurs in already-tokenized label text.
///
/// Multi-word terms must appear as a contiguous token run.
pub fn term_matches(label_tokens: &[String], term: &str) -> bool {
    let term_tokens = tokenize(term);
    if term_tokens.is_empty() || term_tokens.len() > label_tokens.len() {
        return false;
    }

    label_tokens
        .windows(term_tokens.len())
        .any(|window| window == term_tokens.as_slice())
}

/// Loose match for a single long term that may be misspelled.
///
/// A label token matches when it shares the first letter, sounds the same
/// and is within two edits ("coton" ~ "cotton"). Tokens listed in `known`
/// are real vocabulary words, not misspellings, and never match loosely.
pub fn term_sounds_like(label_tokens: &[String], term: &str, known: &[String]) -> bool {
    if term_matches(label_tokens, term) {
        return true;
    }

    let term_tokens = tokenize(term);
    if term_tokens.len() != 1 || term_tokens[0].len() < PHONETIC_MIN_LEN {
        return false;
    }
    let term = &term_tokens[0];
    label_tokens.iter().any(|token| {
        token.len() >= PHONETIC_MIN_LEN
            && !known.contains(token)
            && token.chars().next() == term.chars().next()
            && edit_distance(token, term) <= 2
            && phonetic_match(token, term).is_some()
    })
}
