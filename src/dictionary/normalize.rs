//! Locale-aware text folding applied to key phrases and transcripts before
//! any metric sees them.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apostrophes vanish ("don't" → "dont") instead of splitting the word.
static APOSTROPHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"['\u{2019}\u{02BC}]").expect("static regex"));
/// Other punctuation and symbols act as word separators.
static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{P}\p{S}]+").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Primary language subtag, lowercased ("en-US" → "en", "pt_BR" → "pt").
pub fn primary_language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// True when both locales share a primary language.
pub fn same_language(a: &str, b: &str) -> bool {
    primary_language(a) == primary_language(b)
}

/// Lowercase under `locale`. Turkish and Azerbaijani keep the dotted and
/// dotless i distinct.
pub fn fold_case(text: &str, locale: Option<&str>) -> String {
    let turkic = locale
        .map(|l| matches!(primary_language(l).as_str(), "tr" | "az"))
        .unwrap_or(false);
    if !turkic {
        return text.to_lowercase();
    }
    text.chars()
        .map(|c| match c {
            'I' => 'ı',
            '\u{130}' => 'i',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Full folding pipeline: case fold, drop apostrophes, punctuation to
/// spaces, collapse whitespace, trim.
pub fn normalize_phrase(text: &str, locale: Option<&str>) -> String {
    let folded = fold_case(text, locale);
    let folded = APOSTROPHES.replace_all(&folded, "");
    let folded = SEPARATORS.replace_all(&folded, " ");
    WHITESPACE.replace_all(folded.trim(), " ").into_owned()
}

/// The last `count` words of `text`, or `None` when `text` has no more than
/// `count` words.
pub fn trailing_words(text: &str, count: usize) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if count == 0 || words.len() <= count {
        return None;
    }
    Some(words[words.len() - count..].join(" "))
}
