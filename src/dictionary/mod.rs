//! Command dictionary and transcript batches.
//! Dictionaries arrive from the persistence collaborator, either as in-memory
//! entries or as its JSON export; both paths validate the same way.

pub mod normalize;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use self::normalize::{normalize_phrase, primary_language};

/// One user-defined command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandEntry {
    key_phrase: String,
    locale: String,
    payload_id: u64,
}

impl CommandEntry {
    pub fn new(key_phrase: impl Into<String>, locale: impl Into<String>, payload_id: u64) -> Self {
        Self {
            key_phrase: key_phrase.into(),
            locale: locale.into(),
            payload_id,
        }
    }

    pub fn key_phrase(&self) -> &str {
        &self.key_phrase
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn payload_id(&self) -> u64 {
        self.payload_id
    }
}

/// On-disk export format.
#[derive(Debug, Deserialize)]
struct DictionaryFile {
    #[serde(default)]
    version: u32,
    entries: Vec<CommandEntry>,
}

#[derive(Debug)]
pub enum DictionaryError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Empty,
    BlankKey { payload_id: u64 },
    DuplicateKey { key_phrase: String, locale: String },
}

impl std::fmt::Display for DictionaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DictionaryError::Io(e) => write!(f, "dictionary IO error: {e}"),
            DictionaryError::Parse(e) => write!(f, "dictionary parse error: {e}"),
            DictionaryError::Empty => write!(f, "dictionary has no entries"),
            DictionaryError::BlankKey { payload_id } => {
                write!(f, "entry for payload {payload_id} has a blank key phrase")
            }
            DictionaryError::DuplicateKey { key_phrase, locale } => {
                write!(f, "duplicate key phrase '{key_phrase}' for locale {locale}")
            }
        }
    }
}

impl std::error::Error for DictionaryError {}

impl From<std::io::Error> for DictionaryError {
    fn from(e: std::io::Error) -> Self {
        DictionaryError::Io(e)
    }
}

impl From<serde_json::Error> for DictionaryError {
    fn from(e: serde_json::Error) -> Self {
        DictionaryError::Parse(e)
    }
}

/// Ordered, immutable set of commands, unique by key phrase within a locale.
/// Key phrases are folded once at load time.
#[derive(Debug, Clone)]
pub struct CommandDictionary {
    version: u32,
    entries: Vec<CommandEntry>,
    folded_keys: Vec<String>,
    /// Distinct primary languages of the entries, sorted.
    languages: Vec<String>,
}

impl CommandDictionary {
    pub fn new(entries: Vec<CommandEntry>) -> Result<Self, DictionaryError> {
        Self::with_version(0, entries)
    }

    pub fn with_version(version: u32, entries: Vec<CommandEntry>) -> Result<Self, DictionaryError> {
        if entries.is_empty() {
            return Err(DictionaryError::Empty);
        }

        let mut folded_keys = Vec::with_capacity(entries.len());
        let mut seen: HashSet<(String, String)> = HashSet::with_capacity(entries.len());
        for entry in &entries {
            let folded = normalize_phrase(&entry.key_phrase, Some(&entry.locale));
            if folded.is_empty() {
                return Err(DictionaryError::BlankKey {
                    payload_id: entry.payload_id,
                });
            }
            let locale = entry.locale.trim().to_lowercase();
            if !seen.insert((folded.clone(), locale)) {
                return Err(DictionaryError::DuplicateKey {
                    key_phrase: entry.key_phrase.clone(),
                    locale: entry.locale.clone(),
                });
            }
            folded_keys.push(folded);
        }

        let mut languages: Vec<String> = entries
            .iter()
            .map(|e| primary_language(&e.locale))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        languages.sort();

        Ok(Self {
            version,
            entries,
            folded_keys,
            languages,
        })
    }

    /// Load the persistence collaborator's JSON export.
    pub fn load_from_file(path: &Path) -> Result<Self, DictionaryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, DictionaryError> {
        let file: DictionaryFile = serde_json::from_str(content)?;
        Self::with_version(file.version, file.entries)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    /// Primary languages present in the dictionary.
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Entries paired with their folded key phrase, in dictionary order.
    pub fn iter(&self) -> impl Iterator<Item = (&CommandEntry, &str)> {
        self.entries
            .iter()
            .zip(self.folded_keys.iter().map(String::as_str))
    }
}

/// One recognizer hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Ordered recognizer alternatives for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptBatch {
    transcripts: Vec<Transcript>,
}

impl TranscriptBatch {
    /// Rejects an empty batch and confidences outside [0, 1].
    pub fn new(transcripts: Vec<Transcript>) -> Result<Self, String> {
        if transcripts.is_empty() {
            return Err("transcript batch is empty".into());
        }
        if let Some(bad) = transcripts
            .iter()
            .find(|t| !t.confidence.is_finite() || !(0.0..=1.0).contains(&t.confidence))
        {
            return Err(format!(
                "transcript confidence {} outside [0, 1] for '{}'",
                bad.confidence, bad.text
            ));
        }
        Ok(Self { transcripts })
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty()
    }

    /// Fold every transcript once per language, so each key phrase is
    /// compared with text folded under the same rules as the key itself.
    pub fn prepare<'a>(&self, languages: impl IntoIterator<Item = &'a str>) -> PreparedBatch {
        let fold_all = |locale: Option<&str>| -> Vec<String> {
            self.transcripts
                .iter()
                .map(|t| normalize_phrase(&t.text, locale))
                .collect()
        };
        let by_language = languages
            .into_iter()
            .map(|lang| (primary_language(lang), fold_all(Some(lang))))
            .collect();
        PreparedBatch {
            neutral: fold_all(None),
            by_language,
        }
    }
}

/// Folded transcripts, shared read-only by all tasks of a pass.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    neutral: Vec<String>,
    by_language: HashMap<String, Vec<String>>,
}

impl PreparedBatch {
    /// Transcripts folded for an entry locale; languages that were not
    /// prepared get the locale-neutral fold.
    pub fn folded_for(&self, locale: &str) -> &[String] {
        self.by_language
            .get(&primary_language(locale))
            .unwrap_or(&self.neutral)
    }

    pub fn len(&self) -> usize {
        self.neutral.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neutral.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folded_keys() {
        let dict = CommandDictionary::new(vec![CommandEntry::new("Turn Off WiFi!", "en", 1)]).unwrap();
        let (entry, key) = dict.iter().next().unwrap();
        assert_eq!(entry.payload_id(), 1);
        assert_eq!(key, "turn off wifi");
    }

    #[test]
    fn test_empty_dictionary_rejected() {
        assert!(matches!(
            CommandDictionary::new(Vec::new()),
            Err(DictionaryError::Empty)
        ));
    }

    #[test]
    fn test_duplicate_within_locale_rejected() {
        let result = CommandDictionary::new(vec![
            CommandEntry::new("lights on", "en", 1),
            CommandEntry::new("Lights On", "EN", 2),
        ]);
        assert!(matches!(result, Err(DictionaryError::DuplicateKey { .. })));
    }

    #[test]
    fn test_same_key_different_locale_allowed() {
        let dict = CommandDictionary::new(vec![
            CommandEntry::new("taxi", "en", 1),
            CommandEntry::new("taxi", "de", 2),
        ])
        .unwrap();
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_blank_key_rejected() {
        let result = CommandDictionary::new(vec![CommandEntry::new(" ?! ", "en", 9)]);
        assert!(matches!(result, Err(DictionaryError::BlankKey { payload_id: 9 })));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "version": 3,
            "entries": [
                { "key_phrase": "call mum", "locale": "en", "payload_id": 2 },
                { "key_phrase": "turn off wifi", "locale": "en", "payload_id": 1 }
            ]
        }"#;
        let dict = CommandDictionary::from_json(json).unwrap();
        assert_eq!(dict.version(), 3);
        assert_eq!(dict.entries()[1].key_phrase(), "turn off wifi");
    }

    #[test]
    fn test_batch_validation() {
        assert!(TranscriptBatch::new(Vec::new()).is_err());
        assert!(TranscriptBatch::new(vec![Transcript::new("hi", 1.5)]).is_err());
        assert!(TranscriptBatch::new(vec![Transcript::new("hi", f32::NAN)]).is_err());
        let batch = TranscriptBatch::new(vec![Transcript::new("Please, turn off WiFi.", 0.9)]).unwrap();
        assert_eq!(batch.prepare(["en"]).folded_for("en-US"), ["please turn off wifi".to_string()]);
    }

    #[test]
    fn test_batch_folded_per_language() {
        let dict = CommandDictionary::new(vec![
            CommandEntry::new("IŞIK AÇ", "tr", 7),
            CommandEntry::new("LIGHTS ON", "en", 8),
        ])
        .unwrap();
        assert_eq!(dict.languages(), ["en".to_string(), "tr".to_string()]);

        let batch = TranscriptBatch::new(vec![Transcript::new("IŞIK AÇ", 0.9)]).unwrap();
        let prepared = batch.prepare(dict.languages().iter().map(String::as_str));
        let (_, tr_key) = dict.iter().next().unwrap();
        assert_eq!(prepared.folded_for("tr-TR")[0], tr_key);
        assert_eq!(prepared.folded_for("en")[0], "işik aç");
        // unprepared language falls back to the neutral fold
        assert_eq!(prepared.folded_for("de")[0], "işik aç");
    }

    #[test]
    fn test_duplicate_found_in_large_dictionary() {
        let mut entries: Vec<CommandEntry> = (0..5_000)
            .map(|i| CommandEntry::new(format!("command number {i}"), "en", i))
            .collect();
        assert_eq!(CommandDictionary::new(entries.clone()).unwrap().len(), 5_000);

        entries.push(CommandEntry::new("Command Number 17", "en-GB", 99_999));
        let unique_locale = CommandDictionary::new(entries.clone());
        assert!(unique_locale.is_ok(), "locale tags differ, keys may repeat");

        entries.push(CommandEntry::new("command number 4999!", "EN", 100_000));
        assert!(matches!(
            CommandDictionary::new(entries),
            Err(DictionaryError::DuplicateKey { .. })
        ));
    }
}
