//! Greeting content pools, loaded once from a JSON file.
//!
//! The file maps category name → list of entries. An entry is either a bare
//! string or `{ "text": ..., "audio": ... }`; both normalize to [`Compliment`]
//! here so nothing downstream sees the two shapes.

use crate::types::Compliment;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Well-known category names.
pub mod category {
    /// Before 10:00.
    pub const MORNING: &str = "morning";
    /// 15:00 up to (not including) 18:00.
    pub const FRIDAY_AFTERNOON: &str = "friday-afternoon";
    /// Any other time of day.
    pub const GENERAL: &str = "general";
    /// More than one person in view.
    pub const GROUP: &str = "group";
    /// Someone has lingered in view for a long time.
    pub const LONG_DWELL: &str = "long-dwell";
}

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("failed to read content file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid content JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCompliment {
    Text(String),
    Entry {
        text: String,
        #[serde(default)]
        audio: Option<String>,
    },
}

impl From<RawCompliment> for Compliment {
    fn from(raw: RawCompliment) -> Self {
        match raw {
            RawCompliment::Text(text) => Compliment::new(text),
            RawCompliment::Entry { text, audio } => Compliment {
                text,
                audio: audio.filter(|a| !a.trim().is_empty()),
            },
        }
    }
}

/// Category pools plus the merged pool of every entry.
#[derive(Debug, Clone, Default)]
pub struct ContentPools {
    by_category: BTreeMap<String, Vec<Compliment>>,
    all: Vec<Compliment>,
}

impl ContentPools {
    pub fn from_categories(by_category: BTreeMap<String, Vec<Compliment>>) -> Self {
        let all = by_category.values().flatten().cloned().collect();
        Self { by_category, all }
    }

    /// The single-line pool used when content cannot be loaded.
    pub fn fallback() -> Self {
        Self {
            by_category: BTreeMap::new(),
            all: vec![Compliment::fallback()],
        }
    }

    /// Parse a content document.
    pub fn parse(json: &str) -> Result<Self, ContentError> {
        let raw: BTreeMap<String, Vec<RawCompliment>> = serde_json::from_str(json)?;
        let by_category = raw
            .into_iter()
            .map(|(name, entries)| (name, entries.into_iter().map(Compliment::from).collect()))
            .collect();
        Ok(Self::from_categories(by_category))
    }

    /// Read and parse a content file.
    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let json = std::fs::read_to_string(path).map_err(|source| ContentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&json)
    }

    /// Like [`load`](Self::load), but degrades to [`fallback`](Self::fallback)
    /// on any error. Content is never a reason to stop greeting.
    pub fn load_or_fallback(path: &Path) -> Self {
        match Self::load(path) {
            Ok(pools) => {
                tracing::info!(
                    path = %path.display(),
                    categories = pools.by_category.len(),
                    lines = pools.all.len(),
                    "content loaded"
                );
                pools
            }
            Err(e) => {
                tracing::warn!(error = %e, "content load failed; using fallback line");
                Self::fallback()
            }
        }
    }

    /// Entries for `name`, empty if the category does not exist.
    pub fn category(&self, name: &str) -> &[Compliment] {
        self.by_category.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every entry of every category.
    pub fn all(&self) -> &[Compliment] {
        &self.all
    }

    /// Category names with their entry counts, in name order.
    pub fn categories(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_category
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.len()))
    }

    /// Total number of lines across all categories.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}
