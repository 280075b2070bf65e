use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::classify::{Category, Style};
use crate::scanner::identity::PatternIdentity;

/// One integrated file. `storage_path` is unique across the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identity: PatternIdentity,
    pub category: Category,
    pub style: Style,
    pub tempo: f64,
    /// "4/4"
    pub time_signature: String,
    pub key: String,
    pub track_count: usize,
    pub note_count: usize,
    pub duration_secs: f64,
    pub has_drums: bool,
    /// SHA-256 of the file bytes, hex
    pub content_hash: String,
    pub source_path: PathBuf,
    pub storage_path: PathBuf,
    pub integrated_at: DateTime<Utc>,
}

/// Filters for template suggestion. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SuggestQuery {
    pub category: Option<Category>,
    pub style: Option<Style>,
    pub tempo_min: Option<f64>,
    pub tempo_max: Option<f64>,
    pub limit: Option<usize>,
}

impl SuggestQuery {
    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        self.category.is_none_or(|c| entry.category == c)
            && self.style.is_none_or(|s| entry.style == s)
            && self.tempo_min.is_none_or(|t| entry.tempo >= t)
            && self.tempo_max.is_none_or(|t| entry.tempo <= t)
    }
}
