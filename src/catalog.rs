//! In-memory catalog accumulated by the single writer during a run, plus the
//! aggregate distributions written to `midi_catalog.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::models::{CatalogEntry, SuggestQuery};
use crate::scanner::classify::Category;
use crate::scanner::identity::PatternIdentity;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("storage path already cataloged: {0}")]
    PathOccupied(PathBuf),
}

#[derive(Debug, Default, Clone)]
pub struct Catalog {
    entries: BTreeMap<PathBuf, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. A second entry for the same storage path is rejected.
    pub fn insert(&mut self, entry: CatalogEntry) -> Result<(), CatalogError> {
        if self.entries.contains_key(&entry.storage_path) {
            return Err(CatalogError::PathOccupied(entry.storage_path));
        }
        self.entries.insert(entry.storage_path.clone(), entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, storage_path: &Path) -> Option<&CatalogEntry> {
        self.entries.get(storage_path)
    }

    /// Entries ordered by storage path.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values().filter(move |e| e.category == category)
    }

    /// Entries whose tempo falls in `[min, max]`.
    pub fn in_tempo_range(&self, min: f64, max: f64) -> impl Iterator<Item = &CatalogEntry> {
        self.entries
            .values()
            .filter(move |e| e.tempo >= min && e.tempo <= max)
    }

    /// Matches for a template suggestion, ordered by tempo then path.
    pub fn suggest(&self, query: &SuggestQuery) -> Vec<&CatalogEntry> {
        let mut hits: Vec<&CatalogEntry> =
            self.entries.values().filter(|e| query.matches(e)).collect();
        hits.sort_by(|a, b| {
            a.tempo
                .total_cmp(&b.tempo)
                .then_with(|| a.storage_path.cmp(&b.storage_path))
        });
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        hits
    }

    pub fn identities(&self) -> BTreeSet<PatternIdentity> {
        self.entries.values().map(|e| e.identity.clone()).collect()
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary::from_entries(self.entries.values())
    }
}

impl FromIterator<CatalogEntry> for Catalog {
    /// Later entries for an occupied path are dropped.
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for entry in iter {
            if let Err(e) = catalog.insert(entry) {
                log::warn!("{e}");
            }
        }
        catalog
    }
}

/// "90-99" for 95.4 BPM.
pub fn tempo_decile(tempo: f64) -> String {
    let low = (tempo.max(0.0) as u64) / 10 * 10;
    format!("{}-{}", low, low + 9)
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    pub categories: BTreeMap<String, usize>,
    pub styles: BTreeMap<String, usize>,
    pub tempo_distribution: BTreeMap<String, usize>,
    pub time_signature_distribution: BTreeMap<String, usize>,
    pub track_count_distribution: BTreeMap<String, usize>,
}

impl CatalogSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Self {
        let mut summary = Self {
            timestamp: Utc::now(),
            total_files: 0,
            categories: BTreeMap::new(),
            styles: BTreeMap::new(),
            tempo_distribution: BTreeMap::new(),
            time_signature_distribution: BTreeMap::new(),
            track_count_distribution: BTreeMap::new(),
        };

        for e in entries {
            summary.total_files += 1;
            *summary.categories.entry(e.category.to_string()).or_default() += 1;
            *summary.styles.entry(e.style.to_string()).or_default() += 1;
            *summary.tempo_distribution.entry(tempo_decile(e.tempo)).or_default() += 1;
            *summary
                .time_signature_distribution
                .entry(e.time_signature.clone())
                .or_default() += 1;
            *summary
                .track_count_distribution
                .entry(format!("{} tracks", e.track_count))
                .or_default() += 1;
        }
        summary
    }

    /// Human-readable dump for the CLI.
    pub fn print(&self) {
        println!("Total files: {}", self.total_files);
        for (title, dist) in [
            ("Categories", &self.categories),
            ("Styles", &self.styles),
            ("Tempo", &self.tempo_distribution),
            ("Time signatures", &self.time_signature_distribution),
            ("Track counts", &self.track_count_distribution),
        ] {
            println!("\n{title}:");
            let mut rows: Vec<_> = dist.iter().collect();
            rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (key, count) in rows {
                println!("  {key:<20} {count:>6}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::classify::Style;
    use crate::scanner::identity::derive_identity;

    fn entry(path: &str, category: Category, tempo: f64, tracks: usize) -> CatalogEntry {
        let name = Path::new(path).file_name().unwrap().to_string_lossy().to_string();
        CatalogEntry {
            identity: derive_identity(&name),
            category,
            style: Style::from_tempo(tempo),
            tempo,
            time_signature: "4/4".into(),
            key: "C".into(),
            track_count: tracks,
            note_count: 8,
            duration_secs: 4.0,
            has_drums: false,
            content_hash: String::new(),
            source_path: PathBuf::from("/src").join(&name),
            storage_path: PathBuf::from(path),
            integrated_at: Utc::now(),
        }
    }

    fn sample() -> Catalog {
        [
            entry("/s/groove/a.mid", Category::GroovePattern, 95.0, 1),
            entry("/s/groove/b.mid", Category::GroovePattern, 140.0, 1),
            entry("/s/templates/c.mid", Category::Template, 99.9, 8),
            entry("/s/templates/d.mid", Category::Melody, 72.0, 1),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn storage_path_is_unique() {
        let mut catalog = Catalog::new();
        catalog
            .insert(entry("/s/x.mid", Category::Melody, 100.0, 1))
            .unwrap();
        let err = catalog
            .insert(entry("/s/x.mid", Category::Template, 120.0, 4))
            .unwrap_err();
        assert!(matches!(err, CatalogError::PathOccupied(p) if p == Path::new("/s/x.mid")));
        assert_eq!(catalog.get(Path::new("/s/x.mid")).unwrap().category, Category::Melody);
    }

    #[test]
    fn lookups() {
        let catalog = sample();
        assert_eq!(catalog.by_category(Category::GroovePattern).count(), 2);
        assert_eq!(catalog.by_category(Category::Sample).count(), 0);
        let tempos: Vec<f64> = catalog.in_tempo_range(90.0, 100.0).map(|e| e.tempo).collect();
        assert_eq!(tempos, vec![95.0, 99.9]);
        // inclusive bounds
        assert_eq!(catalog.in_tempo_range(140.0, 140.0).count(), 1);
    }

    #[test]
    fn suggestions_sorted_and_limited() {
        let catalog = sample();
        let hits = catalog.suggest(&SuggestQuery {
            tempo_max: Some(100.0),
            limit: Some(2),
            ..Default::default()
        });
        let tempos: Vec<f64> = hits.iter().map(|e| e.tempo).collect();
        assert_eq!(tempos, vec![72.0, 95.0]);
    }

    #[test]
    fn summary_distributions() {
        let summary = sample().summary();
        assert_eq!(summary.total_files, 4);
        assert_eq!(summary.categories["groove_pattern"], 2);
        assert_eq!(summary.tempo_distribution["90-99"], 2);
        assert_eq!(summary.tempo_distribution["140-149"], 1);
        assert_eq!(summary.tempo_distribution["70-79"], 1);
        assert_eq!(summary.time_signature_distribution["4/4"], 4);
        assert_eq!(summary.track_count_distribution["1 tracks"], 3);
        assert_eq!(summary.track_count_distribution["8 tracks"], 1);
        assert_eq!(summary.styles["medium"], 2);
    }

    #[test]
    fn decile_labels() {
        assert_eq!(tempo_decile(95.4), "90-99");
        assert_eq!(tempo_decile(100.0), "100-109");
        assert_eq!(tempo_decile(-3.0), "0-9");
    }
}
