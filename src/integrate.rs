//! Copies classified files into the categorized storage tree.
//!
//! Layout under the storage root:
//!
//! ```text
//! groove/categorized/{slow,medium,fast}/
//! templates/{chord-progressions,melodies,samples,templates}/
//! incoming/remote/            downloads awaiting integration
//! catalog.db, *.json          catalog store and reports
//! ```
//!
//! Target names are deterministic, so a rerun over the same sources maps
//! every file to the path it got last time. A path already holding the
//! same bytes is reused; anything else that is taken gets a numeric suffix.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::analyzer::FileAnalysis;
use crate::db::models::CatalogEntry;
use crate::filenames;
use crate::midi::Meter;
use crate::reports::{self, ReportError};
use crate::scanner::classify::{Category, Classification};
use crate::scanner::identity::PatternIdentity;

pub const DEFAULT_MAX_SUFFIX_ATTEMPTS: u32 = 1000;

const GROOVE_DIR: &str = "groove";
const TEMPLATES_DIR: &str = "templates";
const INCOMING_DIR: &str = "incoming/remote";
const DB_FILE: &str = "catalog.db";

/// Room for the longest collision suffix, `_1000`.
const COLLISION_SUFFIX_RESERVE: usize = 5;

#[derive(Error, Debug)]
pub enum IntegrateError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no free name for {target} after {attempts} suffixes")]
    NamingCollisionExhausted { target: PathBuf, attempts: u32 },
}

impl From<ReportError> for IntegrateError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Io { path, source } => Self::Io { path, source },
            ReportError::Json(e) => Self::Io {
                path: PathBuf::new(),
                source: std::io::Error::other(e),
            },
        }
    }
}

/// Paths of everything the pipeline owns under the storage root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn groove_root(&self) -> PathBuf {
        self.root.join(GROOVE_DIR).join("categorized")
    }

    pub fn category_dir(&self, category: Category, tempo: f64) -> PathBuf {
        match category {
            Category::GroovePattern => self.groove_root().join(tempo_bucket(tempo)),
            Category::ChordProgression => self.root.join(TEMPLATES_DIR).join("chord-progressions"),
            Category::Melody => self.root.join(TEMPLATES_DIR).join("melodies"),
            Category::Sample => self.root.join(TEMPLATES_DIR).join("samples"),
            Category::Template => self.root.join(TEMPLATES_DIR).join("templates"),
        }
    }

    /// Top-level directories holding integrated copies; discovery skips these.
    pub fn integrated_roots(&self) -> Vec<PathBuf> {
        vec![self.root.join(GROOVE_DIR), self.root.join(TEMPLATES_DIR)]
    }

    /// Validation groups: name and directory.
    pub fn validation_dirs(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("groove", self.groove_root()),
            ("chord-progressions", self.category_dir(Category::ChordProgression, 0.0)),
            ("melodies", self.category_dir(Category::Melody, 0.0)),
            ("samples", self.category_dir(Category::Sample, 0.0)),
            ("templates", self.category_dir(Category::Template, 0.0)),
        ]
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join(INCOMING_DIR)
    }

    pub fn report_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }
}

/// Groove sub-directory by tempo.
pub fn tempo_bucket(tempo: f64) -> &'static str {
    if tempo < 80.0 {
        "slow"
    } else if tempo < 120.0 {
        "medium"
    } else {
        "fast"
    }
}

/// `{category}_{stem}_{tempo}bpm_{n}-{d}_{tracks}tracks.mid`
///
/// The source stem is sanitized and shortened until the whole name, with
/// or without a `_N` collision suffix, is a fixed point of
/// [`filenames::sanitize_filename`].
pub fn target_file_name(
    category: Category,
    stem: &str,
    tempo: f64,
    meter: Meter,
    tracks: usize,
) -> String {
    let details = format!(
        "{}bpm_{}_{}tracks",
        tempo.max(0.0) as u64,
        meter.slug(),
        tracks
    );
    let fixed = category.as_str().len() + details.len() + 2 + COLLISION_SUFFIX_RESERVE;
    let budget = filenames::MAX_STEM_CHARS.saturating_sub(fixed);

    let clean: String = filenames::sanitize_stem(stem).chars().take(budget).collect();
    let name = match clean.trim_end_matches('_') {
        "" => format!("{}_{details}.mid", category.as_str()),
        stem => format!("{}_{stem}_{details}.mid", category.as_str()),
    };
    filenames::sanitize_filename(&name)
}

fn with_suffix(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => path.with_file_name(format!("{stem}_{n}.{}", ext.to_string_lossy())),
        None => path.with_file_name(format!("{stem}_{n}")),
    }
}

/// First free candidate among `path`, `path_1`, ... `path_{max}`.
/// `taken` decides whether a candidate is unavailable.
pub fn free_path(
    path: &Path,
    max_attempts: u32,
    mut taken: impl FnMut(&Path) -> bool,
) -> Result<PathBuf, IntegrateError> {
    if !taken(path) {
        return Ok(path.to_path_buf());
    }
    for n in 1..=max_attempts {
        let candidate = with_suffix(path, n);
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(IntegrateError::NamingCollisionExhausted {
        target: path.to_path_buf(),
        attempts: max_attempts,
    })
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hash_file(path: &Path) -> Result<String, IntegrateError> {
    let bytes = fs::read(path).map_err(|source| IntegrateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content_hash(&bytes))
}

/// A file ready for the writer: analyzed, classified, identified, hashed.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub analysis: FileAnalysis,
    pub classification: Classification,
    pub identity: PatternIdentity,
    pub content_hash: String,
}

#[derive(Debug)]
pub enum Outcome {
    Integrated(CatalogEntry),
    /// Same identity and content as a file already integrated this run
    Duplicate { of: PathBuf },
}

/// Single writer for one run. Tracks which paths this run has claimed and
/// which (identity, content) pairs it has already stored.
pub struct Integrator {
    layout: StorageLayout,
    max_suffix_attempts: u32,
    claimed: HashSet<PathBuf>,
    stored: HashMap<(PatternIdentity, String), PathBuf>,
}

impl Integrator {
    pub fn new(layout: StorageLayout, max_suffix_attempts: u32) -> Self {
        Self {
            layout,
            max_suffix_attempts,
            claimed: HashSet::new(),
            stored: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Where `file` would go before collision handling.
    pub fn target_path(&self, file: &PreparedFile) -> PathBuf {
        let a = &file.analysis;
        let category = file.classification.category;
        self.layout.category_dir(category, a.estimated_tempo).join(target_file_name(
            category,
            &a.stem(),
            a.estimated_tempo,
            a.time_signature,
            a.track_count,
        ))
    }

    /// Copy `file` into storage. Never overwrites a distinct file and never
    /// touches the source.
    pub fn integrate(&mut self, file: &PreparedFile) -> Result<Outcome, IntegrateError> {
        let key = (file.identity.clone(), file.content_hash.clone());
        if let Some(existing) = self.stored.get(&key) {
            return Ok(Outcome::Duplicate { of: existing.clone() });
        }

        let target = self.target_path(file);
        let mut reuse = false;
        let mut hash_error = None;
        let claimed = &self.claimed;
        let dest = free_path(&target, self.max_suffix_attempts, |candidate| {
            if claimed.contains(candidate) {
                return true;
            }
            if !candidate.exists() {
                reuse = false;
                return false;
            }
            match hash_file(candidate) {
                Ok(hash) if hash == file.content_hash => {
                    reuse = true;
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    hash_error.get_or_insert(e);
                    true
                }
            }
        });
        let dest = match dest {
            Ok(dest) => dest,
            // an unreadable candidate explains exhaustion better than the count
            Err(e) => return Err(hash_error.unwrap_or(e)),
        };

        if reuse {
            log::debug!("Reusing identical {}", dest.display());
        } else {
            let bytes = fs::read(&file.analysis.path).map_err(|source| IntegrateError::Io {
                path: file.analysis.path.clone(),
                source,
            })?;
            reports::write_atomic(&dest, &bytes)?;
            log::debug!("{} -> {}", file.analysis.path.display(), dest.display());
        }

        self.claimed.insert(dest.clone());
        self.stored.insert(key, dest.clone());

        let a = &file.analysis;
        Ok(Outcome::Integrated(CatalogEntry {
            identity: file.identity.clone(),
            category: file.classification.category,
            style: file.classification.style,
            tempo: a.estimated_tempo,
            time_signature: a.time_signature.to_string(),
            key: a.estimated_key.clone(),
            track_count: a.track_count,
            note_count: a.note_count,
            duration_secs: a.duration_secs,
            has_drums: a.has_drums,
            content_hash: file.content_hash.clone(),
            source_path: a.path.clone(),
            storage_path: dest,
            integrated_at: Utc::now(),
        }))
    }
}
