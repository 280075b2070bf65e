//! Re-parse integrated files and audit the catalog artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

pub use crate::analyzer::Issue;
use crate::analyzer::{self, FileAnalysis};
use crate::db::Database;
use crate::integrate::StorageLayout;
use crate::pipeline::{self, PipelineConfig};
use crate::reports;
use crate::scanner::is_midi_path;

#[derive(Debug, Serialize)]
pub struct UnreadableFile {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct CategoryReport {
    pub name: String,
    pub directory: PathBuf,
    pub total: usize,
    pub valid: usize,
    pub invalid: Vec<FileAnalysis>,
    pub unreadable: Vec<UnreadableFile>,
}

#[derive(Debug, Serialize)]
pub struct MalformedArtifact {
    pub file: String,
    pub reason: String,
}

/// Presence and minimal shape of the catalog artifacts.
#[derive(Debug, Default, Serialize)]
pub struct CatalogAudit {
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub malformed: Vec<MalformedArtifact>,
    pub errors: Vec<MalformedArtifact>,
}

impl CatalogAudit {
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.malformed.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct Removal {
    pub path: PathBuf,
    pub removed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    /// valid / total × 100; absent when there is nothing to validate
    pub success_rate: Option<f64>,
    pub categories: Vec<CategoryReport>,
    pub catalog_audit: CatalogAudit,
    /// Present only when remediation was requested
    pub removed: Option<Vec<Removal>>,
}

fn midi_files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_midi_path(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Re-analyze every MIDI file under `dir`.
pub fn validate_dir(
    name: &str,
    dir: &Path,
    min_duration_secs: f64,
    pool: &rayon::ThreadPool,
) -> CategoryReport {
    let files = midi_files_under(dir);
    let results: Vec<_> = pool.install(|| {
        files
            .par_iter()
            .map(|path| (path, analyzer::analyze_or_flag(path, min_duration_secs)))
            .collect()
    });

    let mut report = CategoryReport {
        name: name.to_string(),
        directory: dir.to_path_buf(),
        total: files.len(),
        valid: 0,
        invalid: Vec::new(),
        unreadable: Vec::new(),
    };
    for (path, result) in results {
        match result {
            Ok(analysis) if analysis.is_clean() => report.valid += 1,
            Ok(analysis) => {
                log::debug!("Invalid {}: {:?}", path.display(), analysis.issues);
                report.invalid.push(analysis);
            }
            Err(e) => {
                log::warn!("{e}");
                report.unreadable.push(UnreadableFile {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    report
}

fn check_json_shape(path: &Path, required: &[&str]) -> std::result::Result<(), String> {
    let text = fs::read_to_string(path).map_err(|e| format!("read error: {e}"))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?;
    let object = value.as_object().ok_or("top level is not an object")?;
    let absent: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if absent.is_empty() {
        Ok(())
    } else {
        Err(format!("missing keys: {}", absent.join(", ")))
    }
}

/// Check that the catalog summary, integration report and catalog DB exist
/// and have the expected top-level structure.
pub fn audit_catalogs(layout: &StorageLayout) -> CatalogAudit {
    let mut audit = CatalogAudit::default();

    for (name, required) in [
        (reports::CATALOG_SUMMARY, &["total_files", "categories"][..]),
        (reports::INTEGRATION_REPORT, &["processed"][..]),
    ] {
        let path = layout.report_path(name);
        if !path.exists() {
            audit.missing.push(name.to_string());
            continue;
        }
        match check_json_shape(&path, required) {
            Ok(()) => audit.present.push(name.to_string()),
            Err(reason) if reason.starts_with("read error") => audit.errors.push(MalformedArtifact {
                file: name.to_string(),
                reason,
            }),
            Err(reason) => audit.malformed.push(MalformedArtifact {
                file: name.to_string(),
                reason,
            }),
        }
    }

    let db_path = layout.db_path();
    let db_name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !db_path.exists() {
        audit.missing.push(db_name);
    } else {
        match Database::open_existing(&db_path).and_then(|db| db.has_catalog_table()) {
            Ok(true) => audit.present.push(db_name),
            Ok(false) => audit.malformed.push(MalformedArtifact {
                file: db_name,
                reason: "no catalog_entries table".to_string(),
            }),
            Err(e) => audit.errors.push(MalformedArtifact {
                file: db_name,
                reason: e.to_string(),
            }),
        }
    }

    audit
}

/// Delete integrated files that failed to parse. Musically empty but
/// well-formed files are left alone.
pub fn remove_corrupt(layout: &StorageLayout, categories: &[CategoryReport]) -> Vec<Removal> {
    let db_path = layout.db_path();
    let db = if db_path.exists() {
        Database::open_existing(&db_path)
            .map_err(|e| log::warn!("Catalog DB not updated during removal: {e}"))
            .ok()
    } else {
        None
    };

    let mut removals = Vec::new();
    for analysis in categories.iter().flat_map(|c| &c.invalid).filter(|a| !a.valid) {
        let path = &analysis.path;
        match fs::remove_file(path) {
            Ok(()) => {
                log::info!("Removed corrupt file {}", path.display());
                if let Some(db) = &db {
                    if let Err(e) = db.remove_storage_path(path) {
                        log::warn!("Failed to drop {} from catalog: {}", path.display(), e);
                    }
                }
                removals.push(Removal {
                    path: path.clone(),
                    removed: true,
                    error: None,
                });
            }
            Err(e) => {
                log::warn!("Failed to remove {}: {}", path.display(), e);
                removals.push(Removal {
                    path: path.clone(),
                    removed: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    removals
}

/// `validate` command. With `fix`, corrupt files are deleted afterwards.
pub fn run_validate(cfg: &PipelineConfig, fix: bool) -> Result<ValidationReport> {
    reports::ensure_writable(cfg.layout.root()).with_context(|| {
        format!(
            "Storage directory {} is not writable",
            cfg.layout.root().display()
        )
    })?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers.max(1))
        .build()
        .context("Failed to build worker pool")?;

    let dirs = cfg.layout.validation_dirs();
    let pb = pipeline::progress_bar(dirs.len() as u64, "Validating...");
    let mut categories = Vec::with_capacity(dirs.len());
    for (name, dir) in dirs {
        let report = validate_dir(name, &dir, cfg.min_duration_secs, &pool);
        log::info!("{name}: {}/{} valid", report.valid, report.total);
        categories.push(report);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let total_files: usize = categories.iter().map(|c| c.total).sum();
    let valid_files: usize = categories.iter().map(|c| c.valid).sum();
    let success_rate = (total_files > 0).then(|| valid_files as f64 / total_files as f64 * 100.0);

    let catalog_audit = audit_catalogs(&cfg.layout);
    let removed = fix.then(|| remove_corrupt(&cfg.layout, &categories));

    let report = ValidationReport {
        timestamp: Utc::now(),
        total_files,
        valid_files,
        invalid_files: total_files - valid_files,
        success_rate,
        categories,
        catalog_audit,
        removed,
    };
    reports::write_json(&cfg.layout.report_path(reports::VALIDATION_REPORT), &report)?;
    Ok(report)
}
