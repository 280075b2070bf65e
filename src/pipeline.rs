//! Batch orchestration: discover → analyze → classify → integrate → persist.
//!
//! Analysis runs on a bounded rayon pool one chunk at a time; the calling
//! thread is the only writer to storage and to the catalog.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

use crate::analyzer::{self, AnalyzeError};
use crate::catalog::{Catalog, CatalogSummary};
use crate::config::{self, AppConfig};
use crate::db::Database;
use crate::db::models::{CatalogEntry, SuggestQuery};
use crate::integrate::{self, Integrator, Outcome, PreparedFile, StorageLayout};
use crate::reports;
use crate::scanner::{self, DiscoveryResult, SourceFile, classify, identity};

/// Resolved settings handed to every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_dirs: Vec<PathBuf>,
    pub layout: StorageLayout,
    pub workers: usize,
    pub min_duration_secs: f64,
    pub max_suffix_attempts: u32,
}

impl PipelineConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            source_dirs: app.source_dirs.clone(),
            layout: StorageLayout::new(app.storage_dir.clone()),
            workers: app.resolve_workers(),
            min_duration_secs: app.validation.min_duration_secs,
            max_suffix_attempts: app.integration.max_suffix_attempts,
        }
    }

    pub fn with_sources(mut self, dirs: Vec<PathBuf>) -> Self {
        if !dirs.is_empty() {
            self.source_dirs = dirs;
        }
        self
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(w) = workers {
            self.workers = config::resolve_workers(w);
        }
        self
    }

    pub fn require_sources(&self) -> Result<()> {
        if self.source_dirs.is_empty() {
            bail!("No source directories: pass DIRS or set source_dirs in the config file");
        }
        Ok(())
    }

    /// Configured source dirs plus the remote download staging dir.
    pub fn discovery_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.source_dirs.clone();
        let incoming = self.layout.incoming_dir();
        if incoming.is_dir() && !roots.contains(&incoming) {
            roots.push(incoming);
        }
        roots
    }
}

pub(crate) fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message);
    pb
}

fn ensure_storage(cfg: &PipelineConfig) -> Result<()> {
    reports::ensure_writable(cfg.layout.root()).with_context(|| {
        format!(
            "Storage directory {} is not writable",
            cfg.layout.root().display()
        )
    })
}

// --- discover ---------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DiscoveryReport<'a> {
    pub timestamp: DateTime<Utc>,
    pub roots: &'a [PathBuf],
    pub total_files: usize,
    pub total_bytes: u64,
    pub skipped_empty: u64,
    pub unreadable: u64,
    pub files: &'a [SourceFile],
}

pub fn discover(cfg: &PipelineConfig) -> DiscoveryResult {
    let roots = cfg.discovery_roots();
    log::info!("Discovering MIDI files under {} root(s)", roots.len());
    scanner::discover(&roots, &cfg.layout.integrated_roots())
}

fn write_discovery_report(cfg: &PipelineConfig, result: &DiscoveryResult) -> Result<()> {
    let report = DiscoveryReport {
        timestamp: Utc::now(),
        roots: &result.roots,
        total_files: result.total(),
        total_bytes: result.total_bytes(),
        skipped_empty: result.skipped_empty,
        unreadable: result.unreadable,
        files: &result.files,
    };
    reports::write_json(&cfg.layout.report_path(reports::DISCOVERY_REPORT), &report)?;
    Ok(())
}

/// `discover` command.
pub fn run_discover(cfg: &PipelineConfig) -> Result<DiscoveryResult> {
    ensure_storage(cfg)?;
    let result = discover(cfg);
    write_discovery_report(cfg, &result)?;
    Ok(result)
}

// --- integrate --------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct FileError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DuplicateRecord {
    pub path: PathBuf,
    pub duplicate_of: PathBuf,
}

/// Integrated files that carry analysis issues (kept, but validation will flag them).
#[derive(Debug, Serialize)]
pub struct FlaggedFile {
    pub path: PathBuf,
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IntegrationReport {
    pub timestamp: DateTime<Utc>,
    pub discovered: usize,
    pub processed: Vec<CatalogEntry>,
    pub duplicates: Vec<DuplicateRecord>,
    pub flagged: Vec<FlaggedFile>,
    pub errors: Vec<FileError>,
    pub categories: BTreeMap<String, Vec<PathBuf>>,
}

pub struct IntegrationRun {
    pub catalog: Catalog,
    pub report: IntegrationReport,
}

/// Read, hash, analyze, classify and identify one file. Runs on worker threads.
pub fn prepare(source: &SourceFile, min_duration_secs: f64) -> Result<PreparedFile, AnalyzeError> {
    let bytes = std::fs::read(&source.path).map_err(|e| AnalyzeError::Io {
        path: source.path.clone(),
        source: e,
    })?;
    let analysis = analyzer::analyze_bytes(&source.path, &bytes, min_duration_secs).map_err(|e| {
        AnalyzeError::Parse {
            path: source.path.clone(),
            source: e,
        }
    })?;
    Ok(PreparedFile {
        classification: classify::classify(&analysis),
        identity: identity::derive_identity(&analysis.filename),
        content_hash: integrate::content_hash(&bytes),
        analysis,
    })
}

/// Integrate `files` into storage. Per-file failures are recorded, never fatal.
pub fn integrate_files(cfg: &PipelineConfig, files: &[SourceFile]) -> Result<IntegrationRun> {
    let workers = cfg.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to build worker pool")?;

    let mut integrator = Integrator::new(cfg.layout.clone(), cfg.max_suffix_attempts);
    let mut catalog = Catalog::new();
    let mut report = IntegrationReport {
        timestamp: Utc::now(),
        discovered: files.len(),
        processed: Vec::new(),
        duplicates: Vec::new(),
        flagged: Vec::new(),
        errors: Vec::new(),
        categories: BTreeMap::new(),
    };

    log::info!("Integrating {} files with {} workers", files.len(), workers);
    let pb = progress_bar(files.len() as u64, "Integrating...");

    // Chunk size = workers * 2 bounds memory to one chunk of analyses.
    for chunk in files.chunks(workers * 2) {
        let prepared: Vec<_> = pool.install(|| {
            chunk
                .par_iter()
                .map(|source| {
                    let result = prepare(source, cfg.min_duration_secs);
                    pb.inc(1);
                    result
                })
                .collect()
        });

        for (source, result) in chunk.iter().zip(prepared) {
            let file = match result {
                Ok(file) => file,
                Err(e) => {
                    log::warn!("{e}");
                    report.errors.push(FileError {
                        path: source.path.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match integrator.integrate(&file) {
                Ok(Outcome::Integrated(entry)) => {
                    if let Err(e) = catalog.insert(entry.clone()) {
                        log::warn!("{e}");
                        report.errors.push(FileError {
                            path: source.path.clone(),
                            error: e.to_string(),
                        });
                        continue;
                    }
                    if !file.analysis.issues.is_empty() {
                        report.flagged.push(FlaggedFile {
                            path: entry.storage_path.clone(),
                            issues: file.analysis.issues.iter().map(ToString::to_string).collect(),
                        });
                    }
                    report
                        .categories
                        .entry(entry.category.to_string())
                        .or_default()
                        .push(entry.storage_path.clone());
                    report.processed.push(entry);
                }
                Ok(Outcome::Duplicate { of }) => {
                    log::debug!("Duplicate {} of {}", source.path.display(), of.display());
                    report.duplicates.push(DuplicateRecord {
                        path: source.path.clone(),
                        duplicate_of: of,
                    });
                }
                Err(e) => {
                    log::warn!("Failed to integrate {}: {}", source.path.display(), e);
                    report.errors.push(FileError {
                        path: source.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        pb.set_message(format!(
            "{} integrated, {} errors",
            report.processed.len(),
            report.errors.len()
        ));
    }

    pb.finish_with_message(format!(
        "Done: {} integrated, {} duplicates, {} errors",
        report.processed.len(),
        report.duplicates.len(),
        report.errors.len()
    ));

    Ok(IntegrationRun { catalog, report })
}

/// Write the catalog DB and summary, replacing what a previous run left.
pub fn persist_catalog(layout: &StorageLayout, catalog: &Catalog) -> Result<CatalogSummary> {
    let db_path = layout.db_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open catalog database {}", db_path.display()))?;
    let rows = db.replace_catalog(catalog.entries())?;
    log::info!("Stored {rows} catalog entries in {}", db_path.display());

    let summary = catalog.summary();
    reports::write_json(&layout.report_path(reports::CATALOG_SUMMARY), &summary)?;
    Ok(summary)
}

/// `integrate` command: a full rescan that rebuilds the catalog.
pub fn run_integrate(cfg: &PipelineConfig) -> Result<IntegrationRun> {
    ensure_storage(cfg)?;
    let discovered = discover(cfg);
    write_discovery_report(cfg, &discovered)?;

    let run = integrate_files(cfg, &discovered.files)?;
    persist_catalog(&cfg.layout, &run.catalog)?;
    reports::write_json(&cfg.layout.report_path(reports::INTEGRATION_REPORT), &run.report)?;
    Ok(run)
}

// --- catalog / suggest ------------------------------------------------------

fn open_catalog_db(layout: &StorageLayout) -> Result<Database> {
    let db_path = layout.db_path();
    if !db_path.exists() {
        bail!("No catalog at {}; run `integrate` first", db_path.display());
    }
    Database::open(&db_path)
        .with_context(|| format!("Failed to open catalog database {}", db_path.display()))
}

/// `catalog` command: recompute aggregates from the stored entries.
pub fn run_catalog(layout: &StorageLayout) -> Result<CatalogSummary> {
    let db = open_catalog_db(layout)?;
    let catalog: Catalog = db.load_catalog()?.into_iter().collect();
    let summary = catalog.summary();
    reports::write_json(&layout.report_path(reports::CATALOG_SUMMARY), &summary)?;
    Ok(summary)
}

/// `suggest` command.
pub fn run_suggest(layout: &StorageLayout, query: &SuggestQuery) -> Result<Vec<CatalogEntry>> {
    let db = open_catalog_db(layout)?;
    Ok(db.suggest(query)?)
}
