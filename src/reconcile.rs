//! Diff the local corpus against a remote one and fetch what is missing.
//!
//! Both sides are reduced to pattern identities with the same derivation,
//! so a remote file counts as present when any local file shares its
//! identity. Downloads land in the staging dir, which discovery treats as
//! one more source, and the catalog is rebuilt with a full integrate. That
//! rebuild replaces the catalog, so a run that may download needs the same
//! source dirs the catalog was built from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::db::Database;
use crate::integrate;
use crate::pipeline::{self, PipelineConfig};
use crate::remote::{self, FailedDir, NetworkError, RemoteCorpus, RemoteEntry};
use crate::reports;
use crate::scanner::identity::{PatternIdentity, derive_identity};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Remote directory to start listing from ("" = corpus root)
    pub root: String,
    pub limit: usize,
    pub dry_run: bool,
    pub concurrency: usize,
    pub max_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct DownloadOutcome {
    pub identity: PatternIdentity,
    pub remote_path: String,
    pub local_path: Option<PathBuf>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
    pub local_identities: usize,
    pub remote_files: usize,
    pub remote_identities: usize,
    pub missing: BTreeSet<PatternIdentity>,
    pub download_limit: usize,
    pub downloads: Vec<DownloadOutcome>,
    pub failed_dirs: Vec<FailedDir>,
    pub truncated_dirs: Vec<String>,
    /// Catalog size after the post-download integrate, if one ran
    pub reintegrated: Option<usize>,
}

impl ReconciliationReport {
    pub fn downloaded(&self) -> usize {
        self.downloads.iter().filter(|d| d.success).count()
    }
}

/// Identities of everything discovered locally plus everything already cataloged.
pub fn local_identities(cfg: &PipelineConfig) -> Result<BTreeSet<PatternIdentity>> {
    let discovered = pipeline::discover(cfg);
    let mut ids: BTreeSet<PatternIdentity> = discovered
        .files
        .iter()
        .filter_map(|f| f.path.file_name())
        .map(|name| derive_identity(&name.to_string_lossy()))
        .collect();

    let db_path = cfg.layout.db_path();
    if db_path.exists() {
        let db = Database::open(&db_path)
            .with_context(|| format!("Failed to open catalog database {}", db_path.display()))?;
        ids.extend(db.identities()?);
    }
    Ok(ids)
}

/// Remote identity → download candidate (first entry by path).
pub fn remote_identities(files: &[RemoteEntry]) -> BTreeMap<PatternIdentity, &RemoteEntry> {
    let mut sorted: Vec<&RemoteEntry> = files.iter().filter(|f| f.is_midi()).collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut map = BTreeMap::new();
    for entry in sorted {
        map.entry(derive_identity(&entry.name)).or_insert(entry);
    }
    map
}

pub fn missing_identities(
    remote: &BTreeSet<PatternIdentity>,
    local: &BTreeSet<PatternIdentity>,
) -> BTreeSet<PatternIdentity> {
    remote.difference(local).cloned().collect()
}

/// Missing identities and the entries to fetch for them, capped at `limit`.
pub struct Plan<'a> {
    pub remote_identities: usize,
    pub missing: BTreeSet<PatternIdentity>,
    pub candidates: Vec<(PatternIdentity, &'a RemoteEntry)>,
}

pub fn plan<'a>(
    files: &'a [RemoteEntry],
    local: &BTreeSet<PatternIdentity>,
    limit: usize,
) -> Plan<'a> {
    let remote = remote_identities(files);
    let remote_ids: BTreeSet<PatternIdentity> = remote.keys().cloned().collect();
    let missing = missing_identities(&remote_ids, local);
    let candidates = missing
        .iter()
        .filter_map(|id| remote.get(id).map(|e| (id.clone(), *e)))
        .take(limit)
        .collect();
    Plan {
        remote_identities: remote_ids.len(),
        missing,
        candidates,
    }
}

/// Write downloaded bytes into `dir` under the remote file name, never
/// replacing an existing file.
fn stage_download(
    dir: &Path,
    entry: &RemoteEntry,
    bytes: &[u8],
    max_attempts: u32,
) -> Result<PathBuf> {
    let name = Path::new(&entry.name)
        .file_name()
        .with_context(|| format!("Remote entry {} has no usable file name", entry.path))?;
    let dest = integrate::free_path(&dir.join(name), max_attempts, |p| p.exists())?;
    reports::write_atomic(&dest, bytes)?;
    Ok(dest)
}

/// `reconcile-remote` command.
pub fn reconcile(
    cfg: &PipelineConfig,
    corpus: &dyn RemoteCorpus,
    opts: &ReconcileOptions,
) -> Result<ReconciliationReport> {
    reports::ensure_writable(cfg.layout.root()).with_context(|| {
        format!(
            "Storage directory {} is not writable",
            cfg.layout.root().display()
        )
    })?;
    if !opts.dry_run {
        cfg.require_sources()
            .context("Re-integrating downloads would drop every cataloged source file")?;
    }

    let local = local_identities(cfg)?;
    log::info!("{} local pattern identities", local.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.concurrency.max(1))
        .build()
        .context("Failed to build remote worker pool")?;

    let listing = remote::list_recursive(corpus, &opts.root, &pool, opts.max_depth)
        .context("Remote corpus is unreachable")?;
    let plan = plan(&listing.files, &local, opts.limit);
    log::info!(
        "{} remote identities, {} missing locally, {} to fetch",
        plan.remote_identities,
        plan.missing.len(),
        if opts.dry_run { 0 } else { plan.candidates.len() }
    );

    let mut downloads = Vec::new();
    if !opts.dry_run && !plan.candidates.is_empty() {
        let pb = pipeline::progress_bar(plan.candidates.len() as u64, "Downloading...");
        let fetched: Vec<Result<Vec<u8>, NetworkError>> = pool.install(|| {
            plan.candidates
                .par_iter()
                .map(|(_, entry)| {
                    let result = corpus.download(entry);
                    pb.inc(1);
                    result
                })
                .collect()
        });
        pb.finish_and_clear();

        let incoming = cfg.layout.incoming_dir();
        for ((identity, entry), result) in plan.candidates.iter().zip(fetched) {
            let staged = result
                .map_err(anyhow::Error::from)
                .and_then(|bytes| {
                    stage_download(&incoming, entry, &bytes, cfg.max_suffix_attempts)
                });
            let outcome = match staged {
                Ok(path) => {
                    log::info!("Fetched {} -> {}", entry.path, path.display());
                    DownloadOutcome {
                        identity: identity.clone(),
                        remote_path: entry.path.clone(),
                        local_path: Some(path),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    log::warn!("Failed to fetch {}: {:#}", entry.path, e);
                    DownloadOutcome {
                        identity: identity.clone(),
                        remote_path: entry.path.clone(),
                        local_path: None,
                        success: false,
                        error: Some(format!("{e:#}")),
                    }
                }
            };
            downloads.push(outcome);
        }
    }

    let mut report = ReconciliationReport {
        timestamp: Utc::now(),
        dry_run: opts.dry_run,
        local_identities: local.len(),
        remote_files: listing.files.iter().filter(|f| f.is_midi()).count(),
        remote_identities: plan.remote_identities,
        missing: plan.missing,
        download_limit: opts.limit,
        downloads,
        failed_dirs: listing.failed_dirs,
        truncated_dirs: listing.truncated_dirs,
        reintegrated: None,
    };

    if report.downloaded() > 0 {
        log::info!("Re-integrating after {} downloads", report.downloaded());
        let run = pipeline::run_integrate(cfg)?;
        report.reintegrated = Some(run.catalog.len());
    }

    reports::write_json(&cfg.layout.report_path(reports::RECONCILIATION_REPORT), &report)?;
    Ok(report)
}
