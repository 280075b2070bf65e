use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::db::Database;
use crate::integrate::{self, StorageLayout};
use crate::reports;
use crate::scanner::is_midi_path;

/// Longest stem a sanitized name keeps.
pub const MAX_STEM_CHARS: usize = 50;
const FALLBACK_STEM: &str = "midi_file";

static DISALLOWED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-]").unwrap());

static UNDERSCORE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").unwrap());

/// Clean a bare stem (no extension). Never returns an empty string.
pub fn sanitize_stem(stem: &str) -> String {
    let spaced = stem.replace(' ', "_");
    let kept = DISALLOWED_RE.replace_all(&spaced, "");
    let collapsed = UNDERSCORE_RUN_RE.replace_all(&kept, "_");
    let truncated: String = collapsed.trim_matches('_').chars().take(MAX_STEM_CHARS).collect();
    match truncated.trim_end_matches('_') {
        "" => FALLBACK_STEM.to_string(),
        s => s.to_string(),
    }
}

/// Clean a file name for storage. The extension is kept as-is.
///
/// `"My Song (v2)!!.mid"` becomes `"My_Song_v2.mid"`.
pub fn sanitize_filename(name: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| sanitize_stem(&s.to_string_lossy()))
        .unwrap_or_else(|| FALLBACK_STEM.to_string());

    match path.extension() {
        Some(ext) => format!("{stem}.{}", ext.to_string_lossy()),
        None => stem,
    }
}

#[derive(Debug, Serialize)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
    pub applied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FilenameFixReport {
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
    pub directories: Vec<PathBuf>,
    pub scanned: usize,
    pub unchanged: usize,
    pub renames: Vec<Rename>,
    pub catalog_updates: usize,
    /// Paths rewritten in integration_report.json
    pub report_updates: usize,
}

fn midi_files(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = dirs
        .iter()
        .flat_map(|dir| {
            WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_midi_path(e.path()))
                .map(|e| e.into_path())
        })
        .collect();
    files.sort();
    files.dedup();
    files
}

/// Rename every MIDI file under `dirs` to its sanitized name and point
/// catalog entries at the new paths.
pub fn fix_filenames(
    dirs: &[PathBuf],
    layout: &StorageLayout,
    dry_run: bool,
    max_suffix_attempts: u32,
) -> Result<FilenameFixReport> {
    reports::ensure_writable(layout.root())
        .with_context(|| format!("Storage directory {} is not writable", layout.root().display()))?;

    let db_path = layout.db_path();
    let db = if !dry_run && db_path.exists() {
        Some(Database::open_existing(&db_path).context("Failed to open catalog database")?)
    } else {
        None
    };

    let files = midi_files(dirs);
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut report = FilenameFixReport {
        timestamp: Utc::now(),
        dry_run,
        directories: dirs.to_vec(),
        scanned: files.len(),
        unchanged: 0,
        renames: Vec::new(),
        catalog_updates: 0,
        report_updates: 0,
    };

    for path in files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let clean = sanitize_filename(&name);
        if clean == name {
            report.unchanged += 1;
            continue;
        }

        let wanted = path.with_file_name(&clean);
        let target = match integrate::free_path(&wanted, max_suffix_attempts, |p| {
            claimed.contains(p) || (p != path.as_path() && p.exists())
        }) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("{e}");
                report.renames.push(Rename {
                    from: path.clone(),
                    to: wanted,
                    applied: false,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };
        claimed.insert(target.clone());

        if dry_run {
            log::info!("Would rename {} -> {}", path.display(), target.display());
            report.renames.push(Rename {
                from: path,
                to: target,
                applied: false,
                error: None,
            });
            continue;
        }

        match fs::rename(&path, &target) {
            Ok(()) => {
                log::info!("Renamed {} -> {}", path.display(), target.display());
                if let Some(db) = &db {
                    match db.update_storage_path(&path, &target) {
                        Ok(true) => report.catalog_updates += 1,
                        Ok(false) => {}
                        Err(e) => log::warn!("Catalog not updated for {}: {}", target.display(), e),
                    }
                }
                report.renames.push(Rename {
                    from: path,
                    to: target,
                    applied: true,
                    error: None,
                });
            }
            Err(e) => {
                log::warn!("Failed to rename {}: {}", path.display(), e);
                report.renames.push(Rename {
                    from: path,
                    to: target,
                    applied: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let moves: HashMap<String, String> = report
        .renames
        .iter()
        .filter(|r| r.applied)
        .map(|r| (r.from.to_string_lossy().to_string(), r.to.to_string_lossy().to_string()))
        .collect();
    if !moves.is_empty() {
        report.report_updates = update_integration_report(layout, &moves)?;
    }

    reports::write_json(&layout.report_path(reports::FILENAME_FIX_REPORT), &report)?;
    Ok(report)
}

/// Replace every string equal to a moved path. Returns how many changed.
fn rewrite_paths(value: &mut Value, moves: &HashMap<String, String>) -> usize {
    match value {
        Value::String(s) => match moves.get(s.as_str()) {
            Some(to) => {
                *s = to.clone();
                1
            }
            None => 0,
        },
        Value::Array(items) => items.iter_mut().map(|v| rewrite_paths(v, moves)).sum(),
        Value::Object(map) => map.values_mut().map(|v| rewrite_paths(v, moves)).sum(),
        _ => 0,
    }
}

fn update_integration_report(
    layout: &StorageLayout,
    moves: &HashMap<String, String>,
) -> Result<usize> {
    let path = layout.report_path(reports::INTEGRATION_REPORT);
    let Ok(text) = fs::read_to_string(&path) else {
        return Ok(0);
    };
    let mut value: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Not updating {}: {}", path.display(), e);
            return Ok(0);
        }
    };
    let updated = rewrite_paths(&mut value, moves);
    if updated > 0 {
        reports::write_json(&path, &value)?;
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DEFAULT_MIN_DURATION_SECS;
    use crate::pipeline::{self, PipelineConfig};
    use crate::testutil;
    use crate::validate;

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_filename("My Song (v2)!!.mid"), "My_Song_v2.mid");
        assert_eq!(sanitize_filename("__funk  groove__.MID"), "funk_groove.MID");
        assert_eq!(sanitize_filename("already_clean-1.mid"), "already_clean-1.mid");
        assert_eq!(sanitize_filename("???.mid"), "midi_file.mid");
        assert_eq!(sanitize_filename("café à la mode.midi"), "caf_la_mode.midi");
    }

    #[test]
    fn long_stems_are_truncated() {
        let name = format!("{}.mid", "a".repeat(80));
        let clean = sanitize_filename(&name);
        assert_eq!(clean, format!("{}.mid", "a".repeat(50)));

        let trailing = format!("{}_b.mid", "a".repeat(49));
        assert_eq!(sanitize_filename(&trailing), format!("{}.mid", "a".repeat(49)));
    }

    #[test]
    fn collisions_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        testutil::write_file(dir.path(), "my song.mid", b"one");
        testutil::write_file(dir.path(), "my-song?.mid", b"two");
        testutil::write_file(dir.path(), "my_song.mid", b"three");
        testutil::write_file(dir.path(), "notes.txt", b"ignored");

        let layout = StorageLayout::new(store.path());
        let report = fix_filenames(&[dir.path().to_path_buf()], &layout, false, 10).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.renames.len(), 2);
        assert!(report.renames.iter().all(|r| r.applied));

        assert_eq!(fs::read(dir.path().join("my_song.mid")).unwrap(), b"three");
        assert_eq!(fs::read(dir.path().join("my-song.mid")).unwrap(), b"two");
        assert_eq!(fs::read(dir.path().join("my_song_1.mid")).unwrap(), b"one");
        assert!(layout.report_path(reports::FILENAME_FIX_REPORT).exists());
    }

    #[test]
    fn dry_run_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        let original = testutil::write_file(dir.path(), "a b.mid", b"x");
        testutil::write_file(dir.path(), "c d.mid", b"y");
        let layout = StorageLayout::new(dir.path());

        let report = fix_filenames(&[dir.path().to_path_buf()], &layout, true, 10).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.renames.len(), 2);
        assert!(report.renames.iter().all(|r| !r.applied));
        assert_eq!(report.renames[0].to, dir.path().join("a_b.mid"));
        assert!(original.exists());
    }

    fn config(src: &Path, store: &Path) -> PipelineConfig {
        PipelineConfig {
            source_dirs: vec![src.to_path_buf()],
            layout: StorageLayout::new(store),
            workers: 1,
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            max_suffix_attempts: 10,
        }
    }

    #[test]
    fn renames_follow_into_catalog_and_report() {
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        testutil::write_file(src.path(), "funk_groove.mid", &testutil::drum_groove(96.0));
        let cfg = config(src.path(), store.path());
        let run = pipeline::run_integrate(&cfg).unwrap();
        let stored = run.report.processed[0].storage_path.clone();

        // a stored copy under a name that was never cleaned
        let legacy = stored.with_file_name("funk groove (old).mid");
        fs::rename(&stored, &legacy).unwrap();
        let db = Database::open_existing(&cfg.layout.db_path()).unwrap();
        assert!(db.update_storage_path(&stored, &legacy).unwrap());
        let report_path = cfg.layout.report_path(reports::INTEGRATION_REPORT);
        let text = fs::read_to_string(&report_path).unwrap();
        let stored_str = stored.to_string_lossy().to_string();
        let legacy_str = legacy.to_string_lossy().to_string();
        fs::write(&report_path, text.replace(&stored_str, &legacy_str)).unwrap();

        let report = fix_filenames(&cfg.layout.integrated_roots(), &cfg.layout, false, 10).unwrap();
        assert_eq!(report.renames.len(), 1);
        let renamed = &report.renames[0].to;
        assert_eq!(renamed, &legacy.with_file_name("funk_groove_old.mid"));
        assert_eq!(report.catalog_updates, 1);
        // processed[0].storage_path and the category list
        assert_eq!(report.report_updates, 2);

        let entries = db.load_catalog().unwrap();
        assert_eq!(&entries[0].storage_path, renamed);
        assert!(renamed.exists());

        let text = fs::read_to_string(&report_path).unwrap();
        assert!(text.contains(renamed.to_string_lossy().as_ref()));
        assert!(!text.contains(&legacy_str));
    }

    #[test]
    fn stored_copies_stay_put_across_fix_and_reintegrate() {
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        testutil::write_file(src.path(), "funk beat (take 2).mid", &testutil::drum_groove(96.0));
        testutil::write_file(src.path(), "Lead Line!.mid", &testutil::melody(120.0, 4));
        let cfg = config(src.path(), store.path());
        let first = pipeline::run_integrate(&cfg).unwrap();
        assert_eq!(first.catalog.len(), 2);

        let root = cfg.layout.root().to_path_buf();
        let report = fix_filenames(&[root], &cfg.layout, false, 10).unwrap();
        assert_eq!(report.scanned, 2);
        assert!(report.renames.is_empty());

        let second = pipeline::run_integrate(&cfg).unwrap();
        let validation = validate::run_validate(&cfg, false).unwrap();
        assert_eq!(validation.total_files, second.catalog.len());
        assert_eq!(validation.total_files, 2);
    }
}
