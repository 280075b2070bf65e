//! JSON report files under the storage root. Every write goes to a sibling
//! temp file first and is renamed into place, so an interrupted run leaves
//! either the previous report or the new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub const DISCOVERY_REPORT: &str = "discovery_report.json";
pub const INTEGRATION_REPORT: &str = "integration_report.json";
pub const CATALOG_SUMMARY: &str = "midi_catalog.json";
pub const VALIDATION_REPORT: &str = "validation_report.json";
pub const RECONCILIATION_REPORT: &str = "reconciliation_report.json";
pub const FILENAME_FIX_REPORT: &str = "filename_fix_report.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Write `bytes` to `path` via temp file + rename in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = temp_sibling(path);

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path)(e));
    }
    Ok(())
}

/// Pretty-print `value` as JSON into `path`, atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReportError> {
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');
    write_atomic(path, &json)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// Create `dir` if needed and prove it accepts writes.
pub fn ensure_writable(dir: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let marker = dir.join(format!(".write-check-{}", std::process::id()));
    fs::write(&marker, b"").map_err(io_err(dir))?;
    let _ = fs::remove_file(&marker);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // no temp files left behind
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn json_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VALIDATION_REPORT);
        write_json(&path, &serde_json::json!({"total_files": 3})).unwrap();
        let back: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(back["total_files"], 3);
    }

    #[test]
    fn writable_check() {
        let dir = tempfile::tempdir().unwrap();
        ensure_writable(&dir.path().join("a/b")).unwrap();
        assert!(dir.path().join("a/b").is_dir());
        assert_eq!(fs::read_dir(dir.path().join("a/b")).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_target_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();
        // a regular file cannot be a directory
        assert!(ensure_writable(&file.join("sub")).is_err());
    }
}
