pub mod classify;
pub mod identity;

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::MIDI_EXTENSIONS;

/// A discovered MIDI file. Bytes are read later, by whoever analyzes it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct DiscoveryResult {
    pub roots: Vec<PathBuf>,
    pub files: Vec<SourceFile>,
    /// Zero-byte MIDI files
    pub skipped_empty: u64,
    /// Entries under an excluded directory
    pub skipped_excluded: u64,
    /// Walk errors (permissions, broken links)
    pub unreadable: u64,
}

impl DiscoveryResult {
    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

pub fn is_midi_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|e| MIDI_EXTENSIONS.contains(&e.as_str()))
}

/// Walk `roots` for MIDI files, skipping anything under `exclude`.
/// Missing roots are logged and skipped. Output is sorted by path.
pub fn discover(roots: &[PathBuf], exclude: &[PathBuf]) -> DiscoveryResult {
    let mut result = DiscoveryResult {
        roots: roots.to_vec(),
        ..Default::default()
    };

    for root in roots {
        if !root.exists() {
            log::warn!("Source directory not found: {}", root.display());
            continue;
        }

        let walker = WalkDir::new(root).follow_links(true).into_iter();
        let walker = walker.filter_entry(|e| {
            let skip = e.file_type().is_dir() && exclude.iter().any(|x| e.path() == x);
            if skip {
                log::debug!("Skipping integrated dir {}", e.path().display());
            }
            !skip
        });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Cannot read entry under {}: {}", root.display(), e);
                    result.unreadable += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_midi_path(entry.path()) {
                continue;
            }
            if exclude.iter().any(|x| entry.path().starts_with(x)) {
                result.skipped_excluded += 1;
                continue;
            }

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    log::warn!("Cannot stat {}: {}", entry.path().display(), e);
                    result.unreadable += 1;
                    continue;
                }
            };
            if size == 0 {
                log::debug!("Skipping empty file {}", entry.path().display());
                result.skipped_empty += 1;
                continue;
            }

            result.files.push(SourceFile {
                path: entry.into_path(),
                size,
            });
        }
    }

    result.files.sort();
    result.files.dedup_by(|a, b| a.path == b.path);
    result
}
