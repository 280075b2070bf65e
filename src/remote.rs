//! Read-only access to a remote MIDI corpus.
//!
//! Listing is a breadth-first worklist: each level of directories is fetched
//! on a bounded pool, so neither deep trees nor wide ones grow the stack or
//! fan out past the pool size.

use std::collections::HashSet;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scanner::is_midi_path;

const USER_AGENT: &str = concat!("midicorpus/", env!("CARGO_PKG_VERSION"));
const MAX_DOWNLOAD_BYTES: u64 = 16 * 1024 * 1024;
/// Most pages read for one directory listing.
const MAX_PAGES: usize = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("no download reference for {0}")]
    NoDownloadUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    /// Symlinks, submodules
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    /// Path relative to the corpus root, `/`-separated
    pub path: String,
    pub kind: EntryKind,
    pub download_url: Option<String>,
    pub size: u64,
}

impl RemoteEntry {
    pub fn is_midi(&self) -> bool {
        self.kind == EntryKind::File && is_midi_path(std::path::Path::new(&self.name))
    }
}

/// A remote tree of MIDI files. Implementations must be shareable across
/// the listing pool.
pub trait RemoteCorpus: Sync {
    /// Entries directly under `path` ("" is the root).
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, NetworkError>;

    fn download(&self, entry: &RemoteEntry) -> Result<Vec<u8>, NetworkError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDir {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RemoteListing {
    /// All file entries, sorted by path
    pub files: Vec<RemoteEntry>,
    pub directories_listed: usize,
    pub failed_dirs: Vec<FailedDir>,
    /// Directories not visited because they were past the depth limit
    pub truncated_dirs: Vec<String>,
}

/// List `root` recursively.
///
/// The root listing failing means the remote is unreachable and is an
/// error. Failures below the root are recorded and their subtrees skipped.
pub fn list_recursive(
    corpus: &dyn RemoteCorpus,
    root: &str,
    pool: &rayon::ThreadPool,
    max_depth: usize,
) -> Result<RemoteListing, NetworkError> {
    let mut listing = RemoteListing::default();
    let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
    let mut frontier: Vec<String> = Vec::new();

    let root_entries = corpus.list_dir(root)?;
    listing.directories_listed += 1;
    absorb(root_entries, &mut listing.files, &mut visited, &mut frontier);

    let mut depth = 1;
    while !frontier.is_empty() {
        let level = std::mem::take(&mut frontier);
        if depth > max_depth {
            log::warn!("Not descending into {} directories past depth {max_depth}", level.len());
            listing.truncated_dirs.extend(level);
            break;
        }

        log::debug!("Listing {} remote directories at depth {depth}", level.len());
        let results: Vec<(String, Result<Vec<RemoteEntry>, NetworkError>)> = pool.install(|| {
            level
                .into_par_iter()
                .map(|path| {
                    let result = corpus.list_dir(&path);
                    (path, result)
                })
                .collect()
        });

        for (path, result) in results {
            match result {
                Ok(entries) => {
                    listing.directories_listed += 1;
                    absorb(entries, &mut listing.files, &mut visited, &mut frontier);
                }
                Err(e) => {
                    log::warn!("Failed to list remote {path}: {e}");
                    listing.failed_dirs.push(FailedDir {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        depth += 1;
    }

    listing.files.sort_by(|a, b| a.path.cmp(&b.path));
    listing.truncated_dirs.sort();
    Ok(listing)
}

fn absorb(
    entries: Vec<RemoteEntry>,
    files: &mut Vec<RemoteEntry>,
    visited: &mut HashSet<String>,
    frontier: &mut Vec<String>,
) {
    for entry in entries {
        match entry.kind {
            EntryKind::File => files.push(entry),
            EntryKind::Directory => {
                if visited.insert(entry.path.clone()) {
                    frontier.push(entry.path);
                }
            }
            EntryKind::Other => log::debug!("Skipping remote entry {}", entry.path),
        }
    }
}

// --- GitHub contents API ----------------------------------------------------

/// One item of a GitHub contents API directory response.
#[derive(Debug, Deserialize)]
struct ContentsItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
    #[serde(default)]
    size: u64,
}

impl From<ContentsItem> for RemoteEntry {
    fn from(item: ContentsItem) -> Self {
        let kind = match item.kind.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Directory,
            _ => EntryKind::Other,
        };
        RemoteEntry {
            name: item.name,
            path: item.path,
            kind,
            download_url: item.download_url,
            size: item.size,
        }
    }
}

/// Percent-encode a `/`-separated path for use in a URL.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Gather a paginated directory listing, deduplicated by path.
///
/// Stops on a short page, on a page that starts where the previous one did
/// (a server ignoring `page`), or after `MAX_PAGES`.
fn collect_pages(
    dir: &str,
    page_size: usize,
    mut fetch: impl FnMut(usize) -> Result<Vec<RemoteEntry>, NetworkError>,
) -> Result<Vec<RemoteEntry>, NetworkError> {
    let mut entries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut previous_first: Option<String> = None;

    for page in 1..=MAX_PAGES {
        let items = fetch(page)?;
        let count = items.len();
        let first = items.first().map(|e| e.path.clone());
        if first.is_some() && first == previous_first {
            log::debug!("Listing of '{dir}' repeats at page {page}; treating it as complete");
            break;
        }
        entries.extend(items.into_iter().filter(|e| seen.insert(e.path.clone())));
        if count < page_size {
            break;
        }
        if page == MAX_PAGES {
            log::warn!("Listing of '{dir}' stopped after {MAX_PAGES} pages");
        }
        previous_first = first;
    }
    Ok(entries)
}

/// GitHub repository contents endpoint, e.g.
/// `https://api.github.com/repos/{owner}/{repo}/contents`.
pub struct GithubContents {
    agent: ureq::Agent,
    api_url: String,
    page_size: usize,
}

impl GithubContents {
    pub fn new(api_url: &str, timeout: Duration, page_size: usize) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            api_url: api_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        }
    }

    fn dir_url(&self, path: &str, page: usize) -> String {
        let path = path.trim_matches('/');
        let base = if path.is_empty() {
            self.api_url.clone()
        } else {
            format!("{}/{}", self.api_url, encode_path(path))
        };
        format!("{base}?per_page={}&page={page}", self.page_size)
    }

    fn fetch_page(&self, url: &str) -> Result<Vec<ContentsItem>, NetworkError> {
        let mut response = self
            .agent
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| NetworkError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        response
            .body_mut()
            .read_json::<Vec<ContentsItem>>()
            .map_err(|e| NetworkError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

impl RemoteCorpus for GithubContents {
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, NetworkError> {
        collect_pages(path, self.page_size, |page| {
            let items = self.fetch_page(&self.dir_url(path, page))?;
            Ok(items.into_iter().map(RemoteEntry::from).collect())
        })
    }

    fn download(&self, entry: &RemoteEntry) -> Result<Vec<u8>, NetworkError> {
        let url = entry
            .download_url
            .as_deref()
            .ok_or_else(|| NetworkError::NoDownloadUrl(entry.path.clone()))?;
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| NetworkError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_BYTES)
            .read_to_vec()
            .map_err(|e| NetworkError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}
