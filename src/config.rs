use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::analyzer::DEFAULT_MIN_DURATION_SECS;
use crate::integrate::DEFAULT_MAX_SUFFIX_ATTEMPTS;

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to ingest from (used when a command gets no dirs on the CLI).
    pub source_dirs: Vec<PathBuf>,
    /// Root of the categorized storage tree, reports and catalog DB.
    pub storage_dir: PathBuf,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub validation: ValidationConfig,
    pub integration: IntegrationConfig,
    pub remote: RemoteConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_dirs: Vec::new(),
            storage_dir: PathBuf::from("storage/midi"),
            workers: 0,
            validation: ValidationConfig::default(),
            integration: IntegrationConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Files shorter than this are flagged.
    pub min_duration_secs: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Upper bound on `_N` suffixes tried for one target name.
    pub max_suffix_attempts: u32,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            max_suffix_attempts: DEFAULT_MAX_SUFFIX_ATTEMPTS,
        }
    }
}

/// Remote corpus (GitHub contents API) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_url: String,
    /// Concurrent listing/download requests.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub page_size: usize,
    pub max_depth: usize,
    /// Default cap on downloads per reconcile run.
    pub download_limit: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com/repos/Ocean82/midi_land/contents".to_string(),
            concurrency: 4,
            timeout_secs: 30,
            page_size: 100,
            max_depth: 16,
            download_limit: 50,
        }
    }
}

impl AppConfig {
    /// Load config from `path`, or from `~/.config/midicorpus/config.toml`.
    /// Returns default config if the file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load(path: Option<&Path>) -> Self {
        let explicit = path.is_some();
        let config_path = path.map(Path::to_path_buf).or_else(Self::config_path);
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Some(path) if explicit => {
                log::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        resolve_workers(self.workers)
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// 0 → cores / 2, min 1.
pub fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cores / 2).max(1)
    }
}
