use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use midicorpus::config::AppConfig;
use midicorpus::db::models::{CatalogEntry, SuggestQuery};
use midicorpus::pipeline::{self, PipelineConfig};
use midicorpus::reconcile::{self, ReconcileOptions};
use midicorpus::remote::GithubContents;
use midicorpus::scanner::classify::{Category, Style};
use midicorpus::{filenames, validate};

#[derive(Parser)]
#[command(name = "midicorpus", version, about = "MIDI pattern corpus ingestion and cataloging")]
struct Cli {
    /// Path to a TOML config file (default: XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root for categorized files, reports and the catalog DB
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, global = true)]
    jobs: Option<usize>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find MIDI files under the source directories and write a discovery report
    Discover {
        /// Directories to search (defaults to config source_dirs)
        dirs: Vec<PathBuf>,
    },

    /// Analyze, classify and copy MIDI files into storage, then rebuild the catalog
    Integrate {
        /// Directories to ingest (defaults to config source_dirs)
        dirs: Vec<PathBuf>,
    },

    /// Recompute catalog statistics from the catalog DB
    Catalog,

    /// List cataloged patterns matching a filter
    Suggest {
        #[arg(long)]
        category: Option<Category>,

        #[arg(long)]
        style: Option<Style>,

        /// Minimum tempo in BPM (inclusive)
        #[arg(long)]
        tempo_min: Option<f64>,

        /// Maximum tempo in BPM (inclusive)
        #[arg(long)]
        tempo_max: Option<f64>,

        /// Number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Re-parse integrated files and audit the catalog artifacts
    Validate {
        /// Delete integrated files that fail to parse
        #[arg(long)]
        fix: bool,
    },

    /// Sanitize MIDI file names and update catalog paths
    FixFilenames {
        /// Directories to fix (defaults to the storage dir)
        dirs: Vec<PathBuf>,

        /// Report renames without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Download remote patterns missing from the local corpus and reintegrate
    ReconcileRemote {
        /// Source directories to reintegrate with (defaults to config source_dirs)
        dirs: Vec<PathBuf>,

        /// Maximum downloads this run (defaults to config remote.download_limit)
        #[arg(long)]
        limit: Option<usize>,

        /// Remote contents API URL (defaults to config remote.api_url)
        #[arg(long)]
        remote_url: Option<String>,

        /// Report missing identities without downloading
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let mut config = AppConfig::load(cli.config.as_deref());
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    log::info!("Storage: {}", config.storage_dir.display());

    let cfg = PipelineConfig::from_app(&config).with_workers(cli.jobs);

    match cli.command {
        Commands::Discover { dirs } => {
            let cfg = cfg.with_sources(dirs);
            cfg.require_sources()?;
            let result = pipeline::run_discover(&cfg).context("Discovery failed")?;
            println!(
                "Discovery complete: {} MIDI files ({} bytes), {} empty skipped, {} unreadable",
                result.total(),
                result.total_bytes(),
                result.skipped_empty,
                result.unreadable
            );
        }

        Commands::Integrate { dirs } => {
            let cfg = cfg.with_sources(dirs);
            cfg.require_sources()?;
            let run = pipeline::run_integrate(&cfg).context("Integration failed")?;
            let report = &run.report;
            println!(
                "Integration complete: {} discovered, {} integrated, {} duplicates, {} flagged, \
                 {} errors",
                report.discovered,
                report.processed.len(),
                report.duplicates.len(),
                report.flagged.len(),
                report.errors.len()
            );
            for (category, paths) in &report.categories {
                println!("  {:<20} {}", category, paths.len());
            }
        }

        Commands::Catalog => {
            let summary = pipeline::run_catalog(&cfg.layout).context("Catalog rebuild failed")?;
            summary.print();
        }

        Commands::Suggest {
            category,
            style,
            tempo_min,
            tempo_max,
            limit,
        } => {
            let query = SuggestQuery {
                category,
                style,
                tempo_min,
                tempo_max,
                limit,
            };
            let entries = pipeline::run_suggest(&cfg.layout, &query).context("Query failed")?;
            if entries.is_empty() {
                println!("No matching patterns.");
                return Ok(());
            }
            print_entries(&entries);
        }

        Commands::Validate { fix } => {
            let report = validate::run_validate(&cfg, fix).context("Validation failed")?;
            println!("{:<20} {:>6} {:>6} {:>8}", "Category", "Total", "Valid", "Invalid");
            for c in &report.categories {
                println!(
                    "{:<20} {:>6} {:>6} {:>8}",
                    c.name,
                    c.total,
                    c.valid,
                    c.total - c.valid
                );
            }
            match report.success_rate {
                Some(rate) => println!(
                    "\n{}/{} valid ({:.1}%)",
                    report.valid_files, report.total_files, rate
                ),
                None => println!("\nNo integrated files to validate."),
            }
            let audit = &report.catalog_audit;
            if !audit.is_healthy() {
                println!(
                    "Catalog audit: {} missing, {} malformed, {} errors",
                    audit.missing.len(),
                    audit.malformed.len(),
                    audit.errors.len()
                );
            }
            if let Some(removed) = &report.removed {
                let ok = removed.iter().filter(|r| r.removed).count();
                println!("Removed {} corrupt file(s), {} failed", ok, removed.len() - ok);
            }
        }

        Commands::FixFilenames { dirs, dry_run } => {
            let dirs = if dirs.is_empty() {
                vec![cfg.layout.root().to_path_buf()]
            } else {
                dirs
            };
            if dry_run {
                println!("DRY RUN: no files will be renamed");
            }
            let report =
                filenames::fix_filenames(&dirs, &cfg.layout, dry_run, cfg.max_suffix_attempts)
                    .context("Filename fix failed")?;
            for r in &report.renames {
                println!("  {} -> {}", r.from.display(), r.to.display());
            }
            println!(
                "Filename fix complete: {} scanned, {} renamed, {} unchanged, \
                 {} catalog entries updated, {} report paths updated",
                report.scanned,
                report.renames.iter().filter(|r| r.applied).count(),
                report.unchanged,
                report.catalog_updates,
                report.report_updates
            );
        }

        Commands::ReconcileRemote {
            dirs,
            limit,
            remote_url,
            dry_run,
        } => {
            let cfg = cfg.with_sources(dirs);
            let remote = &config.remote;
            let api_url = remote_url.unwrap_or_else(|| remote.api_url.clone());
            log::info!("Remote corpus: {api_url}");
            let corpus = GithubContents::new(
                &api_url,
                Duration::from_secs(remote.timeout_secs),
                remote.page_size,
            );
            let opts = ReconcileOptions {
                root: String::new(),
                limit: limit.unwrap_or(remote.download_limit),
                dry_run,
                concurrency: remote.concurrency,
                max_depth: remote.max_depth,
            };
            let report =
                reconcile::reconcile(&cfg, &corpus, &opts).context("Reconciliation failed")?;
            println!(
                "Reconciliation: {} local identities, {} remote identities, {} missing",
                report.local_identities,
                report.remote_identities,
                report.missing.len()
            );
            if dry_run {
                for id in &report.missing {
                    println!("  {id}");
                }
            } else {
                println!(
                    "Downloaded {}/{} (limit {})",
                    report.downloaded(),
                    report.downloads.len(),
                    report.download_limit
                );
            }
            if !report.failed_dirs.is_empty() {
                println!("{} remote directories could not be listed", report.failed_dirs.len());
            }
            if let Some(n) = report.reintegrated {
                println!("Catalog rebuilt with {n} entries");
            }
        }
    }

    Ok(())
}

fn print_entries(entries: &[CatalogEntry]) {
    println!(
        "{:<18} {:<12} {:>6} {:>5} {:>4}  {}",
        "Category", "Style", "BPM", "Sig", "Trk", "Path"
    );
    for e in entries {
        println!(
            "{:<18} {:<12} {:>6.1} {:>5} {:>4}  {}",
            e.category.as_str(),
            e.style.as_str(),
            e.tempo,
            e.time_signature,
            e.track_count,
            e.storage_path.display()
        );
    }
}
