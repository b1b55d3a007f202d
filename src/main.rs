//! Badge Engine CLI
//!
//! ## Usage
//!
//! ```bash
//! # Replay a JSON-lines event file into the ledgers
//! badge-engine ingest --file purchases.jsonl
//!
//! # Read events from stdin
//! tail -f purchases.jsonl | badge-engine ingest
//!
//! # Register an artist genre
//! badge-engine register-artist --artist-id 12 --genre techno
//!
//! # Inspect state
//! badge-engine badges --user 0xabc...
//! badge-engine badges --artist 12
//! badge-engine stats --artist 12 --history 20
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use badge_engine::bus::spawn_logging_listener;
use badge_engine::{EngineConfig, EngineError, EventProcessor, PurchaseEvent};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "badge-engine")]
#[command(about = "Badge derivation engine for artist token purchases")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "BADGE_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (overrides config file)
    #[arg(long, env = "BADGE_ENGINE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process JSON-lines purchase events from a file or stdin
    Ingest {
        /// Event file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Register an artist or update its genre
    RegisterArtist {
        #[arg(long)]
        artist_id: u64,
        #[arg(long)]
        genre: Option<String>,
    },
    /// List badges for a user or an artist
    Badges {
        #[arg(long, conflicts_with = "artist", required_unless_present = "artist")]
        user: Option<String>,
        #[arg(long)]
        artist: Option<u64>,
    },
    /// Show holder count and snapshot history of an artist
    Stats {
        #[arg(long)]
        artist: u64,
        #[arg(long, default_value_t = 20)]
        history: u32,
    },
    /// Write the effective config to the storage directory
    InitConfig,
}

/// Totals for one ingest run
#[derive(Debug, Default)]
struct IngestSummary {
    processed: u64,
    rejected: u64,
    failed: u64,
    awards: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("badge_engine=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        "Starting badge-engine"
    );

    let processor = Arc::new(EventProcessor::open(&config)?);

    let mut listener = None;

    match args.command {
        Command::Ingest { file } => {
            listener = Some(spawn_logging_listener(Arc::clone(processor.event_bus())));

            let summary = match file {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("opening {}", path.display()))?;
                    ingest(Arc::clone(&processor), BufReader::new(file)).await?
                }
                None => ingest(Arc::clone(&processor), BufReader::new(tokio::io::stdin())).await?,
            };

            info!(
                processed = summary.processed,
                rejected = summary.rejected,
                failed = summary.failed,
                awards = summary.awards,
                "Ingest finished"
            );
        }
        Command::RegisterArtist { artist_id, genre } => {
            let row = processor.register_artist(artist_id, genre.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Command::Badges { user, artist } => {
            let rows = match (user, artist) {
                (Some(user), _) => processor.badges_for_user(&user)?,
                (None, Some(artist)) => processor.badges_for_artist(artist)?,
                (None, None) => anyhow::bail!("either --user or --artist is required"),
            };
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Stats { artist, history } => {
            let stats = processor.artist_stats(artist, history)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::InitConfig => {
            let path = config.config_path();
            config.save(&path)?;
            info!(path = %path.display(), "Wrote config");
        }
    }

    if let Ok(stats) = processor.db().stats() {
        info!(
            artists = stats.artist_count,
            holders = stats.holder_count,
            snapshots = stats.snapshot_count,
            badges = stats.badge_count,
            "Final ledger stats"
        );
    }

    // Dropping the processor closes the bus; the listener drains what is queued
    drop(processor);
    if let Some(listener) = listener {
        listener.await?;
    }

    Ok(())
}

/// Process events line by line. Malformed lines are logged and skipped;
/// a storage failure or a failed rule retries the event once before moving on.
async fn ingest<R>(processor: Arc<EventProcessor>, reader: R) -> anyhow::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = match PurchaseEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed event");
                summary.rejected += 1;
                continue;
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let worker = Arc::clone(&processor);
            let pending = event.clone();
            let result = tokio::task::spawn_blocking(move || worker.process_purchase_event(&pending)).await?;

            match result {
                Ok(report) => {
                    summary.awards += report.awards().count() as u64;
                    let failed: Vec<String> = report.failed_rules().map(|r| r.rule.to_string()).collect();
                    if failed.is_empty() {
                        summary.processed += 1;
                        break;
                    }
                    // Redelivery re-attempts only the awards that did not land
                    if attempts < 2 {
                        warn!(line = line_no, rules = ?failed, "Rules failed, retrying event");
                        continue;
                    }
                    error!(line = line_no, rules = ?failed, "Rules failed after retry");
                    summary.failed += 1;
                    break;
                }
                Err(EngineError::Validation(msg)) => {
                    warn!(line = line_no, error = %msg, "Rejected event");
                    summary.rejected += 1;
                    break;
                }
                Err(e) if e.is_retryable() && attempts < 2 => {
                    warn!(line = line_no, error = %e, "Event failed, retrying");
                }
                Err(e) => {
                    error!(line = line_no, error = %e, "Event failed");
                    summary.failed += 1;
                    break;
                }
            }
        }
    }

    Ok(summary)
}
