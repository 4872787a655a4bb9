//! disklru CLI
//!
//! Inspect and operate on a disk cache directory from the shell.
//!
//! ```text
//! disklru --dir /var/cache/images stat --json
//! disklru --dir /var/cache/images put avatar-42 --metadata meta.json --data avatar.png
//! disklru --dir /var/cache/images get avatar-42 --slot data > avatar.png
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disklru::cache::DiskCacheBuilder;
use disklru::{DiskCache, TokioDispatcher};

// =============================================================================
// CLI Arguments
// =============================================================================

/// disklru - operate on a journaled LRU disk cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache directory
    #[arg(long, env = "DISKLRU_DIR")]
    dir: PathBuf,

    /// Fixed byte budget (overrides --max-size-percent)
    #[arg(long, env = "DISKLRU_MAX_SIZE")]
    max_size: Option<u64>,

    /// Budget as a share of free space (0.0 - 1.0)
    #[arg(long, env = "DISKLRU_MAX_SIZE_PERCENT")]
    max_size_percent: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print entry count, size and budget
    Stat {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write one value of an entry to stdout
    Get {
        key: String,
        #[arg(long, value_enum, default_value_t = Slot::Data)]
        slot: Slot,
    },
    /// Store an entry from two files
    Put {
        key: String,
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        data: PathBuf,
    },
    /// Remove an entry
    Remove { key: String },
    /// Remove every entry
    Clear,
    /// Evict down to the budget and flush the journal
    Trim,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Slot {
    Metadata,
    Data,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let cache = open_cache(&args)?;
    let result = run(&cache, &args.command);

    if let Err(e) = cache.shutdown() {
        warn!(error = %e, "Failed to close cache cleanly");
    }
    result
}

fn open_cache(args: &Args) -> anyhow::Result<DiskCache> {
    let mut builder = DiskCacheBuilder::new().directory(&args.dir);
    if let Some(percent) = args.max_size_percent {
        builder = builder.max_size_percent(percent);
    }
    if let Some(bytes) = args.max_size {
        builder = builder.max_size_bytes(bytes);
    }
    if let Some(dispatcher) = TokioDispatcher::try_current() {
        builder = builder.cleanup_dispatcher(Arc::new(dispatcher));
    }

    let cache = builder
        .build()
        .with_context(|| format!("failed to open cache in {}", args.dir.display()))?;
    info!(
        directory = %cache.directory().display(),
        max_size = cache.max_size(),
        "Opened disk cache"
    );
    Ok(cache)
}

fn run(cache: &DiskCache, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Stat { json } => {
            // Replay the journal so the counts are real.
            cache.size()?;
            let stats = cache.stats();
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("directory: {}", cache.directory().display());
                println!("entries:   {}", stats.entries);
                println!("size:      {}", stats.size);
                println!("max_size:  {}", stats.max_size);
            }
        }
        Command::Get { key, slot } => {
            let Some(snapshot) = cache.open_snapshot(key)? else {
                bail!("no entry for key {:?}", key);
            };
            let bytes = match slot {
                Slot::Metadata => snapshot.read_metadata()?,
                Slot::Data => snapshot.read_data()?,
            };
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        Command::Put {
            key,
            metadata,
            data,
        } => {
            let metadata = std::fs::read(metadata)
                .with_context(|| format!("failed to read {}", metadata.display()))?;
            let data = std::fs::read(data)
                .with_context(|| format!("failed to read {}", data.display()))?;

            let Some(mut editor) = cache.open_editor(key)? else {
                bail!("entry {:?} is busy or the cache is refusing writes", key);
            };
            editor.write_metadata(&metadata)?;
            editor.write_data(&data)?;
            editor.commit()?;
            info!(key = %key, bytes = metadata.len() + data.len(), "Stored entry");
        }
        Command::Remove { key } => {
            if !cache.remove(key)? {
                bail!("no entry for key {:?}", key);
            }
        }
        Command::Clear => cache.clear()?,
        Command::Trim => {
            // A cache that has not replayed its journal has nothing to trim.
            cache.size()?;
            cache.flush()?;
            println!("size: {} / {}", cache.size()?, cache.max_size());
        }
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries cache contents; logs go to stderr.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
