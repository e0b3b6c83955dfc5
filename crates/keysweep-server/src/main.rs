//! Keysweep binary.
//!
//! # Usage
//!
//! ```bash
//! # Feed the store
//! keysweep --database archive.redb import-keys keys.txt
//! keysweep --database archive.redb add-block group-7.bin
//!
//! # Match once, or keep matching every 30 seconds
//! keysweep --database archive.redb pass
//! keysweep --database archive.redb run --interval-secs 30
//!
//! # `run` only holds the database during a pass, so feeding continues
//! # from other processes while it runs
//! keysweep --database archive.redb add-block group-8.bin
//!
//! # Inspect
//! keysweep --database archive.redb status
//! keysweep --database archive.redb show-block 1
//! ```

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use keysweep_core::{AeadOracle, BlockId, DEFAULT_PAGE_SIZE, MatchingEngine, StoreError};
use keysweep_crypto::{KeyMaterial, NONCE_SIZE, seal_block};
use keysweep_server::{
    DEFAULT_BUSY_TIMEOUT, MatchStore, RedbFile, RedbStore, Scheduler, ServerConfig, ServerError,
    read_key_file,
};
use tokio::time::{self, Instant};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Incremental key/block matcher
#[derive(Parser, Debug)]
#[command(name = "keysweep")]
#[command(about = "Match encrypted blocks against a growing pool of candidate keys")]
#[command(version)]
struct Args {
    /// Path to the database
    #[arg(short, long, default_value = "keysweep.redb")]
    database: PathBuf,

    /// Rows per page when streaming blocks and keys
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Seconds to wait while another process has the database open
    #[arg(long, default_value_t = DEFAULT_BUSY_TIMEOUT.as_secs())]
    busy_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run passes on an interval until Ctrl-C
    Run {
        /// Seconds between passes
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,

        /// Log invariant violations and keep going instead of stopping
        #[arg(long)]
        keep_going: bool,
    },

    /// Run a single pass
    Pass,

    /// Import keys from a file, one per line
    ImportKeys {
        /// Key file
        file: PathBuf,
    },

    /// Append a block read from a file
    AddBlock {
        /// Block contents
        file: PathBuf,

        /// Store the block as unencrypted (never matched)
        #[arg(long)]
        plain: bool,
    },

    /// Seal a file under a key, producing a block for `add-block`
    Seal {
        /// Key, as 32 hex digits or four words
        #[arg(long)]
        key: String,

        /// Plaintext file
        input: PathBuf,

        /// Output file
        output: PathBuf,
    },

    /// Show the cursor and row counts
    Status,

    /// Show one block
    ShowBlock {
        /// Block id
        id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let config = ServerConfig {
        database: args.database,
        page_size: args.page_size,
        busy_timeout: Duration::from_secs(args.busy_timeout_secs),
        ..ServerConfig::default()
    };

    let mut out = io::stdout().lock();

    match args.command {
        Command::Run { interval_secs, keep_going } => {
            let config = ServerConfig {
                pass_interval: Duration::from_secs(interval_secs),
                stop_on_invariant: !keep_going,
                ..config
            };
            run(&config).await?;
        },
        Command::Pass => pass(&config, &mut out).await?,
        Command::ImportKeys { file } => import_keys(&config, &file, &mut out).await?,
        Command::AddBlock { file, plain } => add_block(&config, &file, !plain, &mut out).await?,
        Command::Seal { key, input, output } => seal(&key, &input, &output)?,
        Command::Status => status(&config, &mut out).await?,
        Command::ShowBlock { id } => show_block(&config, BlockId(id), &mut out).await?,
    }

    Ok(())
}

/// Open the database, waiting up to `busy_timeout` while another process
/// (typically a running scheduler mid-pass) has it open.
async fn open_store(config: &ServerConfig) -> Result<RedbStore, ServerError> {
    const RETRY_DELAY: Duration = Duration::from_millis(100);

    config.validate()?;
    let deadline = Instant::now() + config.busy_timeout;

    loop {
        match RedbStore::open(&config.database) {
            Err(StoreError::Lock(reason)) if Instant::now() < deadline => {
                tracing::debug!(reason = %reason, "Database busy, waiting");
                time::sleep(RETRY_DELAY).await;
            },
            result => return Ok(result?),
        }
    }
}

/// Run the scheduler until Ctrl-C.
///
/// The database is opened for each pass and closed after it, so other
/// processes can append between passes.
async fn run(config: &ServerConfig) -> Result<(), ServerError> {
    config.validate()?;
    let store = RedbFile::new(&config.database);

    tracing::info!(database = %config.database.display(), "Keysweep starting");

    let engine = MatchingEngine::with_config(store, AeadOracle, config.engine_config());
    let scheduler = Scheduler::new(engine, config.pass_interval)
        .with_stop_on_invariant(config.stop_on_invariant);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    scheduler.run(shutdown).await?;

    Ok(())
}

async fn pass(config: &ServerConfig, out: &mut impl Write) -> Result<(), ServerError> {
    let store = open_store(config).await?;
    let engine = MatchingEngine::with_config(store, AeadOracle, config.engine_config());
    let report = engine.run_pass()?;

    writeln!(
        out,
        "swept {} blocks and {} keys, {} oracle calls, {} matches",
        report.blocks_swept,
        report.keys_swept,
        report.oracle_calls,
        report.matches.len()
    )?;
    for found in &report.matches {
        writeln!(out, "block {} <- key {}", found.block_id, found.key_id)?;
    }

    Ok(())
}

async fn import_keys(
    config: &ServerConfig,
    file: &Path,
    out: &mut impl Write,
) -> Result<(), ServerError> {
    let keys = read_key_file(file)?;
    let store = open_store(config).await?;

    let before = store.stats()?.keys;
    store.append_keys(&keys)?;
    let added = store.stats()?.keys - before;

    tracing::info!(read = keys.len(), added, "Imported keys");
    writeln!(out, "read {} keys, {added} new", keys.len())?;

    Ok(())
}

async fn add_block(
    config: &ServerConfig,
    file: &Path,
    encrypted: bool,
    out: &mut impl Write,
) -> Result<(), ServerError> {
    let contents = std::fs::read(file)?;
    let store = open_store(config).await?;
    let id = store.append_block(&contents, encrypted)?;

    tracing::info!(block_id = %id, len = contents.len(), encrypted, "Added block");
    writeln!(out, "{id}")?;

    Ok(())
}

async fn status(config: &ServerConfig, out: &mut impl Write) -> Result<(), ServerError> {
    let store = open_store(config).await?;
    let cursor = store.load_cursor()?;
    let stats = store.stats()?;

    writeln!(out, "blocks:    {} ({} encrypted)", stats.blocks, stats.encrypted)?;
    writeln!(out, "matched:   {}", stats.matched)?;
    writeln!(out, "unmatched: {}", stats.unmatched())?;
    writeln!(out, "keys:      {}", stats.keys)?;
    writeln!(
        out,
        "cursor:    blocks <= {}, keys <= {}",
        show(cursor.last_block_id),
        show(cursor.last_key_id)
    )?;

    Ok(())
}

async fn show_block(
    config: &ServerConfig,
    id: BlockId,
    out: &mut impl Write,
) -> Result<(), ServerError> {
    let store = open_store(config).await?;
    let block = store.load_block(id)?.ok_or(StoreError::NotFound(id))?;

    writeln!(out, "id:        {}", block.id)?;
    writeln!(out, "length:    {}", block.ciphertext.len())?;
    writeln!(out, "encrypted: {}", block.encrypted)?;
    match block.matched {
        Some(found) => {
            writeln!(out, "key:       {}", found.key_id)?;
            writeln!(
                out,
                "decoded:   {} bytes, crc32 {:08x}",
                found.decoded_length, found.decoded_checksum
            )?;
        },
        None => writeln!(out, "key:       none")?,
    }

    Ok(())
}

/// Seal `input` under `key` with a random nonce.
fn seal(key: &str, input: &Path, output: &Path) -> Result<(), ServerError> {
    let key: KeyMaterial = key.parse().map_err(|e| ServerError::Config(format!("bad key: {e}")))?;

    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::fill(&mut nonce).map_err(|e| ServerError::Randomness(e.to_string()))?;

    let plaintext = std::fs::read(input)?;
    std::fs::write(output, seal_block(&plaintext, &key, nonce))?;

    tracing::info!(input = %input.display(), output = %output.display(), "Sealed block");
    Ok(())
}

fn show<T: std::fmt::Display>(id: Option<T>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}
