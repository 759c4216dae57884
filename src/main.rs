//! kvstash - operator CLI
//!
//! Reads, writes and sweeps a kvstash namespace on a Consul agent. The
//! `cleanup` subcommand is meant to be run from cron; `sweep` keeps running
//! and adapts its interval to the expiry rate.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use kvstash::envelope::expires_in;
use kvstash::{
    start_expiry_sweeper, ChunkStore, ExpirySweeper, StoreConfig, SweepOptions, SweepSchedule,
};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kvstash", version, about = "Chunking, expiring value store on Consul KV")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Consul agent URL (overrides the config file)
    #[arg(long, global = true)]
    kv_url: Option<String>,

    /// Namespace root (overrides the config file)
    #[arg(long, global = true)]
    kv_prefix: Option<String>,

    /// Refuse to chunk; large values are rejected and chunked values read as missing
    #[arg(long, global = true)]
    no_multikey: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a value, or every value of a type when KEY is omitted
    Get {
        r#type: String,
        key: Option<String>,

        /// Print the stored text instead of decoding it as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Store a value
    Set {
        r#type: String,
        key: String,

        /// JSON value, or `-` to read it from stdin
        value: String,

        /// Expire this many seconds from now
        #[arg(long, conflicts_with = "expire_at")]
        expire_in: Option<u64>,

        /// Expire at this unix timestamp
        #[arg(long)]
        expire_at: Option<u64>,

        /// Store the text as is instead of parsing it as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Delete a value, or every value of a type when KEY is omitted
    Delete { r#type: String, key: Option<String> },

    /// Remove expired values once and print a summary
    Cleanup(SweepArgs),

    /// Keep removing expired values until interrupted
    Sweep {
        #[command(flatten)]
        sweep: SweepArgs,

        /// Seconds before the first sweep; later sweeps adapt between a
        /// quarter and eight times this
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[derive(Debug, Args)]
struct SweepArgs {
    /// Also delete chunk sets no entry references
    #[arg(long)]
    reclaim_orphans: bool,

    /// Minimum age in seconds of an unreferenced chunk set before it is deleted
    #[arg(long, default_value_t = 3600)]
    orphan_grace: u64,
}

impl SweepArgs {
    fn options(&self) -> SweepOptions {
        SweepOptions {
            reclaim_orphans: self.reclaim_orphans,
            orphan_grace: Duration::from_secs(self.orphan_grace),
        }
    }
}

impl Cli {
    /// Loads the config file, if any, and applies flag overrides.
    fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::default(),
        };

        if let Some(url) = &self.kv_url {
            config.kv_url = url.clone();
        }
        if let Some(prefix) = &self.kv_prefix {
            config.kv_prefix = prefix.clone();
        }
        if self.no_multikey {
            config.multikey = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.store_config()?;
    let store = Arc::new(
        ChunkStore::connect(&config)
            .await
            .with_context(|| format!("cannot reach KV backend at {}", config.kv_url))?,
    );

    match cli.command {
        Command::Get { r#type, key, raw } => get(&store, &r#type, key.as_deref(), raw).await,
        Command::Set {
            r#type,
            key,
            value,
            expire_in,
            expire_at,
            raw,
        } => {
            let expires = match (expire_in, expire_at) {
                (Some(secs), _) => expires_in(Duration::from_secs(secs)),
                (None, Some(at)) => at,
                (None, None) => 0,
            };
            set(&store, &r#type, &key, &value, expires, raw).await
        }
        Command::Delete { r#type, key } => {
            match key {
                Some(key) => store.delete(&r#type, &key).await?,
                None => {
                    let removed = store.delete_all(&r#type).await?;
                    info!(ty = %r#type, removed, "Deleted type");
                }
            }
            Ok(())
        }
        Command::Cleanup(args) => {
            let report = ExpirySweeper::with_options(store, args.options())
                .cleanup()
                .await?;
            println!("{report}");
            Ok(())
        }
        Command::Sweep { sweep, interval } => run_sweeper(store, &sweep, interval).await,
    }
}

async fn get(store: &ChunkStore, ty: &str, key: Option<&str>, raw: bool) -> Result<()> {
    let Some(key) = key else {
        let all = store.get_all::<Value>(ty).await?;
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    };

    if raw {
        match store.get_raw(ty, key).await? {
            Some(text) => println!("{text}"),
            None => bail!("{ty}/{key} not found"),
        }
        return Ok(());
    }

    match store.get::<Value>(ty, key).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => bail!("{ty}/{key} not found"),
    }
    Ok(())
}

async fn set(
    store: &ChunkStore,
    ty: &str,
    key: &str,
    value: &str,
    expires: u64,
    raw: bool,
) -> Result<()> {
    let text = if value == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read value from stdin")?;
        buf
    } else {
        value.to_string()
    };

    if raw {
        store.set_raw(ty, key, &text, expires).await?;
    } else {
        let value: Value = serde_json::from_str(&text).context("value is not valid JSON")?;
        store.set(ty, key, &value, expires).await?;
    }

    info!(ty = %ty, key = %key, size = text.len(), expires, "Stored value");
    Ok(())
}

async fn run_sweeper(store: Arc<ChunkStore>, args: &SweepArgs, interval: u64) -> Result<()> {
    if interval == 0 {
        bail!("--interval must be greater than 0");
    }

    let base = Duration::from_secs(interval);
    let schedule = SweepSchedule {
        base_interval: base,
        min_interval: (base / 4).max(Duration::from_secs(1)),
        max_interval: base * 8,
        ..SweepSchedule::default()
    };

    let _sweeper = start_expiry_sweeper(ExpirySweeper::with_options(store, args.options()), schedule);
    info!(interval_secs = interval, "Sweeping until Ctrl+C");

    signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("Shutdown signal received, stopping sweeper...");
    Ok(())
}
