use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Take, release, and hold distributed locks
#[derive(Debug, Parser)]
#[command(name = "keylease", version, about)]
pub struct Cli {
    /// Configuration file (defaults to `keylease.{yml,toml,json}` if present)
    #[arg(short = 'c', long = "config", env = "KEYLEASE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Holder identity written as the lock value (generated when omitted)
    #[arg(long = "holder", global = true)]
    pub holder: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Try to take a lock, optionally retrying with backoff
    Lock(LockArgs),
    /// Release a lock owned by `--holder`
    Unlock(UnlockArgs),
    /// Take a lock and keep it renewed until max hold, loss, or Ctrl+C
    Hold(HoldArgs),
}

#[derive(Debug, Args)]
pub struct LockArgs {
    #[arg(short = 'k', long = "key")]
    pub key: String,
    #[arg(long = "ttl-ms", default_value_t = 10_000)]
    pub ttl_ms: u64,
    /// Retry for up to this long while the key is held elsewhere
    #[arg(long = "max-wait-ms")]
    pub max_wait_ms: Option<u64>,
}

impl LockArgs {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Args)]
pub struct UnlockArgs {
    #[arg(short = 'k', long = "key")]
    pub key: String,
}

#[derive(Debug, Args)]
pub struct HoldArgs {
    #[arg(short = 'k', long = "key")]
    pub key: String,
    #[arg(long = "ttl-ms", default_value_t = 10_000)]
    pub ttl_ms: u64,
    #[arg(long = "max-hold-ms", default_value_t = 60_000)]
    pub max_hold_ms: u64,
    /// Wait for the key with backoff instead of a single attempt
    #[arg(long = "backoff")]
    pub backoff: bool,
}

impl HoldArgs {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }
}
