//! `keylease` command line tool
//!
//! Loads configuration, initializes logging, connects the configured store,
//! and runs one lock operation. Exit status 0 means the operation succeeded,
//! 1 means the lock was held elsewhere, already gone on unlock, or lost
//! while holding.

mod cli;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use keylease::{LeaseEnd, LockContext, LockStore, Locker, MemoryLockStore};
use keylease_common::{KeyleaseConfig, StoreBackend, StoreConfig, init_logging};
use tracing::{info, warn};

use crate::cli::{Cli, Command, HoldArgs, LockArgs, UnlockArgs};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = KeyleaseConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _logging_guard = init_logging(&config.logging).context("initializing logging")?;

    if matches!(cli.command, Command::Unlock(_)) && cli.holder.is_none() {
        bail!("unlock needs --holder: a generated identity never owns an existing lock");
    }

    let store = connect_store(&config.store).await?;
    let mut locker = Locker::with_config(store, config.locker.clone());
    if let Some(holder) = cli.holder {
        locker = locker.with_holder(holder);
    }
    info!(holder = %locker.holder(), backend = ?config.store.backend, "keylease started");

    let ok = match cli.command {
        Command::Lock(args) => run_lock(&locker, args).await?,
        Command::Unlock(args) => run_unlock(&locker, args).await?,
        Command::Hold(args) => run_hold(&locker, args).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn LockStore>> {
    match config.backend {
        StoreBackend::Memory => {
            let mut store = MemoryLockStore::new();
            if config.cleanup_interval_ms > 0 {
                store = store.with_cleanup(Duration::from_millis(config.cleanup_interval_ms));
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Redis => connect_redis(&config.redis_url).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> anyhow::Result<Arc<dyn LockStore>> {
    let store = keylease::RedisLockStore::connect(url)
        .await
        .with_context(|| format!("connecting to redis at {url}"))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> anyhow::Result<Arc<dyn LockStore>> {
    bail!("keylease was built without the redis backend")
}

async fn run_lock(locker: &Locker, args: LockArgs) -> anyhow::Result<bool> {
    let acquired = match args.max_wait_ms {
        Some(max_wait_ms) => {
            let ctx = LockContext::background();
            locker
                .lock_backoff(
                    &ctx,
                    &args.key,
                    args.ttl(),
                    Duration::from_millis(max_wait_ms),
                )
                .await?
        }
        None => locker.lock(&args.key, args.ttl()).await?,
    };

    if acquired {
        println!("acquired {} as {}", args.key, locker.holder());
    } else {
        println!("{} is held by another holder", args.key);
    }
    Ok(acquired)
}

async fn run_unlock(locker: &Locker, args: UnlockArgs) -> anyhow::Result<bool> {
    let released = locker.unlock(&args.key).await?;
    if released {
        println!("released {}", args.key);
    } else {
        println!("{} is not held by {}", args.key, locker.holder());
    }
    Ok(released)
}

async fn run_hold(locker: &Locker, args: HoldArgs) -> anyhow::Result<bool> {
    if args.max_hold() < args.ttl() {
        bail!(
            "--max-hold-ms ({}) must not be shorter than --ttl-ms ({})",
            args.max_hold_ms,
            args.ttl_ms
        );
    }

    let ctx = LockContext::background();
    let lease = if args.backoff {
        locker
            .lock_backoff_with_renew(&ctx, &args.key, args.ttl(), args.max_hold())
            .await?
    } else {
        locker
            .lock_with_renew(&ctx, &args.key, args.ttl(), args.max_hold())
            .await?
    };

    if !lease.is_locked() {
        println!("{} is held by another holder", args.key);
        return Ok(false);
    }
    println!("holding {} as {}", args.key, locker.holder());

    tokio::select! {
        _ = lease.done() => {}
        _ = shutdown::wait_for_shutdown_signal() => {}
    }

    match lease.release().await {
        Some(end) => {
            println!("released {} ({end})", args.key);
            Ok(matches!(end, LeaseEnd::Cancelled | LeaseEnd::MaxHoldReached))
        }
        None => {
            warn!(key = %args.key, "Lease ended without a reason");
            Ok(false)
        }
    }
}
