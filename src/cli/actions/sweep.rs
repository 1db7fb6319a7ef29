use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::CoreConfig;
use crate::federation::{StateManager, StateStats};
use crate::store::postgres::PgEphemeralStore;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub store_timeout: Duration,
    pub interval: Duration,
    pub once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub removed: u64,
    pub stats: StateStats,
}

/// Run cleanup passes until interrupted, or once with `--once`.
/// # Errors
/// Returns an error if the database is unreachable or a pass fails with a
/// non-transient error.
pub async fn execute(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(2)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let config = CoreConfig::new().with_store_timeout(args.store_timeout);
    let manager = StateManager::new(Arc::new(PgEphemeralStore::new(pool.clone())), config);

    if args.once {
        run_pass(&manager).await?;
        pool.close().await;
        return Ok(());
    }

    info!(interval = ?args.interval, "sweeping expired federation state");
    let mut ticker = interval(args.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_pass(&manager).await {
                    Ok(_) => {}
                    Err(err) if err.is_transient() => {
                        warn!("cleanup pass skipped: {err}");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                info!("Gracefully shutdown");
                break;
            }
        }
    }

    pool.close().await;
    Ok(())
}

/// One cleanup pass followed by a stats snapshot.
/// # Errors
/// Returns the engine error if either step fails.
#[instrument(skip_all)]
pub async fn run_pass(manager: &StateManager) -> Result<Pass, crate::Error> {
    let removed = manager.cleanup().await?;
    let stats = manager.stats().await?;
    debug!(
        removed,
        active_states = stats.active_states,
        active_verifiers = stats.active_verifiers,
        temp_data_count = stats.temp_data_count,
        "cleanup pass complete"
    );
    Ok(Pass { removed, stats })
}
