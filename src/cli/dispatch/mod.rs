//! Maps parsed arguments to an [`Action`].

use crate::cli::actions::{keygen, migrate, sweep, Action};
use crate::cli::commands::{
    store, ARG_INTERVAL_SECONDS, ARG_ONCE, ARG_SIGNING_SEED, CMD_KEYGEN, CMD_MIGRATE, CMD_SWEEP,
};
use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::time::Duration;

const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or the subcommand is unknown.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_MIGRATE, sub)) => {
            let options = store::Options::parse(sub)?;
            Ok(Action::Migrate(migrate::Args { dsn: options.dsn }))
        }
        Some((CMD_SWEEP, sub)) => {
            let options = store::Options::parse(sub)?;
            let interval = sub
                .get_one::<u64>(ARG_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS);
            Ok(Action::Sweep(sweep::Args {
                dsn: options.dsn,
                store_timeout: options.store_timeout,
                interval: Duration::from_secs(interval),
                once: sub.get_flag(ARG_ONCE),
            }))
        }
        Some((CMD_KEYGEN, sub)) => Ok(Action::Keygen(keygen::Args {
            signing_seed: sub
                .get_one::<String>(ARG_SIGNING_SEED)
                .cloned()
                .map(SecretString::from),
        })),
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}
