use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_DSN: &str = "dsn";
pub const ARG_STORE_TIMEOUT_SECONDS: &str = "store-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("CREDENCE_DSN")
                .global(true),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_SECONDS)
                .long("store-timeout-seconds")
                .help("Timeout for a single store operation in seconds")
                .env("CREDENCE_STORE_TIMEOUT_SECONDS")
                .default_value("5")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub dsn: String,
    pub store_timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if `--dsn` is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .cloned()
            .context("missing required argument: --dsn")?;
        let store_timeout = matches
            .get_one::<u64>(ARG_STORE_TIMEOUT_SECONDS)
            .copied()
            .map_or(Duration::from_secs(5), Duration::from_secs);
        Ok(Self { dsn, store_timeout })
    }
}
