pub mod logging;
pub mod store;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const CMD_MIGRATE: &str = "migrate";
pub const CMD_SWEEP: &str = "sweep";
pub const CMD_KEYGEN: &str = "keygen";

pub const ARG_INTERVAL_SECONDS: &str = "interval-seconds";
pub const ARG_ONCE: &str = "once";
pub const ARG_SIGNING_SEED: &str = "signing-seed";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("credence")
        .about("Credential lifecycle and federation state")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new(CMD_MIGRATE).about("Apply database migrations"))
        .subcommand(
            Command::new(CMD_SWEEP)
                .about("Periodically remove expired federation state")
                .arg(
                    Arg::new(ARG_INTERVAL_SECONDS)
                        .long("interval-seconds")
                        .help("Seconds between cleanup passes")
                        .env("CREDENCE_SWEEP_INTERVAL_SECONDS")
                        .default_value("60")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new(ARG_ONCE)
                        .long("once")
                        .help("Run a single cleanup pass and exit")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new(CMD_KEYGEN)
                .about("Generate an access-token signing seed and print its PASERK id")
                .arg(
                    Arg::new(ARG_SIGNING_SEED)
                        .long("signing-seed")
                        .help("Existing base64url seed to describe instead of generating one")
                        .env("CREDENCE_SIGNING_SEED")
                        .hide_env_values(true),
                ),
        );

    let command = store::with_args(command);
    logging::with_args(command)
}
