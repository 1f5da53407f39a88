//! Command line interface: `run` serves, `check` only validates the configuration.

use clap::{Args, Parser, Subcommand};
use shadow_rs::formatcp;
use std::path::PathBuf;

use crate::build;
use crate::config::DEFAULT_VERBOSITY;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

#[derive(Parser, Debug)]
#[command(name = "pelit", version = VERSION_INFO, about = "Pelit file storage server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration and start serving
    Run(Options),
    /// Validate the configuration and exit
    Check(Options),
}

impl Command {
    pub fn options(&self) -> &Options {
        match self {
            Command::Run(options) | Command::Check(options) => options,
        }
    }

    pub fn is_check(&self) -> bool {
        matches!(self, Command::Check(_))
    }
}

#[derive(Args, Debug)]
pub struct Options {
    #[arg(short = 'c', long, env = "PELIT_CONFIG", help = "Configuration file (TOML)")]
    pub config: PathBuf,
    #[arg(
        short = 'v',
        long = "verbose",
        env = "PELIT_VERBOSITY",
        default_value_t = DEFAULT_VERBOSITY,
        value_parser = clap::value_parser!(u8).range(0..=2),
        help = "Log level: 0 info, 1 warn, 2 error"
    )]
    pub verbosity: u8,
    #[arg(short = 'l', long = "log", env = "PELIT_LOG", help = "Append logs to this file")]
    pub log: Option<PathBuf>,
}
