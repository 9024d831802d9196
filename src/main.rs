//! Main entry point for the amplicon-tune application.
//!
//! Parses the command line, sets up logging and hands over to
//! [`amplicon_tune::cli::run_cli`].

use amplicon_tune::cli::{run_cli, Cli};

// External Crate Imports
use clap::Parser;
use log::{error, info};

fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logger; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    info!("Starting amplicon-tune {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run_cli(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Analysis finished successfully.");
}
