//! Binary entry point for engram.
//!
//! Parses the CLI, resolves the process-wide configuration, and dispatches
//! into the command handlers. Errors print their wrapped message to stderr
//! and exit with code 1.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr and print_stdout in the main binary for CLI output
#![allow(clippy::print_stderr, clippy::print_stdout)]

use clap::Parser;
use engram::commands::{self, Cli};
use engram::config::EngramConfig;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = EngramConfig::resolve();

    match commands::run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Initializes tracing to stderr, filtered by `RUST_LOG` (default: warnings
/// from this crate only).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("engram=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
