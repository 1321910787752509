//! simloc CLI Binary
//!
//! Command-line interface for locating, caching and mounting simulations.

use anyhow::Context;
use clap::Parser;
use simloc::logging::init_logging;
use simloc::tooling::cli::{resolve_invocation, Cli, CliContext, Invocation};
use std::process;

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let original = std::env::var("SSH_ORIGINAL_COMMAND").ok();
    let args = match resolve_invocation(std::env::args().collect(), original.as_deref())? {
        Invocation::Args(args) => args,
        Invocation::PathExists(path) => return Ok(if path.exists() { 0 } else { 1 }),
    };
    let cli = Cli::parse_from(args);

    let context =
        CliContext::new(cli.config.clone()).context("Failed to load configuration")?;

    let logging = cli.logging_config(&context.config().logging);
    init_logging(Some(&logging)).context("Failed to initialize logging")?;

    let output = context.execute(&cli.command)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(0)
}
