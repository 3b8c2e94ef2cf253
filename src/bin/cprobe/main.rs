//! cprobe CLI - capability probes for C toolchains

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cprobe::util::diagnostic;
use cprobe::ProbeError;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        match e.downcast_ref::<ProbeError>() {
            Some(err) => diagnostic::emit(&err.to_diagnostic(), std::io::stderr().is_terminal()),
            None => eprintln!("error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("cprobe=debug")
    } else {
        EnvFilter::new("cprobe=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let global = cli::GlobalFlags {
        verbose: cli.verbose,
        quiet: cli.quiet,
        color: cli.color,
    };

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &global),
        Commands::Show(args) => commands::show::execute(args),
        Commands::Cache(args) => commands::cache::execute(args, &global),
        Commands::Toolchain(args) => commands::toolchain::execute(args),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
