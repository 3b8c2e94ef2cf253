//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell as CompletionShell;

use cprobe::util::ColorChoice;

/// cprobe - Capability probes for C toolchains
#[derive(Parser)]
#[command(name = "cprobe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Coloring of status output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
pub struct GlobalFlags {
    pub verbose: bool,
    pub quiet: bool,
    pub color: ColorChoice,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve probes to facts
    Run(RunArgs),

    /// Show probe declarations and the source they compile
    Show(ShowArgs),

    /// Manage cached facts
    Cache(CacheArgs),

    /// Toolchain information
    Toolchain(ToolchainArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Output format for `cprobe run`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum MessageFormat {
    /// Status lines on stderr, facts on stdout
    #[default]
    Human,
    /// One JSON event per line on stdout
    Json,
}

#[derive(Args)]
pub struct RunArgs {
    /// Probes to resolve (default: all); required probes are added
    pub probes: Vec<String>,

    /// Path to Probes.toml
    #[arg(long, env = "CPROBE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Number of parallel probes
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Probe binary timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Target triple to probe for
    #[arg(long)]
    pub target: Option<String>,

    /// Ignore the persistent fact cache
    #[arg(long)]
    pub no_cache: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    /// Also write the resulting facts as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Probes to show (default: all)
    pub probes: Vec<String>,

    /// Path to Probes.toml
    #[arg(long, env = "CPROBE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Print the generated C source of each probe
    #[arg(long)]
    pub source: bool,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Print the fact cache directory
    Path,

    /// List cached facts
    List,

    /// Remove cached facts
    Clean(CacheCleanArgs),
}

#[derive(Args)]
pub struct CacheCleanArgs {
    /// Also remove built fixture libraries
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ToolchainArgs {
    #[command(subcommand)]
    pub command: ToolchainCommands,
}

#[derive(Subcommand)]
pub enum ToolchainCommands {
    /// Show the detected toolchain and its fingerprint
    Show(ToolchainShowArgs),
}

#[derive(Args)]
pub struct ToolchainShowArgs {
    /// Target triple override
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}
