//! Shell output and progress for the CLI.
//!
//! Human mode prints right-aligned status lines to stderr and may draw a
//! progress bar. JSON mode prints nothing but the event stream on stdout.

use std::fmt::Display;
use std::io::{self, IsTerminal};

use indicatif::{ProgressBar, ProgressStyle};

/// Shell output mode. Human and Json are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    Human { verbosity: Verbosity, color: ColorChoice },
    Json,
}

impl Default for ShellMode {
    fn default() -> Self {
        ShellMode::Human {
            verbosity: Verbosity::Normal,
            color: ColorChoice::Auto,
        }
    }
}

/// Output verbosity level (Human mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// --quiet: errors only, no progress
    Quiet,
    #[default]
    Normal,
    /// --verbose: no progress bars, debug logging
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

/// Semantic status of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Finished,
    Removed,
    Building,
    Probing,
    Cached,
    Info,
    Skipped,
    Warning,
    Error,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Finished => "Finished",
            Status::Removed => "Removed",
            Status::Building => "Building",
            Status::Probing => "Probing",
            Status::Cached => "Cached",
            Status::Info => "Info",
            Status::Skipped => "Skipped",
            Status::Warning => "Warning",
            Status::Error => "error",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Finished | Status::Removed => "\x1b[1;32m",
            Status::Building | Status::Probing | Status::Cached => "\x1b[1;36m",
            Status::Info => "\x1b[1;34m",
            Status::Skipped | Status::Warning => "\x1b[1;33m",
            Status::Error => "\x1b[1;31m",
        }
    }
}

const STATUS_WIDTH: usize = 12;

/// Central shell for all CLI output.
#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
    use_color: bool,
}

impl Shell {
    pub fn new(mode: ShellMode) -> Self {
        let use_color = match mode {
            ShellMode::Json => false,
            ShellMode::Human { color, .. } => match color {
                ColorChoice::Auto => io::stderr().is_terminal(),
                ColorChoice::Always => true,
                ColorChoice::Never => false,
            },
        };
        Shell { mode, use_color }
    }

    /// Create a shell from CLI flags. JSON takes precedence over quiet/verbose.
    pub fn from_flags(quiet: bool, verbose: bool, color: ColorChoice, json: bool) -> Self {
        let mode = if json {
            ShellMode::Json
        } else {
            let verbosity = if quiet {
                Verbosity::Quiet
            } else if verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Normal
            };
            ShellMode::Human { verbosity, color }
        };
        Shell::new(mode)
    }

    pub fn mode(&self) -> ShellMode {
        self.mode
    }

    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    pub fn is_quiet(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Quiet,
                ..
            }
        )
    }

    pub fn is_verbose(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Verbose,
                ..
            }
        )
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Print `{status:>12} {message}` to stderr.
    ///
    /// Quiet mode prints errors only; JSON mode prints nothing.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() || (self.is_quiet() && status != Status::Error) {
            return;
        }
        eprintln!("{} {}", self.format_status(status), msg);
    }

    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();
        if self.use_color {
            format!(
                "{}{:>width$}\x1b[0m",
                status.color_code(),
                text,
                width = STATUS_WIDTH
            )
        } else {
            format!("{:>width$}", text, width = STATUS_WIDTH)
        }
    }

    /// A progress bar over `total` items, or `None` when progress is not
    /// shown (quiet, verbose, JSON, or stderr is not a terminal).
    pub fn progress(&self, total: u64, msg: impl Display) -> Option<ProgressBar> {
        let show = matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Normal,
                ..
            }
        ) && io::stderr().is_terminal()
            && total > 1;
        if !show {
            return None;
        }

        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(msg.to_string());
        Some(pb)
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new(ShellMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags_precedence() {
        assert!(Shell::from_flags(true, true, ColorChoice::Never, true).is_json());
        assert!(Shell::from_flags(true, false, ColorChoice::Never, false).is_quiet());
        assert!(Shell::from_flags(false, true, ColorChoice::Never, false).is_verbose());
    }

    #[test]
    fn test_format_status_alignment() {
        let shell = Shell::from_flags(false, false, ColorChoice::Never, false);
        assert_eq!(shell.format_status(Status::Probing), "     Probing");
        assert!(!shell.use_color());

        let colored = Shell::from_flags(false, false, ColorChoice::Always, false);
        assert!(colored.format_status(Status::Error).starts_with("\x1b[1;31m"));
    }

    #[test]
    fn test_no_progress_outside_normal_mode() {
        let json = Shell::from_flags(false, false, ColorChoice::Never, true);
        assert!(json.progress(10, "probing").is_none());
        let quiet = Shell::from_flags(true, false, ColorChoice::Never, false);
        assert!(quiet.progress(10, "probing").is_none());
    }
}
