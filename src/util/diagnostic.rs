//! User-friendly diagnostic messages.
//!
//! Every fatal error carries its root cause, the probe or stage it came
//! from, and suggested fixes.

use std::fmt;
use std::path::PathBuf;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion when no probe manifest is found.
    pub const NO_MANIFEST: &str = "help: Create a Probes.toml or pass `--manifest <path>`";

    /// Suggestion when no compiler is available.
    pub const NO_COMPILER: &str =
        "help: Install a C compiler, set CC, or add `cc = ...` to .cprobe/toolchain.toml";

    /// Suggestion when a probe declaration is rejected.
    pub const INVALID_PROBE: &str = "help: Fix the probe declaration in your manifest";

    /// Suggestion when execution-requiring probes lack a cross-compile answer.
    pub const CROSS_DEFAULT: &str =
        "help: Declare `cross-compile = \"assume-present\" | \"assume-absent\"` or a `fallback`";

    /// Suggestion when a cached fact looks stale.
    pub const STALE_CACHE: &str = "help: Run `cprobe cache clean` to drop cached facts";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location (file path)
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Diagnostic {
            message: message.into(),
            severity,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Error)
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Warning)
    }

    /// Create a new note diagnostic.
    pub fn note(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Note)
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = match (color, self.severity) {
            (true, Severity::Error) => "\x1b[1;31merror\x1b[0m",
            (true, Severity::Warning) => "\x1b[1;33mwarning\x1b[0m",
            (true, Severity::Note) => "\x1b[1;36mnote\x1b[0m",
            (false, Severity::Error) => "error",
            (false, Severity::Warning) => "warning",
            (false, Severity::Note) => "note",
        };

        output.push_str(&format!("{}: {}\n", severity_str, self.message));

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            for suggestion in &self.suggestions {
                output.push_str(&format!("{}\n", suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}
