//! Probe session errors and local conditions.
//!
//! Fatal problems are [`ProbeError`]s and abort the session. Local
//! conditions ([`Condition`]) never abort: each one degrades to a fact plus
//! a `probe-diagnostic` event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::probe::ProbeDeclError;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Fatal error while probing.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum ProbeError {
    #[error("no usable C toolchain: {reason}")]
    #[diagnostic(
        code(cprobe::toolchain_unavailable),
        help("set CC or configure `.cprobe/toolchain.toml`")
    )]
    ToolchainUnavailable { reason: String },

    #[error("probe `{probe}` failed {attempts} time(s): {last_error}")]
    #[diagnostic(code(cprobe::retry_budget_exhausted))]
    RetryBudgetExhausted {
        probe: String,
        attempts: u32,
        last_error: String,
    },

    #[error("probe session cancelled")]
    #[diagnostic(code(cprobe::cancelled))]
    Cancelled,

    #[error("invalid probe declaration: {0}")]
    #[diagnostic(code(cprobe::invalid_declaration))]
    InvalidDeclaration(#[from] ProbeDeclError),

    #[error("probe dependency cycle involving `{0}`")]
    #[diagnostic(code(cprobe::dependency_cycle))]
    DependencyCycle(String),

    #[error("probe `{0}` cannot run on this target and declares no cross-compile default or fallback")]
    #[diagnostic(
        code(cprobe::missing_cross_compile_default),
        help("declare `cross-compile` or `fallback` for the probe")
    )]
    MissingCrossCompileDefault(String),
}

impl ProbeError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ProbeError::ToolchainUnavailable { reason } => {
                Diagnostic::error("no usable C toolchain")
                    .with_context(reason.clone())
                    .with_suggestion(suggestions::NO_COMPILER)
            }
            ProbeError::RetryBudgetExhausted {
                probe,
                attempts,
                last_error,
            } => Diagnostic::error(format!("probe `{}` could not be carried out", probe))
                .with_context(format!("{} attempt(s), last error: {}", attempts, last_error))
                .with_suggestion("help: Check disk space and permissions on the build directory"),
            ProbeError::Cancelled => Diagnostic::error("probe session cancelled"),
            ProbeError::InvalidDeclaration(err) => {
                Diagnostic::error(err.to_string()).with_suggestion(suggestions::INVALID_PROBE)
            }
            ProbeError::DependencyCycle(probe) => {
                Diagnostic::error(format!("probe `{}` is part of a `requires` cycle", probe))
                    .with_suggestion("help: Remove one of the `requires` entries forming the cycle")
            }
            ProbeError::MissingCrossCompileDefault(probe) => Diagnostic::error(format!(
                "probe `{}` needs a cross-compile answer",
                probe
            ))
            .with_suggestion(suggestions::CROSS_DEFAULT),
        }
    }
}

/// A local, non-fatal probe condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    /// The compiler rejected the program.
    CompileFailed,
    /// The probe binary exceeded its run timeout and was killed.
    TimedOut,
    /// The probe binary was terminated by a signal.
    Crashed,
    /// stdout did not satisfy the output grammar.
    ParseFailed,
    /// The binary cannot run on this host.
    NotExecutable,
    /// A persisted cache record could not be used.
    CacheCorrupt,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::CompileFailed => "compile-failed",
            Condition::TimedOut => "timed-out",
            Condition::Crashed => "crashed",
            Condition::ParseFailed => "parse-failed",
            Condition::NotExecutable => "not-executable",
            Condition::CacheCorrupt => "cache-corrupt",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
