//! Probe compilation, execution and interpretation.
//!
//! This module drives the C toolchain: it compiles probe programs, runs
//! them under a timeout, interprets their outcome and schedules whole
//! probe sessions.

pub mod cancel;
pub mod compile;
pub mod errors;
pub mod events;
pub mod executor;
pub mod fallback;
pub mod fingerprint;
pub mod interpret;
pub mod library;
pub mod session;
pub mod toolchain;

pub use cancel::CancellationToken;
pub use compile::{CompileResult, ProbeCompiler};
pub use errors::{Condition, ProbeError};
pub use events::{DiagnosticSink, JsonLinesSink, MemorySink, ProbeEvent, TracingSink};
pub use executor::{RunResult, RunStatus};
pub use fingerprint::{fingerprint_for, reconfigure, ToolchainFingerprint};
pub use interpret::{interpret, Interpretation};
pub use session::{ProbeSession, SessionOptions};
pub use toolchain::{detect_toolchain, CommandSpec, GccToolchain, MsvcToolchain, Toolchain};
