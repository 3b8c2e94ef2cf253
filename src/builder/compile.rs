//! Probe compilation.
//!
//! Each compile gets its own scoped temporary directory holding the rendered
//! source and the produced binary. The directory belongs to the
//! [`CompileResult`] and is removed when it is dropped, on every path.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::TempDir;

use crate::builder::cancel::CancellationToken;
use crate::builder::errors::ProbeError;
use crate::builder::executor::{spawn_and_wait, RunStatus};
use crate::builder::fingerprint::ToolchainFingerprint;
use crate::builder::toolchain::{ProbeCompileInput, Toolchain};
use crate::core::probe::Probe;

/// Outcome of compiling (and linking) one probe.
#[derive(Debug)]
pub struct CompileResult {
    dir: TempDir,
    binary: PathBuf,
    /// Whether the compiler produced an executable
    pub success: bool,
    /// Compiler stdout and stderr
    pub diagnostics: String,
    /// The command that was run
    pub command: String,
}

impl CompileResult {
    /// The produced executable. Only meaningful when `success`.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Scratch directory owned by this result.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Compiles probes with one toolchain.
pub struct ProbeCompiler<'a> {
    toolchain: &'a dyn Toolchain,
    fingerprint: &'a ToolchainFingerprint,
    work_dir: Option<PathBuf>,
    timeout: Duration,
}

impl<'a> ProbeCompiler<'a> {
    pub fn new(
        toolchain: &'a dyn Toolchain,
        fingerprint: &'a ToolchainFingerprint,
        timeout: Duration,
    ) -> Self {
        ProbeCompiler {
            toolchain,
            fingerprint,
            work_dir: None,
            timeout,
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Compile `probe`, linking `extra_lib` in addition to its own libraries.
    ///
    /// A compiler that rejects the program is a normal result with
    /// `success == false`. `Err` means the compile could not be carried out
    /// (spawn failure, compiler timeout, cancellation). A compiler that is
    /// missing or not executable is [`ProbeError::ToolchainUnavailable`].
    pub fn compile(
        &self,
        probe: &Probe,
        extra_lib: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CompileResult> {
        let dir = self.scratch_dir()?;
        let source = dir
            .path()
            .join(format!("probe.{}", probe.language().extension()));
        let mut binary = dir.path().join("probe");
        let exe_ext = self.toolchain.exe_extension();
        if !exe_ext.is_empty() {
            binary.set_extension(exe_ext);
        }

        std::fs::write(&source, probe.render_source())
            .with_context(|| format!("failed to write probe source: {}", source.display()))?;

        let mut cflags = self.fingerprint.cflags.clone();
        cflags.extend(probe.flags().iter().cloned());
        let mut libs = probe.libraries().to_vec();
        libs.extend(extra_lib.map(str::to_string));

        let input = ProbeCompileInput {
            source,
            output: binary.clone(),
            language: probe.language(),
            std: probe.std().map(str::to_string),
            include_dirs: probe.include_dirs().to_vec(),
            lib_dirs: probe.lib_dirs().to_vec(),
            libs,
            cflags,
            ldflags: self.fingerprint.ldflags.clone(),
        };
        let process = self
            .toolchain
            .probe_command(&input)
            .to_process()
            .cwd(dir.path());
        let command = process.display_command();
        tracing::debug!("compiling probe `{}`: {}", probe.id(), command);

        let result = spawn_and_wait(&process, self.timeout, cancel)
            .map_err(unavailable_compiler)?;
        if result.status == RunStatus::TimedOut {
            return Err(anyhow!(
                "compiler did not finish within {}s: {}",
                self.timeout.as_secs(),
                command
            ));
        }

        let mut diagnostics = result.stdout;
        diagnostics.push_str(&result.stderr);
        let success = result.status.success() && binary.is_file();
        if !success {
            tracing::debug!(
                "probe `{}` did not compile ({}): {}",
                probe.id(),
                result.status,
                diagnostics.lines().next().unwrap_or("")
            );
        }

        Ok(CompileResult {
            dir,
            binary,
            success,
            diagnostics,
            command,
        })
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cprobe-");
        match &self.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory: {}", parent.display())
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .context("failed to create probe scratch directory")
    }
}

/// Turn a spawn error for a missing or unusable compiler into the fatal
/// [`ProbeError::ToolchainUnavailable`]; anything else passes through.
fn unavailable_compiler(err: anyhow::Error) -> anyhow::Error {
    let missing = err.chain().any(|cause| {
        cause.downcast_ref::<io::Error>().is_some_and(|e| {
            matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied)
        })
    });
    if !missing {
        return err;
    }
    ProbeError::ToolchainUnavailable {
        reason: format!("{:#}", err),
    }
    .into()
}
