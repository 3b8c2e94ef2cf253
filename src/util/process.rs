//! Subprocess construction utilities.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Build the `Command` with stdin closed.
    ///
    /// Output handling and process-group placement are left to the caller.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Execute the command and wait for completion, without a timeout.
    ///
    /// Only meant for short tool queries such as `cc --version`.
    pub fn exec(&self) -> Result<Output> {
        self.to_command()
            .output()
            .with_context(|| format!("failed to execute `{}`", self.display_command()))
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Resolve a tool: the program named by `env_var` if it exists, else the
/// first of `candidates` found on PATH.
fn find_tool(env_var: &str, candidates: &[&str]) -> Option<PathBuf> {
    std::env::var(env_var)
        .ok()
        .and_then(|name| find_executable(&name))
        .or_else(|| candidates.iter().find_map(|name| find_executable(name)))
}

/// Find a C compiler (`$CC`, then cc, gcc, clang, cl).
pub fn find_c_compiler() -> Option<PathBuf> {
    find_tool("CC", &["cc", "gcc", "clang", "cl"])
}

/// Find a static archiver (`$AR`, then ar, llvm-ar, lib).
pub fn find_ar() -> Option<PathBuf> {
    find_tool("AR", &["ar", "llvm-ar", "lib"])
}
