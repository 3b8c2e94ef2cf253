//! Child process execution with timeouts.
//!
//! Every child (compiler or probe binary) is spawned in its own process
//! group. When the timeout expires or the session is cancelled the whole
//! group is killed and the child is reaped, so nothing it started outlives
//! the probe.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::builder::cancel::CancellationToken;
use crate::builder::errors::ProbeError;
use crate::util::process::ProcessBuilder;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunStatus {
    /// Exited normally with a status code.
    Exited { code: i32 },
    /// Killed after exceeding its timeout.
    TimedOut,
    /// Terminated by a signal.
    Crashed { signal: Option<i32> },
}

impl RunStatus {
    /// Exit code, when the process exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            RunStatus::Exited { code } => Some(*code),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }

    /// Whether the run neither confirmed nor refuted anything.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, RunStatus::TimedOut | RunStatus::Crashed { .. })
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Exited { code } => write!(f, "exited with status {}", code),
            RunStatus::TimedOut => write!(f, "timed out"),
            RunStatus::Crashed { signal: Some(sig) } => write!(f, "killed by signal {}", sig),
            RunStatus::Crashed { signal: None } => write!(f, "crashed"),
        }
    }
}

/// Captured result of a finished child.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub pid: u32,
}

/// Run a probe binary, directly or through `launcher` (an emulator command).
pub fn run(
    binary: &Path,
    launcher: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RunResult> {
    let process = match launcher.split_first() {
        Some((program, args)) => ProcessBuilder::new(program).args(args).arg(binary),
        None => ProcessBuilder::new(binary),
    };
    let result = spawn_and_wait(&process, timeout, cancel)?;
    tracing::debug!(
        "`{}` {} in {:.2}s",
        process.display_command(),
        result.status,
        result.elapsed.as_secs_f64()
    );
    Ok(result)
}

/// Spawn `process` in a new process group and wait for it.
///
/// Returns `Err` only for infrastructure failures (spawn or wait errors) and
/// for cancellation, which surfaces as [`ProbeError::Cancelled`].
pub fn spawn_and_wait(
    process: &ProcessBuilder,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RunResult> {
    if cancel.is_cancelled() {
        return Err(ProbeError::Cancelled.into());
    }

    let mut cmd = process.to_command();
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let start = Instant::now();
    let mut child = spawn_retrying_busy(&mut cmd)
        .with_context(|| format!("failed to spawn `{}`", process.display_command()))?;
    let pid = child.id();

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let exit = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(e) => {
                kill_group(&mut child);
                return Err(e).with_context(|| format!("failed to wait for process {}", pid));
            }
        }

        if cancel.is_cancelled() {
            kill_group(&mut child);
            join(stdout);
            join(stderr);
            return Err(ProbeError::Cancelled.into());
        }
        if start.elapsed() >= timeout {
            tracing::debug!("process {} exceeded {:?}, killing its group", pid, timeout);
            kill_group(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // Leftover background children would keep the pipes open.
    if exit.is_some() {
        kill_orphans(pid);
    }

    let status = match exit {
        Some(status) => status_of(status),
        None => RunStatus::TimedOut,
    };

    Ok(RunResult {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
        elapsed: start.elapsed(),
        pid,
    })
}

/// Spawn, retrying briefly on ETXTBSY.
///
/// A binary written by the compiler moments ago can still be open for
/// writing in a child forked concurrently by another probe thread.
fn spawn_retrying_busy(cmd: &mut Command) -> std::io::Result<Child> {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempts < 20 => {
                attempts += 1;
                thread::sleep(POLL_INTERVAL);
            }
            other => return other,
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn status_of(status: ExitStatus) -> RunStatus {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => RunStatus::Exited { code },
        (None, signal) => RunStatus::Crashed { signal },
    }
}

#[cfg(not(unix))]
fn status_of(status: ExitStatus) -> RunStatus {
    match status.code() {
        Some(code) => RunStatus::Exited { code },
        None => RunStatus::Crashed { signal: None },
    }
}

/// Kill the child's whole process group, then reap the child.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    if let Ok(pgid) = i32::try_from(child.id()) {
        // SAFETY: kill(2) has no memory-safety preconditions.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_orphans(pgid: u32) {
    if let Ok(pgid) = i32::try_from(pgid) {
        // SAFETY: kill(2) has no memory-safety preconditions. ESRCH is
        // expected when the group is already empty.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_orphans(_pgid: u32) {}
