//! `cprobe run` command

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use crate::cli::{GlobalFlags, MessageFormat, RunArgs};
use cprobe::builder::{CancellationToken, Condition, DiagnosticSink, JsonLinesSink, ProbeEvent};
use cprobe::core::fact::FactOrigin;
use cprobe::ops::{self, RunOptions};
use cprobe::util::{GlobalContext, Shell, Status};

pub fn execute(args: RunArgs, global: &GlobalFlags) -> Result<()> {
    let json = args.message_format == MessageFormat::Json;
    let shell = Arc::new(Shell::from_flags(global.quiet, global.verbose, global.color, json));

    let mut ctx = GlobalContext::new()?;
    ctx.set_verbose(global.verbose);

    let opts = RunOptions {
        manifest_path: args.manifest,
        probes: args.probes,
        jobs: args.jobs,
        timeout_secs: args.timeout,
        target: args.target,
        no_cache: args.no_cache,
    };

    let sink: Arc<dyn DiagnosticSink> = if json {
        Arc::new(JsonLinesSink::stdout())
    } else {
        let total = ops::load_manifest(&ctx, opts.manifest_path.as_deref())?
            .select(&opts.probes)?
            .len();
        Arc::new(ShellSink::new(Arc::clone(&shell), total as u64))
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel())
        .context("failed to install interrupt handler")?;

    let facts = ops::run(&ctx, &opts, sink, cancel)?;

    if let Some(path) = &args.output {
        let content = facts.to_json_pretty().context("failed to serialize facts")?;
        cprobe::util::fs::write_string(path, &content)?;
        tracing::debug!("wrote facts to {}", path.display());
    }

    if !json {
        for fact in facts.iter() {
            println!("{} = {}", fact.probe(), fact.value);
        }
    }

    Ok(())
}

/// Renders session events as shell status lines and a progress bar.
struct ShellSink {
    shell: Arc<Shell>,
    progress: Mutex<Option<ProgressBar>>,
}

impl ShellSink {
    fn new(shell: Arc<Shell>, total: u64) -> Self {
        let progress = shell.progress(total, "probing");
        ShellSink {
            shell,
            progress: Mutex::new(progress),
        }
    }

    fn println(&self, status: Status, msg: String) {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        match progress.as_ref() {
            Some(pb) => pb.suspend(|| self.shell.status(status, msg)),
            None => self.shell.status(status, msg),
        }
    }
}

impl DiagnosticSink for ShellSink {
    fn emit(&self, event: &ProbeEvent) {
        match event {
            ProbeEvent::ProbeStarted { probe, .. } => {
                let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(pb) = progress.as_ref() {
                    pb.set_message(probe.clone());
                } else if self.shell.is_verbose() {
                    drop(progress);
                    self.println(Status::Probing, probe.clone());
                }
            }
            ProbeEvent::ProbeFinished {
                probe,
                value,
                origin,
                cached,
                ..
            } => {
                {
                    let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(pb) = progress.as_ref() {
                        pb.inc(1);
                    }
                }
                if *origin == FactOrigin::Skipped {
                    self.println(Status::Skipped, format!("{} (requirement not met)", probe));
                } else if self.shell.is_verbose() {
                    let status = if *cached { Status::Cached } else { Status::Finished };
                    self.println(status, format!("{} = {} [{}]", probe, value, origin.as_str()));
                }
            }
            ProbeEvent::ProbeDiagnostic {
                probe,
                condition,
                message,
                output,
            } => {
                // A failed compile is the expected answer for an absent capability.
                if *condition == Condition::CompileFailed && !self.shell.is_verbose() {
                    return;
                }
                let mut text = format!("{}: {} ({})", probe, message, condition);
                if self.shell.is_verbose() {
                    if let Some(output) = output {
                        text.push('\n');
                        text.push_str(output.trim_end());
                    }
                }
                self.println(Status::Warning, text);
            }
            ProbeEvent::SessionFinished {
                success,
                probes,
                cached,
                duration_ms,
            } => {
                if let Some(pb) = self
                    .progress
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take()
                {
                    pb.finish_and_clear();
                }
                if *success {
                    self.println(
                        Status::Finished,
                        format!(
                            "{} probe(s), {} cached, in {:.2}s",
                            probes,
                            cached,
                            *duration_ms as f64 / 1000.0
                        ),
                    );
                }
            }
        }
    }
}
