//! Mapping compile and run outcomes to facts.

use crate::builder::errors::Condition;
use crate::builder::executor::{RunResult, RunStatus};
use crate::core::fact::{FactOrigin, FactValue};
use crate::core::probe::{InconclusivePolicy, Probe, RunPolicy};

/// The interpreted answer of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub value: FactValue,
    pub origin: FactOrigin,
    /// Local condition to report, if any
    pub condition: Option<Condition>,
    /// Human readable detail for the condition
    pub detail: Option<String>,
}

impl Interpretation {
    fn probed(value: FactValue) -> Self {
        Interpretation {
            value,
            origin: FactOrigin::Probed,
            condition: None,
            detail: None,
        }
    }

    fn with_condition(mut self, condition: Condition, detail: impl Into<String>) -> Self {
        self.condition = Some(condition);
        self.detail = Some(detail.into());
        self
    }
}

/// Interpret a probe's outcome according to its run policy.
///
/// `run` is `None` when the binary was not executed (compile-only probes,
/// or compile failure).
pub fn interpret(probe: &Probe, compiled: bool, run: Option<&RunResult>) -> Interpretation {
    match probe.policy() {
        RunPolicy::CompileOnly => {
            let result = Interpretation::probed(FactValue::Bool(compiled));
            if compiled {
                result
            } else {
                result.with_condition(Condition::CompileFailed, "probe did not compile")
            }
        }
        RunPolicy::CompileAndRun => interpret_exit(probe, compiled, run),
        RunPolicy::CompileRunCompare => interpret_output(probe, compiled, run),
    }
}

fn interpret_exit(probe: &Probe, compiled: bool, run: Option<&RunResult>) -> Interpretation {
    if !compiled {
        return Interpretation::probed(FactValue::Bool(false))
            .with_condition(Condition::CompileFailed, "probe did not compile");
    }
    let Some(run) = run else {
        return not_run(probe);
    };

    match run.status {
        RunStatus::Exited { code } => Interpretation::probed(FactValue::Bool(code == 0)),
        status => {
            let assumed = probe.on_inconclusive() == InconclusivePolicy::AssumeTrue;
            Interpretation {
                value: FactValue::Bool(assumed),
                origin: FactOrigin::Inconclusive,
                condition: None,
                detail: None,
            }
            .with_condition(
                inconclusive_condition(status),
                format!("probe binary {}; assuming {}", status, assumed),
            )
        }
    }
}

fn interpret_output(probe: &Probe, compiled: bool, run: Option<&RunResult>) -> Interpretation {
    if !compiled {
        return fallback(probe, Condition::CompileFailed, "probe did not compile");
    }
    let Some(run) = run else {
        return not_run(probe);
    };

    match run.status {
        RunStatus::Exited { code: 0 } => {}
        RunStatus::Exited { code } => {
            return fallback(
                probe,
                Condition::ParseFailed,
                format!("probe binary exited with status {}", code),
            );
        }
        status => {
            return fallback(
                probe,
                inconclusive_condition(status),
                format!("probe binary {}", status),
            );
        }
    }

    let Some(grammar) = probe.grammar() else {
        return fallback(probe, Condition::ParseFailed, "probe declares no output grammar");
    };
    match grammar.parse(&run.stdout) {
        Ok(value) => Interpretation::probed(value),
        Err(e) => fallback(probe, Condition::ParseFailed, e.to_string()),
    }
}

fn inconclusive_condition(status: RunStatus) -> Condition {
    match status {
        RunStatus::TimedOut => Condition::TimedOut,
        _ => Condition::Crashed,
    }
}

fn fallback(probe: &Probe, condition: Condition, detail: impl Into<String>) -> Interpretation {
    Interpretation {
        value: probe
            .fallback()
            .cloned()
            .unwrap_or(FactValue::Bool(false)),
        origin: FactOrigin::Fallback,
        condition: None,
        detail: None,
    }
    .with_condition(condition, detail)
}

fn not_run(probe: &Probe) -> Interpretation {
    fallback(probe, Condition::NotExecutable, "probe binary was not executed")
}
