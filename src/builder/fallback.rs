//! Answers for probes whose binaries cannot run on this host.

use crate::builder::errors::{Condition, ProbeError};
use crate::core::fact::{FactOrigin, FactValue};
use crate::core::probe::Probe;

/// A value decided without executing the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub value: FactValue,
    pub origin: FactOrigin,
    /// `NotExecutable` when the conservative fallback stood in for an
    /// explicit cross-compile answer.
    pub condition: Option<Condition>,
}

/// Resolve a probe that needs execution on a target we cannot run.
///
/// Prefers the probe's declared cross-compile answer, then its conservative
/// fallback. `None` when the probe declares neither.
pub fn resolve(probe: &Probe) -> Option<Resolution> {
    if let Some(default) = probe.cross_compile() {
        return Some(Resolution {
            value: default.value(),
            origin: FactOrigin::CrossCompile,
            condition: None,
        });
    }
    probe.fallback().map(|value| Resolution {
        value: value.clone(),
        origin: FactOrigin::Fallback,
        condition: Some(Condition::NotExecutable),
    })
}

/// Like [`resolve`], but a probe with no answer is an error.
pub fn resolve_or_err(probe: &Probe) -> Result<Resolution, ProbeError> {
    resolve(probe).ok_or_else(|| ProbeError::MissingCrossCompileDefault(probe.id().to_string()))
}
