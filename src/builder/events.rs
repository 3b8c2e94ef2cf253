//! Probe session events.
//!
//! This module defines the stable JSON schema for machine-readable probe
//! output. These events are emitted when using `--message-format=json`.
//!
//! # Event Types
//!
//! - `probe-started`: A probe began compiling
//! - `probe-finished`: A probe resolved to a fact
//! - `probe-diagnostic`: A local condition degraded a probe's answer
//! - `session-finished`: Every requested probe resolved (or the session failed)
//!
//! # Stability
//!
//! The JSON schema is versioned and should remain backwards compatible.
//! New fields may be added, but existing fields should not be removed or renamed.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::builder::errors::Condition;
use crate::core::fact::{FactOrigin, FactValue};

/// An event emitted during a probe session.
///
/// Each event is serialized as a single JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum ProbeEvent {
    /// A probe was scheduled and began compiling.
    ProbeStarted {
        probe: String,
        /// Run policy (`compile-only`, `compile-and-run`, ...)
        policy: String,
    },

    /// A probe resolved to a fact.
    ProbeFinished {
        probe: String,
        value: FactValue,
        origin: FactOrigin,
        /// Whether the fact came from the cache
        cached: bool,
        duration_ms: u64,
    },

    /// A local condition degraded a probe's answer.
    ProbeDiagnostic {
        probe: String,
        condition: Condition,
        message: String,
        /// Captured compiler or probe output
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },

    /// The session completed (success or failure).
    SessionFinished {
        success: bool,
        /// Number of facts produced
        probes: u64,
        /// How many of them came from the cache
        cached: u64,
        duration_ms: u64,
    },
}

impl ProbeEvent {
    pub fn started(probe: impl Into<String>, policy: impl Into<String>) -> Self {
        ProbeEvent::ProbeStarted {
            probe: probe.into(),
            policy: policy.into(),
        }
    }

    pub fn diagnostic(
        probe: impl Into<String>,
        condition: Condition,
        message: impl Into<String>,
    ) -> Self {
        ProbeEvent::ProbeDiagnostic {
            probe: probe.into(),
            condition,
            message: message.into(),
            output: None,
        }
    }

    /// Attach captured output to a diagnostic event. No-op for other events.
    pub fn with_output(mut self, text: impl Into<String>) -> Self {
        if let ProbeEvent::ProbeDiagnostic { output, .. } = &mut self {
            let text = text.into();
            if !text.trim().is_empty() {
                *output = Some(text);
            }
        }
        self
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receives the events of a probe session.
///
/// Sinks are shared across probe worker threads.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: &ProbeEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: &ProbeEvent) {
        match event {
            ProbeEvent::ProbeStarted { probe, policy } => {
                tracing::debug!("probing `{}` ({})", probe, policy);
            }
            ProbeEvent::ProbeFinished {
                probe,
                value,
                origin,
                cached,
                ..
            } => {
                let fresh = if *cached { " (cached)" } else { "" };
                tracing::info!("{} = {} [{}]{}", probe, value, origin.as_str(), fresh);
            }
            ProbeEvent::ProbeDiagnostic {
                probe,
                condition: Condition::CompileFailed,
                message,
                output,
            } => {
                // A failed compile is the ordinary negative answer
                tracing::debug!("probe `{}`: {}", probe, message);
                if let Some(output) = output {
                    tracing::debug!("{}", output.trim_end());
                }
            }
            ProbeEvent::ProbeDiagnostic {
                probe,
                condition,
                message,
                ..
            } => {
                tracing::warn!("probe `{}` {}: {}", probe, condition, message);
            }
            ProbeEvent::SessionFinished {
                success,
                probes,
                cached,
                duration_ms,
            } => {
                tracing::info!(
                    "probe session {} with {} fact(s), {} cached, in {:.2}s",
                    if *success { "finished" } else { "failed" },
                    probes,
                    cached,
                    *duration_ms as f64 / 1000.0
                );
            }
        }
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesSink {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        JsonLinesSink::new(std::io::stdout())
    }
}

impl<W: Write + Send> DiagnosticSink for JsonLinesSink<W> {
    fn emit(&self, event: &ProbeEvent) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", event.to_json()).and_then(|_| out.flush()) {
            tracing::debug!("failed to write event: {}", e);
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProbeEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Conditions reported for `probe`, in emission order.
    pub fn conditions(&self, probe: &str) -> Vec<Condition> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProbeEvent::ProbeDiagnostic {
                    probe: p,
                    condition,
                    ..
                } if p == probe => Some(condition),
                _ => None,
            })
            .collect()
    }

    /// Number of `probe-started` events for `probe`.
    pub fn starts(&self, probe: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ProbeEvent::ProbeStarted { probe: p, .. } if p == probe))
            .count()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, event: &ProbeEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
