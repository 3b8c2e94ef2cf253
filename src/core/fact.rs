//! Facts: the typed, interpreted results of probes.
//!
//! Downstream configuration only ever sees facts, never raw probe output.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed fact value.
///
/// Serialized untagged so that cache records and manifests read naturally
/// (`true`, `8`, `"m"`, `{ alignment = 8 }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Named fields extracted from a probe's output grammar.
    Record(BTreeMap<String, FactValue>),
}

impl FactValue {
    /// Whether the value counts as "capability present" for `requires`.
    pub fn is_truthy(&self) -> bool {
        match self {
            FactValue::Bool(b) => *b,
            FactValue::Int(n) => *n != 0,
            FactValue::Str(s) => !s.is_empty(),
            FactValue::Record(fields) => !fields.is_empty(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FactValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FactValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a named field of a record value.
    pub fn field(&self, name: &str) -> Option<&FactValue> {
        match self {
            FactValue::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            FactValue::Bool(_) => "boolean",
            FactValue::Int(_) => "integer",
            FactValue::Str(_) => "string",
            FactValue::Record(_) => "record",
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Bool(b) => write!(f, "{}", b),
            FactValue::Int(n) => write!(f, "{}", n),
            FactValue::Str(s) => write!(f, "\"{}\"", s),
            FactValue::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// How a fact's value was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactOrigin {
    /// Interpreted from a conclusive compile/run.
    Probed,
    /// The run timed out or crashed; the probe's inconclusive policy applied.
    Inconclusive,
    /// Target binaries could not run; the probe's cross-compile answer applied.
    CrossCompile,
    /// Output could not be measured or parsed; the conservative fallback applied.
    Fallback,
    /// A required fact was not truthy, so the probe never ran.
    Skipped,
}

impl FactOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactOrigin::Probed => "probed",
            FactOrigin::Inconclusive => "inconclusive",
            FactOrigin::CrossCompile => "cross-compile",
            FactOrigin::Fallback => "fallback",
            FactOrigin::Skipped => "skipped",
        }
    }
}

/// Which probe and toolchain produced a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Probe identity
    pub probe: String,
    /// Toolchain fingerprint hash
    pub fingerprint: String,
    /// Hash of the rendered probe payload
    pub payload_hash: String,
    /// How the value was derived
    pub origin: FactOrigin,
}

/// An interpreted probe result plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub value: FactValue,
    pub provenance: Provenance,
}

impl Fact {
    /// Probe identity this fact belongs to.
    pub fn probe(&self) -> &str {
        &self.provenance.probe
    }
}

/// The read-only set of facts handed to downstream configuration.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct FactSet {
    facts: BTreeMap<String, Fact>,
}

impl FactSet {
    pub fn new() -> Self {
        FactSet::default()
    }

    /// Record a fact, replacing any earlier one for the same probe.
    pub fn insert(&mut self, fact: Fact) {
        self.facts.insert(fact.probe().to_string(), fact);
    }

    pub fn get(&self, probe: &str) -> Option<&Fact> {
        self.facts.get(probe)
    }

    pub fn value(&self, probe: &str) -> Option<&FactValue> {
        self.get(probe).map(|f| &f.value)
    }

    pub fn bool(&self, probe: &str) -> Option<bool> {
        self.value(probe).and_then(FactValue::as_bool)
    }

    pub fn int(&self, probe: &str) -> Option<i64> {
        self.value(probe).and_then(FactValue::as_int)
    }

    pub fn string(&self, probe: &str) -> Option<&str> {
        self.value(probe).and_then(FactValue::as_str)
    }

    /// A named field of a record fact (e.g. `mm-alignment` / `alignment`).
    pub fn field(&self, probe: &str, field: &str) -> Option<&FactValue> {
        self.value(probe).and_then(|v| v.field(field))
    }

    /// Whether the probe resolved to a truthy value.
    pub fn is_truthy(&self, probe: &str) -> bool {
        self.value(probe).is_some_and(FactValue::is_truthy)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Serialize the facts as pretty JSON keyed by probe identity.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
