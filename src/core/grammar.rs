//! Output grammars for probes that report values on stdout.
//!
//! A grammar is an anchored regular expression with named capture groups,
//! each declared with a scalar type. Parsing never guesses: every declared
//! field must be captured and must convert exactly.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fact::FactValue;

/// Scalar type of a captured field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Boolean,
    String,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::String => "string",
        }
    }

    fn convert(&self, raw: &str) -> Option<FactValue> {
        match self {
            FieldKind::Integer => raw.parse::<i64>().ok().map(FactValue::Int),
            FieldKind::Boolean => match raw {
                "1" | "true" => Some(FactValue::Bool(true)),
                "0" | "false" => Some(FactValue::Bool(false)),
                _ => None,
            },
            FieldKind::String => Some(FactValue::Str(raw.to_string())),
        }
    }

    fn accepts(&self, value: &FactValue) -> bool {
        matches!(
            (self, value),
            (FieldKind::Integer, FactValue::Int(_))
                | (FieldKind::Boolean, FactValue::Bool(_))
                | (FieldKind::String, FactValue::Str(_))
        )
    }
}

/// Why a grammar could not be built.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("grammar declares no fields")]
    NoFields,

    #[error("field `{0}` has no matching named group in the pattern")]
    MissingGroup(String),
}

/// Why stdout did not satisfy a grammar.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("output does not match pattern `{pattern}`")]
    NoMatch { pattern: String },

    #[error("field `{field}` = `{raw}` is not a valid {kind}")]
    BadField {
        field: String,
        raw: String,
        kind: &'static str,
    },

    #[error("field `{field}` was not captured")]
    NotCaptured { field: String },
}

/// A compiled output grammar.
#[derive(Debug, Clone)]
pub struct OutputGrammar {
    pattern: String,
    regex: Regex,
    fields: Vec<(String, FieldKind)>,
}

impl OutputGrammar {
    /// Compile a grammar. The pattern is anchored at both ends.
    pub fn new(
        pattern: impl Into<String>,
        fields: impl IntoIterator<Item = (String, FieldKind)>,
    ) -> Result<Self, GrammarError> {
        let pattern = pattern.into();
        let fields: Vec<(String, FieldKind)> = fields.into_iter().collect();
        if fields.is_empty() {
            return Err(GrammarError::NoFields);
        }

        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| GrammarError::InvalidPattern(e.to_string()))?;

        for (name, _) in &fields {
            if !regex.capture_names().flatten().any(|group| group == name) {
                return Err(GrammarError::MissingGroup(name.clone()));
            }
        }

        Ok(OutputGrammar {
            pattern,
            regex,
            fields,
        })
    }

    /// The pattern as declared.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Declared fields, in declaration order.
    pub fn fields(&self) -> &[(String, FieldKind)] {
        &self.fields
    }

    /// Parse probe stdout.
    ///
    /// Trailing line terminators are ignored; everything else must match
    /// exactly. A grammar with a single field yields that scalar, otherwise
    /// a record keyed by field name.
    pub fn parse(&self, stdout: &str) -> Result<FactValue, ParseFailure> {
        let text = stdout.trim_end_matches(['\n', '\r']);
        let caps = self.regex.captures(text).ok_or_else(|| ParseFailure::NoMatch {
            pattern: self.pattern.clone(),
        })?;

        let mut record = BTreeMap::new();
        for (name, kind) in &self.fields {
            let raw = caps
                .name(name)
                .ok_or_else(|| ParseFailure::NotCaptured {
                    field: name.clone(),
                })?
                .as_str();
            let value = kind.convert(raw).ok_or_else(|| ParseFailure::BadField {
                field: name.clone(),
                raw: raw.to_string(),
                kind: kind.as_str(),
            })?;
            record.insert(name.clone(), value);
        }

        if self.fields.len() == 1 {
            if let Some(value) = record.into_values().next() {
                return Ok(value);
            }
            return Err(ParseFailure::NotCaptured {
                field: self.fields[0].0.clone(),
            });
        }
        Ok(FactValue::Record(record))
    }

    /// Whether `value` has the shape this grammar produces.
    pub fn accepts(&self, value: &FactValue) -> bool {
        if let [(_, kind)] = self.fields.as_slice() {
            return kind.accepts(value);
        }
        match value {
            FactValue::Record(fields) => {
                fields.len() == self.fields.len()
                    && self.fields.iter().all(|(name, kind)| {
                        fields.get(name).is_some_and(|v| kind.accepts(v))
                    })
            }
            _ => false,
        }
    }
}

impl fmt::Display for OutputGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/ (", self.pattern)?;
        for (i, (name, kind)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, kind.as_str())?;
        }
        write!(f, ")")
    }
}
