//! Probe definitions.
//!
//! A probe is a small C program plus the policy that turns its compile and
//! run outcome into a fact. Probes are immutable once built: file payloads
//! are read when the probe is declared, so the bytes that get hashed are
//! the bytes that get compiled.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fact::FactValue;
use crate::core::grammar::{GrammarError, OutputGrammar};
use crate::util::hash::Fingerprint;

/// Source language of a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "c")]
    C,
    #[serde(rename = "c++")]
    Cxx,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cxx => "c++",
        }
    }

    /// Source file extension for rendered probes.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cxx => "cpp",
        }
    }
}

/// Where a probe's program text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePayload {
    /// Program text given inline.
    Inline(String),
    /// Program text read from a file at declaration time.
    File { path: PathBuf, contents: String },
    /// A generated program that references a symbol (function, variable or macro).
    Symbol(String),
}

impl SourcePayload {
    /// Read a file payload.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path)?;
        Ok(SourcePayload::File { path, contents })
    }
}

/// How a probe's success is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPolicy {
    /// Fact = compile (and link) success.
    #[default]
    CompileOnly,
    /// Fact = compiled and exited with status 0.
    CompileAndRun,
    /// Fact = values parsed from stdout through the probe's grammar.
    CompileRunCompare,
}

impl RunPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPolicy::CompileOnly => "compile-only",
            RunPolicy::CompileAndRun => "compile-and-run",
            RunPolicy::CompileRunCompare => "compile-run-compare",
        }
    }

    pub fn requires_execution(&self) -> bool {
        !matches!(self, RunPolicy::CompileOnly)
    }
}

/// What a timed out or crashed run means for a `compile-and-run` probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InconclusivePolicy {
    #[default]
    AssumeFalse,
    /// Historical convention for portability probes: absent evidence of
    /// failure, the capability is present.
    AssumeTrue,
}

/// The declared answer when target binaries cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrossCompileDefault {
    AssumePresent,
    AssumeAbsent,
    Value(FactValue),
}

impl CrossCompileDefault {
    /// The fact value this default stands for.
    pub fn value(&self) -> FactValue {
        match self {
            CrossCompileDefault::AssumePresent => FactValue::Bool(true),
            CrossCompileDefault::AssumeAbsent => FactValue::Bool(false),
            CrossCompileDefault::Value(v) => v.clone(),
        }
    }

    fn describe(&self) -> String {
        match self {
            CrossCompileDefault::AssumePresent => "assume-present".to_string(),
            CrossCompileDefault::AssumeAbsent => "assume-absent".to_string(),
            CrossCompileDefault::Value(v) => format!("value:{}", v),
        }
    }
}

/// A rejected probe declaration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeDeclError {
    #[error("probe identity `{0}` is invalid (use letters, digits, `-`, `_`, `.`)")]
    InvalidId(String),

    #[error("probe `{probe}`: {source}")]
    Grammar {
        probe: String,
        #[source]
        source: GrammarError,
    },

    #[error("probe `{0}` uses compile-run-compare but declares no output grammar")]
    MissingGrammar(String),

    #[error("probe `{0}` declares an output grammar but is not compile-run-compare")]
    UnexpectedGrammar(String),

    #[error("probe `{0}` uses compile-run-compare but declares no conservative fallback")]
    MissingFallback(String),

    #[error("probe `{0}` must be executed but declares neither a cross-compile default nor a fallback")]
    MissingCrossCompileDefault(String),

    #[error("probe `{probe}`: {what} `{value}` does not match the probe's result type")]
    ValueShape {
        probe: String,
        what: &'static str,
        value: String,
    },

    #[error("probe `{0}` searches libraries, which requires compile-only")]
    SearchRequiresCompileOnly(String),

    #[error("probe `{0}` requires itself")]
    SelfRequirement(String),
}

/// A validated probe definition.
#[derive(Debug, Clone)]
pub struct Probe {
    id: String,
    source: SourcePayload,
    language: Language,
    std: Option<String>,
    headers: Vec<String>,
    libraries: Vec<String>,
    lib_dirs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    flags: Vec<String>,
    policy: RunPolicy,
    grammar: Option<OutputGrammar>,
    on_inconclusive: InconclusivePolicy,
    cross_compile: Option<CrossCompileDefault>,
    fallback: Option<FactValue>,
    requires: Vec<String>,
    search_libraries: Vec<String>,
}

impl Probe {
    /// Start declaring a probe.
    pub fn builder(id: impl Into<String>, source: SourcePayload) -> ProbeBuilder {
        ProbeBuilder::new(id, source)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &SourcePayload {
        &self.source
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn std(&self) -> Option<&str> {
        self.std.as_deref()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    pub fn lib_dirs(&self) -> &[PathBuf] {
        &self.lib_dirs
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    pub fn grammar(&self) -> Option<&OutputGrammar> {
        self.grammar.as_ref()
    }

    pub fn on_inconclusive(&self) -> InconclusivePolicy {
        self.on_inconclusive
    }

    pub fn cross_compile(&self) -> Option<&CrossCompileDefault> {
        self.cross_compile.as_ref()
    }

    pub fn fallback(&self) -> Option<&FactValue> {
        self.fallback.as_ref()
    }

    /// Probes whose facts must be truthy before this one runs.
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// Candidate libraries tried in order when the program does not link alone.
    pub fn search_libraries(&self) -> &[String] {
        &self.search_libraries
    }

    /// Add library search directories after declaration (fixture libraries).
    ///
    /// Changes the payload hash, so facts cached without these directories
    /// are not reused.
    pub fn with_extra_lib_dirs(mut self, dirs: &[PathBuf]) -> Self {
        for dir in dirs {
            if !self.lib_dirs.contains(dir) {
                self.lib_dirs.push(dir.clone());
            }
        }
        self
    }

    /// The exact program text handed to the compiler.
    pub fn render_source(&self) -> String {
        let mut out = String::new();
        for header in &self.headers {
            out.push_str(&format!("#include <{}>\n", header));
        }

        match &self.source {
            SourcePayload::Inline(text) | SourcePayload::File { contents: text, .. } => {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            SourcePayload::Symbol(symbol) => {
                out.push_str(&format!(
                    "\nint main(int argc, char **argv)\n\
                     {{\n\
                     \x20   (void)argv;\n\
                     #ifndef {sym}\n\
                     \x20   return ((int *)(&{sym}))[argc];\n\
                     #else\n\
                     \x20   (void)argc;\n\
                     \x20   return 0;\n\
                     #endif\n\
                     }}\n",
                    sym = symbol
                ));
            }
        }
        out
    }

    /// Hash of everything that can change this probe's fact.
    pub fn payload_hash(&self) -> String {
        let mut fp = Fingerprint::new();
        fp.update_str(&self.render_source())
            .update_str(self.language.as_str())
            .update_opt(self.std.as_deref())
            .update_list(self.libraries.iter().map(String::as_str))
            .update_list(self.flags.iter().map(String::as_str))
            .update_list(self.search_libraries.iter().map(String::as_str))
            .update_str(self.policy.as_str())
            .update_bool(self.on_inconclusive == InconclusivePolicy::AssumeTrue);

        fp.update_paths(&self.lib_dirs)
            .update_paths(&self.include_dirs);

        let grammar = self.grammar.as_ref().map(|g| g.to_string());
        let cross = self.cross_compile.as_ref().map(|c| c.describe());
        let fallback = self.fallback.as_ref().map(|v| v.to_string());
        fp.update_opt(grammar.as_deref())
            .update_opt(cross.as_deref())
            .update_opt(fallback.as_deref());

        fp.finish()
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.policy.as_str())
    }
}

/// Builder for [`Probe`]; `build` validates the declaration.
#[derive(Debug, Clone)]
pub struct ProbeBuilder {
    id: String,
    source: SourcePayload,
    language: Language,
    std: Option<String>,
    headers: Vec<String>,
    libraries: Vec<String>,
    lib_dirs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    flags: Vec<String>,
    policy: RunPolicy,
    grammar: Option<Result<OutputGrammar, GrammarError>>,
    on_inconclusive: InconclusivePolicy,
    cross_compile: Option<CrossCompileDefault>,
    fallback: Option<FactValue>,
    requires: Vec<String>,
    search_libraries: Vec<String>,
}

impl ProbeBuilder {
    pub fn new(id: impl Into<String>, source: SourcePayload) -> Self {
        ProbeBuilder {
            id: id.into(),
            source,
            language: Language::C,
            std: None,
            headers: Vec::new(),
            libraries: Vec::new(),
            lib_dirs: Vec::new(),
            include_dirs: Vec::new(),
            flags: Vec::new(),
            policy: RunPolicy::CompileOnly,
            grammar: None,
            on_inconclusive: InconclusivePolicy::AssumeFalse,
            cross_compile: None,
            fallback: None,
            requires: Vec::new(),
            search_libraries: Vec::new(),
        }
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Language standard, e.g. `c99` or `c++17`.
    pub fn std(mut self, std: impl Into<String>) -> Self {
        self.std = Some(std.into());
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.headers.extend(headers.into_iter().map(Into::into));
        self
    }

    pub fn library(mut self, lib: impl Into<String>) -> Self {
        self.libraries.push(lib.into());
        self
    }

    pub fn libraries(mut self, libs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.libraries.extend(libs.into_iter().map(Into::into));
        self
    }

    pub fn lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lib_dirs.push(dir.into());
        self
    }

    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn flags(mut self, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn grammar(
        mut self,
        pattern: impl Into<String>,
        fields: impl IntoIterator<Item = (String, crate::core::grammar::FieldKind)>,
    ) -> Self {
        self.grammar = Some(OutputGrammar::new(pattern, fields));
        self
    }

    pub fn on_inconclusive(mut self, policy: InconclusivePolicy) -> Self {
        self.on_inconclusive = policy;
        self
    }

    pub fn cross_compile(mut self, default: CrossCompileDefault) -> Self {
        self.cross_compile = Some(default);
        self
    }

    pub fn fallback(mut self, value: FactValue) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn requires(mut self, probe: impl Into<String>) -> Self {
        self.requires.push(probe.into());
        self
    }

    pub fn search_libraries(mut self, libs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.search_libraries.extend(libs.into_iter().map(Into::into));
        self
    }

    /// Validate and freeze the declaration.
    pub fn build(self) -> Result<Probe, ProbeDeclError> {
        let id = self.id;
        let id_ok = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !id_ok {
            return Err(ProbeDeclError::InvalidId(id));
        }

        let grammar = match self.grammar {
            Some(Ok(g)) => Some(g),
            Some(Err(source)) => return Err(ProbeDeclError::Grammar { probe: id, source }),
            None => None,
        };

        if self.requires.iter().any(|r| *r == id) {
            return Err(ProbeDeclError::SelfRequirement(id));
        }

        if !self.search_libraries.is_empty() && self.policy != RunPolicy::CompileOnly {
            return Err(ProbeDeclError::SearchRequiresCompileOnly(id));
        }

        match self.policy {
            RunPolicy::CompileRunCompare => {
                let Some(grammar) = grammar.as_ref() else {
                    return Err(ProbeDeclError::MissingGrammar(id));
                };
                let Some(fallback) = self.fallback.as_ref() else {
                    return Err(ProbeDeclError::MissingFallback(id));
                };
                if !grammar.accepts(fallback) {
                    return Err(ProbeDeclError::ValueShape {
                        probe: id,
                        what: "fallback",
                        value: fallback.to_string(),
                    });
                }
                if let Some(cross) = &self.cross_compile {
                    let value = cross.value();
                    if !grammar.accepts(&value) {
                        return Err(ProbeDeclError::ValueShape {
                            probe: id,
                            what: "cross-compile default",
                            value: value.to_string(),
                        });
                    }
                }
            }
            RunPolicy::CompileOnly | RunPolicy::CompileAndRun => {
                if grammar.is_some() {
                    return Err(ProbeDeclError::UnexpectedGrammar(id));
                }
                let values = self
                    .fallback
                    .iter()
                    .map(|v| ("fallback", v.clone()))
                    .chain(
                        self.cross_compile
                            .iter()
                            .map(|c| ("cross-compile default", c.value())),
                    );
                for (what, value) in values {
                    if matches!(value, FactValue::Record(_)) {
                        return Err(ProbeDeclError::ValueShape {
                            probe: id,
                            what,
                            value: value.to_string(),
                        });
                    }
                }
            }
        }

        if self.policy.requires_execution()
            && self.cross_compile.is_none()
            && self.fallback.is_none()
        {
            return Err(ProbeDeclError::MissingCrossCompileDefault(id));
        }

        Ok(Probe {
            id,
            source: self.source,
            language: self.language,
            std: self.std,
            headers: self.headers,
            libraries: self.libraries,
            lib_dirs: self.lib_dirs,
            include_dirs: self.include_dirs,
            flags: self.flags,
            policy: self.policy,
            grammar,
            on_inconclusive: self.on_inconclusive,
            cross_compile: self.cross_compile,
            fallback: self.fallback,
            requires: self.requires,
            search_libraries: self.search_libraries,
        })
    }
}
