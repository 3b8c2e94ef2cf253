//! Probes.toml manifest parsing and validation.
//!
//! A manifest declares probes (`[[probe]]`) and fixture libraries
//! (`[[library]]`), and may pull in further manifests through `include`
//! globs. Relative paths are resolved against the directory of the file
//! that declares them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::Deserialize;
use thiserror::Error;

use crate::core::fact::FactValue;
use crate::core::grammar::FieldKind;
use crate::core::probe::{
    CrossCompileDefault, InconclusivePolicy, Language, Probe, ProbeDeclError, RunPolicy,
    SourcePayload,
};

/// File name searched for in the working directory and its ancestors.
pub const MANIFEST_NAME: &str = "Probes.toml";

/// Structural problems found while validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{path}: {source}")]
    Declaration {
        path: PathBuf,
        #[source]
        source: ProbeDeclError,
    },

    #[error("probe `{id}` is declared more than once (in {first} and {second})")]
    DuplicateProbe {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("library `{0}` is declared more than once")]
    DuplicateLibrary(String),

    #[error("probe `{probe}` requires unknown probe `{missing}`")]
    UnknownRequirement { probe: String, missing: String },

    #[error("probe `{0}` is part of a `requires` cycle")]
    DependencyCycle(String),

    #[error("probe `{0}` must set exactly one of `code`, `source` or `symbol`")]
    AmbiguousSource(String),
}

/// A static library compiled from fixture sources before probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLibrary {
    pub name: String,
    pub sources: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub flags: Vec<String>,
}

/// A loaded and validated manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Path of the root manifest file
    pub path: PathBuf,
    /// Directory containing the root manifest
    pub root: PathBuf,
    probes: Vec<Probe>,
    libraries: Vec<FixtureLibrary>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    include: Vec<String>,

    #[serde(default, rename = "probe")]
    probes: Vec<RawProbe>,

    #[serde(default, rename = "library")]
    libraries: Vec<RawLibrary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawProbe {
    id: String,
    code: Option<String>,
    source: Option<PathBuf>,
    symbol: Option<String>,
    #[serde(default)]
    language: Language,
    std: Option<String>,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    libraries: Vec<String>,
    #[serde(default)]
    lib_dirs: Vec<PathBuf>,
    #[serde(default)]
    include_dirs: Vec<PathBuf>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    policy: RunPolicy,
    grammar: Option<RawGrammar>,
    #[serde(default)]
    on_inconclusive: InconclusivePolicy,
    cross_compile: Option<CrossCompileDefault>,
    fallback: Option<FactValue>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    search_libraries: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGrammar {
    pattern: String,
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: FieldKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawLibrary {
    name: String,
    sources: Vec<PathBuf>,
    #[serde(default)]
    include_dirs: Vec<PathBuf>,
    #[serde(default)]
    flags: Vec<String>,
}

impl Manifest {
    /// Load a manifest and everything it includes.
    pub fn load(path: &Path) -> Result<Self> {
        let path = path
            .canonicalize()
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let mut probes: Vec<(PathBuf, Probe)> = Vec::new();
        let mut libraries = Vec::new();
        let mut visited = HashSet::new();
        Self::load_file(&path, &mut visited, &mut probes, &mut libraries)?;

        check_unique(&probes, &libraries)?;

        let probes: Vec<Probe> = probes.into_iter().map(|(_, p)| p).collect();
        check_requirements(&probes)?;

        tracing::debug!(
            "loaded {} probe(s) and {} fixture libraries from {}",
            probes.len(),
            libraries.len(),
            path.display()
        );

        Ok(Manifest {
            path,
            root,
            probes,
            libraries,
        })
    }

    /// Parse a single manifest document without following includes.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let raw: RawManifest = toml::from_str(content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if !raw.include.is_empty() {
            tracing::debug!("ignoring `include` in {}", path.display());
        }

        let mut probes = Vec::new();
        for raw_probe in raw.probes {
            probes.push((path.to_path_buf(), convert_probe(raw_probe, &root, path)?));
        }
        let libraries: Vec<FixtureLibrary> = raw
            .libraries
            .into_iter()
            .map(|l| convert_library(l, &root))
            .collect();
        check_unique(&probes, &libraries)?;

        let probes: Vec<Probe> = probes.into_iter().map(|(_, p)| p).collect();
        check_requirements(&probes)?;

        Ok(Manifest {
            path: path.to_path_buf(),
            root,
            probes,
            libraries,
        })
    }

    fn load_file(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        probes: &mut Vec<(PathBuf, Probe)>,
        libraries: &mut Vec<FixtureLibrary>,
    ) -> Result<()> {
        if !visited.insert(path.to_path_buf()) {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        let raw: RawManifest = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        for raw_probe in raw.probes {
            let probe = convert_probe(raw_probe, &dir, path)?;
            probes.push((path.to_path_buf(), probe));
        }
        libraries.extend(raw.libraries.into_iter().map(|l| convert_library(l, &dir)));

        let included = crate::util::fs::glob_files(&dir, &raw.include)?;
        for file in included {
            let file = file
                .canonicalize()
                .with_context(|| format!("failed to resolve include {}", file.display()))?;
            Self::load_file(&file, visited, probes, libraries)?;
        }
        Ok(())
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn libraries(&self) -> &[FixtureLibrary] {
        &self.libraries
    }

    pub fn probe(&self, id: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.id() == id)
    }

    /// The named probes plus everything they transitively require.
    ///
    /// Returned in manifest order.
    pub fn select(&self, ids: &[String]) -> Result<Vec<Probe>> {
        if ids.is_empty() {
            return Ok(self.probes.clone());
        }

        let mut wanted: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for id in ids {
            let probe = self
                .probe(id)
                .with_context(|| format!("no probe named `{}` in {}", id, self.path.display()))?;
            stack.push(probe.id());
        }
        while let Some(id) = stack.pop() {
            if wanted.insert(id) {
                if let Some(probe) = self.probe(id) {
                    stack.extend(probe.requires().iter().map(String::as_str));
                }
            }
        }

        Ok(self
            .probes
            .iter()
            .filter(|p| wanted.contains(p.id()))
            .cloned()
            .collect())
    }
}

fn resolve(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

fn convert_library(raw: RawLibrary, dir: &Path) -> FixtureLibrary {
    FixtureLibrary {
        name: raw.name,
        sources: raw.sources.iter().map(|p| resolve(dir, p)).collect(),
        include_dirs: raw.include_dirs.iter().map(|p| resolve(dir, p)).collect(),
        flags: raw.flags,
    }
}

fn convert_probe(raw: RawProbe, dir: &Path, manifest: &Path) -> Result<Probe> {
    let source = match (raw.code, raw.source, raw.symbol) {
        (Some(code), None, None) => SourcePayload::Inline(code),
        (None, Some(file), None) => {
            let file = resolve(dir, &file);
            SourcePayload::from_file(&file).with_context(|| {
                format!(
                    "probe `{}`: failed to read source {}",
                    raw.id,
                    file.display()
                )
            })?
        }
        (None, None, Some(symbol)) => SourcePayload::Symbol(symbol),
        _ => return Err(ManifestError::AmbiguousSource(raw.id).into()),
    };

    let mut builder = Probe::builder(raw.id, source)
        .language(raw.language)
        .headers(raw.headers)
        .libraries(raw.libraries)
        .flags(raw.flags)
        .policy(raw.policy)
        .on_inconclusive(raw.on_inconclusive)
        .search_libraries(raw.search_libraries);

    if let Some(std) = raw.std {
        builder = builder.std(std);
    }
    for lib_dir in &raw.lib_dirs {
        builder = builder.lib_dir(resolve(dir, lib_dir));
    }
    for include_dir in &raw.include_dirs {
        builder = builder.include_dir(resolve(dir, include_dir));
    }
    if let Some(grammar) = raw.grammar {
        builder = builder.grammar(
            grammar.pattern,
            grammar.fields.into_iter().map(|f| (f.name, f.kind)),
        );
    }
    if let Some(cross) = raw.cross_compile {
        builder = builder.cross_compile(cross);
    }
    if let Some(fallback) = raw.fallback {
        builder = builder.fallback(fallback);
    }
    for req in raw.requires {
        builder = builder.requires(req);
    }

    builder.build().map_err(|source| {
        anyhow::Error::new(ManifestError::Declaration {
            path: manifest.to_path_buf(),
            source,
        })
    })
}

/// Probe identities and library names must be unique across all files.
fn check_unique(
    probes: &[(PathBuf, Probe)],
    libraries: &[FixtureLibrary],
) -> Result<(), ManifestError> {
    let mut seen: HashMap<&str, &PathBuf> = HashMap::new();
    for (file, probe) in probes {
        if let Some(first) = seen.insert(probe.id(), file) {
            return Err(ManifestError::DuplicateProbe {
                id: probe.id().to_string(),
                first: first.clone(),
                second: file.clone(),
            });
        }
    }

    let mut lib_names = HashSet::new();
    for lib in libraries {
        if !lib_names.insert(lib.name.as_str()) {
            return Err(ManifestError::DuplicateLibrary(lib.name.clone()));
        }
    }
    Ok(())
}

/// Check that every `requires` names a known probe and the graph is acyclic.
fn check_requirements(probes: &[Probe]) -> Result<(), ManifestError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let index: BTreeMap<&str, _> = probes
        .iter()
        .map(|p| (p.id(), graph.add_node(p.id())))
        .collect();

    for probe in probes {
        for req in probe.requires() {
            let Some(&from) = index.get(req.as_str()) else {
                return Err(ManifestError::UnknownRequirement {
                    probe: probe.id().to_string(),
                    missing: req.clone(),
                });
            };
            graph.add_edge(from, index[probe.id()], ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| ManifestError::DependencyCycle(graph[cycle.node_id()].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MM_MANIFEST: &str = r#"
[[probe]]
id = "mm-alignment"
code = "int main(void) { return 0; }"
policy = "compile-run-compare"
fallback = { alignment = 8, log2 = 3, less_than_four = false }

[probe.grammar]
pattern = '\(size_t\)(?P<alignment>\d+) \(size_t\)(?P<log2>\d+) (?P<less_than_four>[01])'
fields = [
    { name = "alignment", type = "integer" },
    { name = "log2", type = "integer" },
    { name = "less_than_four", type = "boolean" },
]
"#;

    #[test]
    fn test_parse_compare_probe() {
        let manifest = Manifest::parse(MM_MANIFEST, Path::new("/tmp/Probes.toml")).unwrap();
        let probe = manifest.probe("mm-alignment").unwrap();
        assert_eq!(probe.policy(), RunPolicy::CompileRunCompare);
        assert_eq!(probe.grammar().unwrap().fields().len(), 3);
        assert_eq!(
            probe.fallback().and_then(|v| v.field("alignment")),
            Some(&FactValue::Int(8))
        );
    }

    #[test]
    fn test_parse_cross_compile_forms() {
        let content = r#"
[[probe]]
id = "a"
code = "int main(void) { return 0; }"
policy = "compile-and-run"
cross-compile = "assume-absent"

[[probe]]
id = "b"
code = "int main(void) { return 0; }"
policy = "compile-and-run"
on-inconclusive = "assume-true"
cross-compile = { value = true }
"#;
        let manifest = Manifest::parse(content, Path::new("Probes.toml")).unwrap();
        assert_eq!(
            manifest.probe("a").unwrap().cross_compile(),
            Some(&CrossCompileDefault::AssumeAbsent)
        );
        let b = manifest.probe("b").unwrap();
        assert_eq!(
            b.cross_compile(),
            Some(&CrossCompileDefault::Value(FactValue::Bool(true)))
        );
        assert_eq!(b.on_inconclusive(), InconclusivePolicy::AssumeTrue);
    }

    #[test]
    fn test_missing_cross_answer_is_rejected() {
        let content = r#"
[[probe]]
id = "fnmatch"
code = "int main(void) { return 0; }"
policy = "compile-and-run"
"#;
        let err = Manifest::parse(content, Path::new("Probes.toml")).unwrap_err();
        let err = err.downcast::<ManifestError>().unwrap();
        assert!(matches!(
            err,
            ManifestError::Declaration {
                source: ProbeDeclError::MissingCrossCompileDefault(_),
                ..
            }
        ));
    }

    #[test]
    fn test_source_must_be_unambiguous() {
        let content = r#"
[[probe]]
id = "x"
code = "int main(void) { return 0; }"
symbol = "printf"
"#;
        let err = Manifest::parse(content, Path::new("Probes.toml")).unwrap_err();
        assert!(matches!(
            err.downcast::<ManifestError>().unwrap(),
            ManifestError::AmbiguousSource(_)
        ));
    }

    #[test]
    fn test_requirement_errors() {
        let unknown = r#"
[[probe]]
id = "a"
symbol = "getifaddrs"
requires = ["nope"]
"#;
        let err = Manifest::parse(unknown, Path::new("Probes.toml")).unwrap_err();
        assert!(matches!(
            err.downcast::<ManifestError>().unwrap(),
            ManifestError::UnknownRequirement { .. }
        ));

        let cycle = r#"
[[probe]]
id = "a"
symbol = "x"
requires = ["b"]

[[probe]]
id = "b"
symbol = "y"
requires = ["a"]
"#;
        let err = Manifest::parse(cycle, Path::new("Probes.toml")).unwrap_err();
        assert!(matches!(
            err.downcast::<ManifestError>().unwrap(),
            ManifestError::DependencyCycle(_)
        ));
    }

    #[test]
    fn test_load_with_includes_and_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("probes")).unwrap();
        std::fs::write(root.join("probes/check.c"), "int main(void) { return 0; }\n").unwrap();
        std::fs::write(
            root.join("Probes.toml"),
            r#"
include = ["probes/*.toml"]

[[library]]
name = "simple_math"
sources = ["simple-math/simple_math.c"]
include-dirs = ["simple-math"]

[[probe]]
id = "have-sm-max"
symbol = "sm_max"
search-libraries = ["m", "simple_math"]
"#,
        )
        .unwrap();
        std::fs::write(
            root.join("probes/extra.toml"),
            r#"
[[probe]]
id = "file-probe"
source = "check.c"
requires = ["have-sm-max"]
"#,
        )
        .unwrap();

        let manifest = Manifest::load(&root.join("Probes.toml")).unwrap();
        assert_eq!(manifest.probes().len(), 2);
        assert_eq!(manifest.libraries().len(), 1);
        assert!(manifest.libraries()[0].sources[0].ends_with("simple-math/simple_math.c"));

        let file_probe = manifest.probe("file-probe").unwrap();
        assert!(matches!(file_probe.source(), SourcePayload::File { .. }));

        let selected = manifest.select(&["file-probe".to_string()]).unwrap();
        let ids: Vec<&str> = selected.iter().map(|p| p.id()).collect();
        assert_eq!(ids, ["have-sm-max", "file-probe"]);
        assert!(manifest.select(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_duplicate_ids_in_one_document() {
        let content = "[[probe]]\nid = \"a\"\nsymbol = \"x\"\n\n[[probe]]\nid = \"a\"\nsymbol = \"y\"\n";
        let err = Manifest::parse(content, Path::new("Probes.toml")).unwrap_err();
        assert!(matches!(
            err.downcast::<ManifestError>().unwrap(),
            ManifestError::DuplicateProbe { .. }
        ));
    }

    #[test]
    fn test_duplicate_ids_across_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(
            root.join("Probes.toml"),
            "include = [\"more.toml\"]\n[[probe]]\nid = \"a\"\nsymbol = \"x\"\n",
        )
        .unwrap();
        std::fs::write(root.join("more.toml"), "[[probe]]\nid = \"a\"\nsymbol = \"y\"\n").unwrap();

        let err = Manifest::load(&root.join("Probes.toml")).unwrap_err();
        assert!(matches!(
            err.downcast::<ManifestError>().unwrap(),
            ManifestError::DuplicateProbe { .. }
        ));
    }
}
