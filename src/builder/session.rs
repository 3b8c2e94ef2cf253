//! Probe sessions.
//!
//! A session resolves a set of probes to facts with one toolchain. Probes
//! are grouped into dependency levels; each level runs in parallel on a
//! bounded thread pool and starts only after the previous level resolved,
//! so a probe always sees the facts it `requires`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use rayon::prelude::*;

use crate::builder::cancel::CancellationToken;
use crate::builder::compile::{CompileResult, ProbeCompiler};
use crate::builder::errors::{Condition, ProbeError};
use crate::builder::events::{DiagnosticSink, ProbeEvent, TracingSink};
use crate::builder::executor::{self, RunResult, RunStatus};
use crate::builder::fallback;
use crate::builder::fingerprint::ToolchainFingerprint;
use crate::builder::interpret::{interpret, Interpretation};
use crate::builder::library::{BuiltLibrary, LibraryBuilder};
use crate::builder::toolchain::Toolchain;
use crate::cache::{CacheEntry, CacheKey, CacheStatus, FactCache, ProbeOutcome};
use crate::core::fact::{Fact, FactOrigin, FactSet, FactValue, Provenance};
use crate::core::manifest::FixtureLibrary;
use crate::core::probe::{Probe, RunPolicy};
use crate::util::config::{DEFAULT_COMPILE_TIMEOUT_SECS, DEFAULT_RETRY_BUDGET, DEFAULT_RUN_TIMEOUT_SECS};
use crate::util::hash::{sha256_file, Fingerprint};

/// Tunables of a probe session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Worker threads; 0 picks the number of CPUs
    pub jobs: usize,
    pub run_timeout: Duration,
    pub compile_timeout: Duration,
    /// Extra attempts after an infrastructure failure
    pub retry_budget: u32,
    /// Parent of per-probe scratch directories (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            jobs: 0,
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            compile_timeout: Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SECS),
            retry_budget: DEFAULT_RETRY_BUDGET,
            work_dir: None,
        }
    }
}

/// Resolves probes to facts with one toolchain.
pub struct ProbeSession {
    toolchain: Box<dyn Toolchain>,
    fingerprint: Arc<ToolchainFingerprint>,
    cache: Arc<FactCache>,
    sink: Arc<dyn DiagnosticSink>,
    cancel: CancellationToken,
    options: SessionOptions,
    /// Directories holding built fixture libraries
    lib_dirs: Vec<PathBuf>,
    /// Hash of the built fixture libraries, part of every cache key
    inputs: String,
}

/// The result of one compile (and possibly run) of a probe.
struct Attempt {
    interpretation: Interpretation,
    compiled: bool,
    run: Option<RunStatus>,
    /// Output worth attaching to a diagnostic
    output: String,
}

impl ProbeSession {
    /// A session with an in-memory cache, logging events through `tracing`.
    pub fn new(toolchain: Box<dyn Toolchain>, fingerprint: Arc<ToolchainFingerprint>) -> Self {
        ProbeSession {
            toolchain,
            fingerprint,
            cache: Arc::new(FactCache::in_memory()),
            sink: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
            options: SessionOptions::default(),
            lib_dirs: Vec::new(),
            inputs: String::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<FactCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn fingerprint(&self) -> &ToolchainFingerprint {
        &self.fingerprint
    }

    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    pub fn cache(&self) -> &FactCache {
        &self.cache
    }

    /// A token that cancels this session's running compiles and probes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build fixture libraries into `out_dir` and link every later probe
    /// against that directory.
    pub fn build_libraries(
        &mut self,
        libraries: &[FixtureLibrary],
        out_dir: &Path,
    ) -> Result<Vec<BuiltLibrary>> {
        if libraries.is_empty() {
            return Ok(Vec::new());
        }

        let builder = LibraryBuilder::new(self.toolchain.as_ref(), out_dir, self.options.compile_timeout)
            .cflags(self.fingerprint.cflags.clone());
        let built = builder.build_all(libraries, &self.cancel)?;

        let mut fp = Fingerprint::new();
        fp.update_str(&self.inputs);
        for lib in &built {
            fp.update_str(&lib.name).update_str(&sha256_file(&lib.path)?);
        }
        self.inputs = fp.finish();

        let dir = builder.out_dir().to_path_buf();
        if !self.lib_dirs.contains(&dir) {
            self.lib_dirs.push(dir);
        }
        Ok(built)
    }

    /// Resolve `probes` to facts.
    ///
    /// Every probe named in a `requires` must be part of `probes`. Fatal
    /// problems ([`ProbeError`]) abort the session; local conditions only
    /// degrade the affected fact.
    pub fn run(&self, probes: &[Probe]) -> Result<FactSet> {
        let start = Instant::now();
        let result = self.run_levels(probes);

        let (success, count, cached) = match &result {
            Ok((facts, cached)) => (true, facts.len() as u64, *cached),
            Err(_) => (false, 0, 0),
        };
        self.sink.emit(&ProbeEvent::SessionFinished {
            success,
            probes: count,
            cached,
            duration_ms: start.elapsed().as_millis() as u64,
        });
        result.map(|(facts, _)| facts)
    }

    fn run_levels(&self, probes: &[Probe]) -> Result<(FactSet, u64)> {
        let probes: Vec<Probe> = probes
            .iter()
            .cloned()
            .map(|p| p.with_extra_lib_dirs(&self.lib_dirs))
            .collect();
        let levels = dependency_levels(&probes)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .thread_name(|i| format!("cprobe-worker-{}", i))
            .build()
            .context("failed to start probe worker pool")?;

        tracing::debug!(
            "resolving {} probe(s) in {} level(s) with toolchain {}",
            probes.len(),
            levels.len(),
            self.fingerprint.short_hash()
        );

        let mut facts = FactSet::new();
        let mut cached = 0;
        for level in levels {
            if self.cancel.is_cancelled() {
                return Err(ProbeError::Cancelled.into());
            }

            let results: Vec<Result<(Fact, bool)>> = pool.install(|| {
                level
                    .par_iter()
                    .map(|&i| self.resolve(&probes[i], &facts))
                    .collect()
            });
            for result in results {
                let (fact, hit) = result?;
                cached += u64::from(hit);
                facts.insert(fact);
            }
        }
        Ok((facts, cached))
    }

    /// Resolve one probe whose requirements are already in `facts`.
    fn resolve(&self, probe: &Probe, facts: &FactSet) -> Result<(Fact, bool)> {
        if let Some(missing) = probe.requires().iter().find(|r| !facts.is_truthy(r)) {
            tracing::debug!("skipping `{}`: required fact `{}` is not present", probe.id(), missing);
            let fact = self.fact(
                probe,
                probe.fallback().cloned().unwrap_or(FactValue::Bool(false)),
                FactOrigin::Skipped,
            );
            self.finished(&fact, false, Duration::ZERO);
            return Ok((fact, false));
        }

        let start = Instant::now();
        let key = CacheKey::new(probe, &self.fingerprint, &self.inputs);
        let (entry, status) = self.cache.get_or_probe(&key, || self.compute(probe))?;

        if let CacheStatus::Corrupt(reason) = &status {
            self.sink.emit(&ProbeEvent::diagnostic(
                probe.id(),
                Condition::CacheCorrupt,
                format!("discarded cached record: {}", reason),
            ));
        }
        let hit = status == CacheStatus::Hit;
        self.finished(&entry.fact, hit, start.elapsed());
        Ok((entry.fact.clone(), hit))
    }

    /// Compile, run and interpret a probe, retrying infrastructure failures.
    fn compute(&self, probe: &Probe) -> Result<CacheEntry> {
        self.sink
            .emit(&ProbeEvent::started(probe.id(), probe.policy().as_str()));
        let start = Instant::now();

        let max_attempts = self.options.retry_budget.saturating_add(1);
        let mut attempts = 0;
        let attempt = loop {
            attempts += 1;
            match self.attempt(probe) {
                Ok(attempt) => break attempt,
                // Fatal errors are never retried
                Err(e) if e.downcast_ref::<ProbeError>().is_some() => return Err(e),
                Err(e) if attempts < max_attempts => {
                    tracing::warn!(
                        "probe `{}` attempt {}/{} failed: {:#}",
                        probe.id(),
                        attempts,
                        max_attempts,
                        e
                    );
                }
                Err(e) => {
                    return Err(ProbeError::RetryBudgetExhausted {
                        probe: probe.id().to_string(),
                        attempts,
                        last_error: format!("{:#}", e),
                    }
                    .into())
                }
            }
        };

        let Interpretation {
            value,
            origin,
            condition,
            detail,
        } = attempt.interpretation;
        if let Some(condition) = condition {
            let message = detail.clone().unwrap_or_else(|| condition.to_string());
            self.sink.emit(
                &ProbeEvent::diagnostic(probe.id(), condition, message).with_output(attempt.output),
            );
        }

        let fact = self.fact(probe, value, origin);
        let outcome = ProbeOutcome {
            compiled: attempt.compiled,
            run: attempt.run,
            condition,
            detail,
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        Ok(CacheEntry::new(fact, outcome))
    }

    fn attempt(&self, probe: &Probe) -> Result<Attempt> {
        let mut compiler = ProbeCompiler::new(
            self.toolchain.as_ref(),
            &self.fingerprint,
            self.options.compile_timeout,
        );
        if let Some(dir) = &self.options.work_dir {
            compiler = compiler.work_dir(dir);
        }

        if !probe.search_libraries().is_empty() {
            return self.search(probe, &compiler);
        }

        let compiled = compiler.compile(probe, None, &self.cancel)?;
        if !compiled.success || probe.policy() == RunPolicy::CompileOnly {
            return Ok(Attempt {
                interpretation: interpret(probe, compiled.success, None),
                compiled: compiled.success,
                run: None,
                output: compiled.diagnostics,
            });
        }

        if !self.fingerprint.can_execute() {
            let resolution = fallback::resolve_or_err(probe)?;
            let detail = format!(
                "{} binaries cannot run on this host and no emulator is configured",
                self.fingerprint.target
            );
            return Ok(Attempt {
                interpretation: Interpretation {
                    value: resolution.value,
                    origin: resolution.origin,
                    detail: resolution.condition.map(|_| detail),
                    condition: resolution.condition,
                },
                compiled: true,
                run: None,
                output: String::new(),
            });
        }

        let run = executor::run(
            compiled.binary(),
            &self.fingerprint.emulator,
            self.options.run_timeout,
            &self.cancel,
        )?;
        let interpretation = interpret(probe, true, Some(&run));
        let output = run_output(&interpretation, &run);
        Ok(Attempt {
            interpretation,
            compiled: true,
            run: Some(run.status),
            output,
        })
    }

    /// Find the first library (or none) that makes the probe link.
    fn search(&self, probe: &Probe, compiler: &ProbeCompiler<'_>) -> Result<Attempt> {
        let candidates = std::iter::once(None).chain(probe.search_libraries().iter().map(Some));

        let mut last: Option<CompileResult> = None;
        for candidate in candidates {
            let result = compiler.compile(probe, candidate.map(String::as_str), &self.cancel)?;
            if result.success {
                let value = match candidate {
                    None => FactValue::Bool(true),
                    Some(lib) => FactValue::Str(lib.clone()),
                };
                tracing::debug!("`{}` links with {}", probe.id(), value);
                return Ok(Attempt {
                    interpretation: Interpretation {
                        value,
                        origin: FactOrigin::Probed,
                        condition: None,
                        detail: None,
                    },
                    compiled: true,
                    run: None,
                    output: String::new(),
                });
            }
            last = Some(result);
        }

        let mut interpretation = interpret(probe, false, None);
        interpretation.detail = Some(format!(
            "no candidate library links: {}",
            probe.search_libraries().join(", ")
        ));
        Ok(Attempt {
            interpretation,
            compiled: false,
            run: None,
            output: last.map(|r| r.diagnostics).unwrap_or_default(),
        })
    }

    fn fact(&self, probe: &Probe, value: FactValue, origin: FactOrigin) -> Fact {
        Fact {
            value,
            provenance: Provenance {
                probe: probe.id().to_string(),
                fingerprint: self.fingerprint.hash().to_string(),
                payload_hash: probe.payload_hash(),
                origin,
            },
        }
    }

    fn finished(&self, fact: &Fact, cached: bool, elapsed: Duration) {
        self.sink.emit(&ProbeEvent::ProbeFinished {
            probe: fact.probe().to_string(),
            value: fact.value.clone(),
            origin: fact.provenance.origin,
            cached,
            duration_ms: elapsed.as_millis() as u64,
        });
    }
}

fn run_output(interpretation: &Interpretation, run: &RunResult) -> String {
    match interpretation.condition {
        Some(Condition::ParseFailed) => run.stdout.clone(),
        Some(_) => run.stderr.clone(),
        None => String::new(),
    }
}

/// Group probes into levels: every probe's requirements sit in earlier levels.
///
/// Returns indices into `probes`, each level in declaration order.
pub fn dependency_levels(probes: &[Probe]) -> Result<Vec<Vec<usize>>> {
    let mut graph = DiGraph::<usize, ()>::new();
    let mut index = HashMap::new();
    for (i, probe) in probes.iter().enumerate() {
        if index.insert(probe.id(), graph.add_node(i)).is_some() {
            bail!("probe `{}` is declared more than once", probe.id());
        }
    }
    for probe in probes {
        for req in probe.requires() {
            let Some(&from) = index.get(req.as_str()) else {
                bail!("probe `{}` requires unknown probe `{}`", probe.id(), req);
            };
            graph.add_edge(from, index[probe.id()], ());
        }
    }

    let order = toposort(&graph, None)
        .map_err(|cycle| ProbeError::DependencyCycle(probes[graph[cycle.node_id()]].id().to_string()))?;

    let mut depth = vec![0usize; probes.len()];
    for node in order {
        let i = graph[node];
        for req in probes[i].requires() {
            let r = graph[index[req.as_str()]];
            depth[i] = depth[i].max(depth[r] + 1);
        }
    }

    let mut levels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, d) in depth.into_iter().enumerate() {
        levels.entry(d).or_default().push(i);
    }
    Ok(levels.into_values().collect())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::builder::compile::tests::{fake_toolchain, native_fingerprint};
    use crate::builder::events::MemorySink;
    use crate::core::grammar::FieldKind;
    use crate::core::probe::{CrossCompileDefault, InconclusivePolicy, SourcePayload};
    use tempfile::TempDir;

    struct Harness {
        tmp: TempDir,
        sink: Arc<MemorySink>,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                tmp: TempDir::new().unwrap(),
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn session(&self, fingerprint: ToolchainFingerprint) -> ProbeSession {
            ProbeSession::new(Box::new(fake_toolchain(self.tmp.path())), Arc::new(fingerprint))
                .with_sink(self.sink.clone())
                .with_options(SessionOptions {
                    jobs: 4,
                    run_timeout: Duration::from_millis(500),
                    work_dir: Some(self.tmp.path().join("work")),
                    ..SessionOptions::default()
                })
        }

        fn compiles(&self) -> usize {
            std::fs::read_to_string(self.tmp.path().join("invocations"))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }
    }

    fn script(body: &str) -> SourcePayload {
        SourcePayload::Inline(format!("#!/bin/sh\n{}\n", body))
    }

    fn cross_fingerprint() -> ToolchainFingerprint {
        ToolchainFingerprint::new(
            "fakecc".into(),
            "fakecc 1.0".into(),
            "gcc".into(),
            "aarch64-unknown-linux-gnu".into(),
            vec![],
            vec![],
            vec![],
            true,
        )
    }

    fn mm_probe() -> Probe {
        Probe::builder("mm-alignment", script("echo '(size_t)16 (size_t)4 0'"))
            .policy(RunPolicy::CompileRunCompare)
            .grammar(
                r"\(size_t\)(?P<alignment>\d+) \(size_t\)(?P<log2>\d+) (?P<less_than_four>[01])",
                [
                    ("alignment".to_string(), FieldKind::Integer),
                    ("log2".to_string(), FieldKind::Integer),
                    ("less_than_four".to_string(), FieldKind::Boolean),
                ],
            )
            .fallback(FactValue::Record(BTreeMap::from([
                ("alignment".to_string(), FactValue::Int(8)),
                ("log2".to_string(), FactValue::Int(3)),
                ("less_than_four".to_string(), FactValue::Bool(false)),
            ])))
            .build()
            .unwrap()
    }

    #[test]
    fn test_levels_follow_requires() {
        let a = Probe::builder("a", SourcePayload::Symbol("a".into())).build().unwrap();
        let b = Probe::builder("b", SourcePayload::Symbol("b".into()))
            .requires("a")
            .build()
            .unwrap();
        let c = Probe::builder("c", SourcePayload::Symbol("c".into()))
            .requires("b")
            .requires("a")
            .build()
            .unwrap();
        let d = Probe::builder("d", SourcePayload::Symbol("d".into())).build().unwrap();

        let levels = dependency_levels(&[c, b, a, d]).unwrap();
        assert_eq!(levels, vec![vec![2, 3], vec![1], vec![0]]);
    }

    #[test]
    fn test_levels_reject_cycles_and_unknowns() {
        let a = Probe::builder("a", SourcePayload::Symbol("a".into()))
            .requires("b")
            .build()
            .unwrap();
        let b = Probe::builder("b", SourcePayload::Symbol("b".into()))
            .requires("a")
            .build()
            .unwrap();
        let err = dependency_levels(&[a.clone(), b]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProbeError>(),
            Some(ProbeError::DependencyCycle(_))
        ));

        let err = dependency_levels(&[a]).unwrap_err();
        assert!(err.to_string().contains("unknown probe `b`"));
    }

    #[test]
    fn test_policies_end_to_end() {
        let h = Harness::new();
        let session = h.session(native_fingerprint());
        let probes = vec![
            Probe::builder("compiles", script("exit 1")).build().unwrap(),
            Probe::builder("rejected", script("#error no")).build().unwrap(),
            Probe::builder("exits-zero", script("exit 0"))
                .policy(RunPolicy::CompileAndRun)
                .fallback(FactValue::Bool(false))
                .build()
                .unwrap(),
            Probe::builder("exits-one", script("exit 1"))
                .policy(RunPolicy::CompileAndRun)
                .fallback(FactValue::Bool(false))
                .build()
                .unwrap(),
            mm_probe(),
        ];

        let facts = session.run(&probes).unwrap();
        assert_eq!(facts.bool("compiles"), Some(true));
        assert_eq!(facts.bool("rejected"), Some(false));
        assert_eq!(facts.bool("exits-zero"), Some(true));
        assert_eq!(facts.bool("exits-one"), Some(false));
        assert_eq!(facts.field("mm-alignment", "alignment"), Some(&FactValue::Int(16)));
        assert_eq!(
            facts.get("mm-alignment").unwrap().provenance.origin,
            FactOrigin::Probed
        );
        assert_eq!(h.sink.conditions("rejected"), vec![Condition::CompileFailed]);
        assert!(matches!(
            h.sink.events().last(),
            Some(ProbeEvent::SessionFinished { success: true, probes: 5, .. })
        ));
    }

    #[test]
    fn test_timeout_is_inconclusive() {
        let h = Harness::new();
        let session = h.session(native_fingerprint());
        let hang = |id: &str, policy| {
            Probe::builder(id, script("sleep 30"))
                .policy(RunPolicy::CompileAndRun)
                .on_inconclusive(policy)
                .fallback(FactValue::Bool(false))
                .build()
                .unwrap()
        };
        let probes = vec![
            hang("strict", InconclusivePolicy::AssumeFalse),
            hang("lenient", InconclusivePolicy::AssumeTrue),
        ];

        let start = Instant::now();
        let facts = session.run(&probes).unwrap();
        assert!(start.elapsed() < Duration::from_secs(20));
        assert_eq!(facts.bool("strict"), Some(false));
        assert_eq!(facts.bool("lenient"), Some(true));
        assert_eq!(
            facts.get("strict").unwrap().provenance.origin,
            FactOrigin::Inconclusive
        );
        assert_eq!(h.sink.conditions("strict"), vec![Condition::TimedOut]);
    }

    #[test]
    fn test_cross_target_uses_declared_answers() {
        let h = Harness::new();
        let session = h.session(cross_fingerprint());
        let probes = vec![
            Probe::builder("declared", script("exit 1"))
                .policy(RunPolicy::CompileAndRun)
                .cross_compile(CrossCompileDefault::AssumePresent)
                .build()
                .unwrap(),
            Probe::builder("conservative", script("exit 0"))
                .policy(RunPolicy::CompileAndRun)
                .fallback(FactValue::Bool(false))
                .build()
                .unwrap(),
            mm_probe(),
        ];

        let facts = session.run(&probes).unwrap();
        assert_eq!(facts.bool("declared"), Some(true));
        assert_eq!(
            facts.get("declared").unwrap().provenance.origin,
            FactOrigin::CrossCompile
        );
        assert!(h.sink.conditions("declared").is_empty());

        assert_eq!(facts.bool("conservative"), Some(false));
        assert_eq!(h.sink.conditions("conservative"), vec![Condition::NotExecutable]);
        assert_eq!(facts.field("mm-alignment", "alignment"), Some(&FactValue::Int(8)));
    }

    #[test]
    fn test_requires_skips_dependents() {
        let h = Harness::new();
        let session = h.session(native_fingerprint());
        let probes = vec![
            Probe::builder("have-feature", script("#error missing")).build().unwrap(),
            Probe::builder("feature-works", script("exit 0"))
                .policy(RunPolicy::CompileAndRun)
                .fallback(FactValue::Bool(false))
                .requires("have-feature")
                .build()
                .unwrap(),
        ];

        let facts = session.run(&probes).unwrap();
        assert_eq!(facts.bool("feature-works"), Some(false));
        assert_eq!(
            facts.get("feature-works").unwrap().provenance.origin,
            FactOrigin::Skipped
        );
        assert_eq!(h.sink.starts("feature-works"), 0);
    }

    #[test]
    fn test_search_libraries() {
        let h = Harness::new();
        let session = h.session(native_fingerprint());
        let probes = vec![
            Probe::builder("lib-for-sm-max", script("# needs-lib:simple_math"))
                .search_libraries(["m", "simple_math"])
                .build()
                .unwrap(),
            Probe::builder("lib-for-strlen", script("exit 0"))
                .search_libraries(["m"])
                .build()
                .unwrap(),
            Probe::builder("lib-for-nothing", script("# needs-lib:absent"))
                .search_libraries(["m", "simple_math"])
                .build()
                .unwrap(),
        ];

        let facts = session.run(&probes).unwrap();
        assert_eq!(facts.string("lib-for-sm-max"), Some("simple_math"));
        assert_eq!(facts.bool("lib-for-strlen"), Some(true));
        assert_eq!(facts.bool("lib-for-nothing"), Some(false));
    }

    #[test]
    fn test_warm_cache_matches_cold() {
        let h = Harness::new();
        let cache_dir = h.tmp.path().join("cache");
        let probes = vec![
            Probe::builder("compiles", script("exit 0")).build().unwrap(),
            mm_probe(),
        ];

        let cold = h
            .session(native_fingerprint())
            .with_cache(Arc::new(FactCache::persistent(&cache_dir)))
            .run(&probes)
            .unwrap();
        let compiles = h.compiles();
        assert_eq!(compiles, 2);

        let warm = h
            .session(native_fingerprint())
            .with_cache(Arc::new(FactCache::persistent(&cache_dir)))
            .run(&probes)
            .unwrap();
        assert_eq!(h.compiles(), compiles);
        assert_eq!(cold.to_json_pretty().unwrap(), warm.to_json_pretty().unwrap());
        assert!(matches!(
            h.sink.events().last(),
            Some(ProbeEvent::SessionFinished { cached: 2, .. })
        ));
    }

    #[test]
    fn test_infrastructure_failure_exhausts_retry_budget() {
        let h = Harness::new();
        // Scratch directories cannot be created under a regular file
        let blocker = h.tmp.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let session = ProbeSession::new(
            Box::new(fake_toolchain(h.tmp.path())),
            Arc::new(native_fingerprint()),
        )
        .with_sink(h.sink.clone())
        .with_options(SessionOptions {
            retry_budget: 2,
            work_dir: Some(blocker.join("work")),
            ..SessionOptions::default()
        });

        let probe = Probe::builder("p", script("exit 0")).build().unwrap();
        let err = session.run(&[probe]).unwrap_err();
        match err.downcast_ref::<ProbeError>() {
            Some(ProbeError::RetryBudgetExhausted { probe, attempts, .. }) => {
                assert_eq!(probe, "p");
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            h.sink.events().last(),
            Some(ProbeEvent::SessionFinished { success: false, .. })
        ));
    }

    #[test]
    fn test_missing_compiler_is_fatal_without_retries() {
        let h = Harness::new();
        let toolchain = crate::builder::toolchain::GccToolchain::new(
            "/nonexistent/cc".into(),
            "/nonexistent/c++".into(),
            "ar".into(),
            crate::builder::toolchain::ToolchainFamily::Gcc,
        );
        let session = ProbeSession::new(Box::new(toolchain), Arc::new(native_fingerprint()))
            .with_sink(h.sink.clone())
            .with_options(SessionOptions {
                retry_budget: 2,
                work_dir: Some(h.tmp.path().join("work")),
                ..SessionOptions::default()
            });

        let probe = Probe::builder("p", SourcePayload::Symbol("fnmatch".into()))
            .build()
            .unwrap();
        let err = session.run(&[probe]).unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<ProbeError>(),
                Some(ProbeError::ToolchainUnavailable { .. })
            ),
            "unexpected error: {:#}",
            err
        );
    }

    #[test]
    fn test_cancel_during_run_releases_scratch_dirs() {
        let h = Harness::new();
        let session = ProbeSession::new(
            Box::new(fake_toolchain(h.tmp.path())),
            Arc::new(native_fingerprint()),
        )
        .with_sink(h.sink.clone())
        .with_options(SessionOptions {
            run_timeout: Duration::from_secs(600),
            work_dir: Some(h.tmp.path().join("work")),
            ..SessionOptions::default()
        });
        let probe = Probe::builder("hangs", script("exec sleep 4242"))
            .policy(RunPolicy::CompileAndRun)
            .fallback(FactValue::Bool(false))
            .build()
            .unwrap();

        let token = session.cancellation_token();
        let work = h.tmp.path().join("work");
        let canceller = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            while Instant::now() < deadline {
                let started = std::fs::read_dir(&work)
                    .into_iter()
                    .flatten()
                    .flatten()
                    .any(|e| e.path().join("probe").is_file());
                if started {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            std::thread::sleep(Duration::from_millis(100));
            token.cancel();
        });

        let start = Instant::now();
        let err = session.run(&[probe]).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err.downcast_ref::<ProbeError>(), Some(ProbeError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(std::fs::read_dir(h.tmp.path().join("work")).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_session() {
        let h = Harness::new();
        let session = h.session(native_fingerprint());
        session.cancellation_token().cancel();
        let probe = Probe::builder("p", script("exit 0")).build().unwrap();
        let err = session.run(&[probe]).unwrap_err();
        assert!(matches!(err.downcast_ref::<ProbeError>(), Some(ProbeError::Cancelled)));
    }
}
