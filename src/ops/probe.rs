//! Implementation of `cprobe run` and `cprobe show`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::events::DiagnosticSink;
use crate::builder::fingerprint::{fingerprint_for, ToolchainFingerprint};
use crate::builder::toolchain::{detect_toolchain, Toolchain};
use crate::builder::{CancellationToken, ProbeSession, SessionOptions};
use crate::cache::FactCache;
use crate::core::fact::FactSet;
use crate::core::manifest::Manifest;
use crate::core::probe::Probe;
use crate::util::config::ToolchainSettings;
use crate::util::diagnostic::suggestions;
use crate::util::GlobalContext;

/// Options for the run command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit manifest path (default: search upward from cwd)
    pub manifest_path: Option<PathBuf>,

    /// Probes to resolve, plus whatever they require (empty = all)
    pub probes: Vec<String>,

    /// Number of parallel probes
    pub jobs: Option<usize>,

    /// Probe binary timeout override, in seconds
    pub timeout_secs: Option<u64>,

    /// Target triple override
    pub target: Option<String>,

    /// Do not read or write the persistent fact cache
    pub no_cache: bool,
}

/// Locate and load the probe manifest.
pub fn load_manifest(ctx: &GlobalContext, path: Option<&Path>) -> Result<Manifest> {
    let path = match path {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => ctx.cwd().join(path),
        None => ctx.find_manifest().with_context(|| {
            format!(
                "could not find `{}` in {} or any parent directory\n{}",
                crate::core::manifest::MANIFEST_NAME,
                ctx.cwd().display(),
                suggestions::NO_MANIFEST
            )
        })?,
    };
    Manifest::load(&path)
}

/// Effective toolchain settings: config files, then `CFLAGS`/`LDFLAGS`,
/// then the command line target.
pub fn toolchain_settings(ctx: &GlobalContext, target: Option<&str>) -> ToolchainSettings {
    let mut settings = ctx.toolchain_config().toolchain.clone();
    if settings.cflags.is_empty() {
        settings.cflags = env_flags("CFLAGS");
    }
    if settings.ldflags.is_empty() {
        settings.ldflags = env_flags("LDFLAGS");
    }
    if let Some(target) = target {
        settings.target = Some(target.to_string());
    }
    settings
}

fn env_flags(var: &str) -> Vec<String> {
    std::env::var(var)
        .map(|flags| flags.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Detect the toolchain and compute its fingerprint.
pub fn open_toolchain(
    settings: &ToolchainSettings,
) -> Result<(Box<dyn Toolchain>, Arc<ToolchainFingerprint>)> {
    let toolchain = detect_toolchain(settings)?;
    let fingerprint = fingerprint_for(toolchain.as_ref(), settings);
    Ok((toolchain, fingerprint))
}

/// The fact cache configured for this context.
pub fn open_cache(ctx: &GlobalContext, no_cache: bool) -> FactCache {
    if no_cache || !ctx.config().cache.enabled {
        FactCache::in_memory()
    } else {
        FactCache::persistent(&ctx.cache_dir())
    }
}

/// Resolve the manifest's probes to facts.
pub fn run(
    ctx: &GlobalContext,
    opts: &RunOptions,
    sink: Arc<dyn DiagnosticSink>,
    cancel: CancellationToken,
) -> Result<FactSet> {
    let manifest = load_manifest(ctx, opts.manifest_path.as_deref())?;
    let probes = manifest.select(&opts.probes)?;

    let settings = toolchain_settings(ctx, opts.target.as_deref());
    let (toolchain, fingerprint) = open_toolchain(&settings)?;
    tracing::debug!(
        "probing with {} ({}) for {}",
        fingerprint.compiler,
        fingerprint.version,
        fingerprint.target
    );

    let probe_config = &ctx.config().probe;
    let options = SessionOptions {
        jobs: opts.jobs.or(probe_config.jobs).unwrap_or(0),
        run_timeout: opts
            .timeout_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| probe_config.run_timeout()),
        compile_timeout: probe_config.compile_timeout(),
        retry_budget: probe_config.retry_budget(),
        work_dir: None,
    };

    let mut session = ProbeSession::new(toolchain, fingerprint)
        .with_cache(Arc::new(open_cache(ctx, opts.no_cache)))
        .with_sink(sink)
        .with_options(options)
        .with_cancellation(cancel);

    let build_dir = ctx.build_dir().join(session.fingerprint().short_hash());
    session
        .build_libraries(manifest.libraries(), &build_dir)
        .context("failed to build fixture libraries")?;

    session.run(&probes)
}

/// A probe declaration as shown by `cprobe show`.
#[derive(Debug, Clone)]
pub struct ProbeDescription {
    pub probe: Probe,
    pub payload_hash: String,
    pub source: String,
}

/// Describe the named probes (all when `ids` is empty).
pub fn show(ctx: &GlobalContext, manifest_path: Option<&Path>, ids: &[String]) -> Result<Vec<ProbeDescription>> {
    let manifest = load_manifest(ctx, manifest_path)?;
    let probes = if ids.is_empty() {
        manifest.probes().to_vec()
    } else {
        ids.iter()
            .map(|id| {
                manifest
                    .probe(id)
                    .cloned()
                    .with_context(|| format!("no probe named `{}` in {}", id, manifest.path.display()))
            })
            .collect::<Result<Vec<_>>>()?
    };

    Ok(probes
        .into_iter()
        .map(|probe| ProbeDescription {
            payload_hash: probe.payload_hash(),
            source: probe.render_source(),
            probe,
        })
        .collect())
}
