//! Toolchain fingerprinting.
//!
//! A fingerprint identifies everything about the toolchain that can change
//! a probe's answer: compiler identity and version, target, global flags and
//! the emulator used to run target binaries. Facts are cached per
//! fingerprint, so a compiler upgrade or a flag change never reuses stale
//! facts.
//!
//! Fingerprints are computed once per toolchain configuration and kept in a
//! process-wide registry until [`reconfigure`] is called.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use serde::{Deserialize, Serialize};

use crate::builder::toolchain::Toolchain;
use crate::core::triple::TargetTriple;
use crate::util::config::ToolchainSettings;
use crate::util::hash::Fingerprint;

/// Identity of the toolchain probes are compiled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainFingerprint {
    /// C compiler path
    pub compiler: String,
    /// First line of the compiler's version banner
    pub version: String,
    /// Toolchain family (gcc, clang, apple-clang, msvc)
    pub family: String,
    /// Target triple binaries are produced for
    pub target: String,
    /// Flags applied to every probe compile
    pub cflags: Vec<String>,
    /// Flags applied to every probe link
    pub ldflags: Vec<String>,
    /// Launcher for target binaries, empty when running natively
    pub emulator: Vec<String>,
    /// Whether target binaries differ from the host
    pub cross_compiling: bool,
    hash: String,
}

static REGISTRY: LazyLock<Mutex<HashMap<String, Arc<ToolchainFingerprint>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Fingerprint for `toolchain` under `settings`, computed on first use.
pub fn fingerprint_for(
    toolchain: &dyn Toolchain,
    settings: &ToolchainSettings,
) -> Arc<ToolchainFingerprint> {
    let key = registry_key(toolchain, settings);

    let mut registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = registry.get(&key) {
        return Arc::clone(existing);
    }

    let fingerprint = Arc::new(ToolchainFingerprint::compute(toolchain, settings));
    tracing::debug!(
        "toolchain fingerprint {} ({} {}, target {})",
        fingerprint.short_hash(),
        fingerprint.family,
        fingerprint.version,
        fingerprint.target
    );
    registry.insert(key, Arc::clone(&fingerprint));
    fingerprint
}

/// Forget every computed fingerprint.
///
/// The next [`fingerprint_for`] re-queries the compiler.
pub fn reconfigure() {
    let mut registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    let dropped = registry.len();
    registry.clear();
    tracing::debug!("toolchain fingerprint registry cleared ({} entries)", dropped);
}

fn registry_key(toolchain: &dyn Toolchain, settings: &ToolchainSettings) -> String {
    let mut fp = Fingerprint::new();
    fp.update_str(&toolchain.compiler_path().display().to_string())
        .update_str(toolchain.family().as_str())
        .update_opt(settings.target.as_deref())
        .update_list(settings.cflags.iter().map(String::as_str))
        .update_list(settings.ldflags.iter().map(String::as_str))
        .update_list(settings.emulator.iter().map(String::as_str))
        .update_opt(settings.cross_compiling.map(|c| if c { "cross" } else { "native" }));
    fp.finish()
}

impl ToolchainFingerprint {
    /// Query the compiler and build a fingerprint.
    pub fn compute(toolchain: &dyn Toolchain, settings: &ToolchainSettings) -> Self {
        let version = query_version(toolchain);
        let target = settings
            .target
            .as_deref()
            .and_then(TargetTriple::parse)
            .or_else(|| query_target(toolchain))
            .unwrap_or_else(TargetTriple::host);

        let cross_compiling = settings
            .cross_compiling
            .unwrap_or_else(|| !target.runs_on(&TargetTriple::host()));

        Self::new(
            toolchain.compiler_path().display().to_string(),
            version,
            toolchain.family().as_str().to_string(),
            target.to_string(),
            settings.cflags.clone(),
            settings.ldflags.clone(),
            settings.emulator.clone(),
            cross_compiling,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        compiler: String,
        version: String,
        family: String,
        target: String,
        cflags: Vec<String>,
        ldflags: Vec<String>,
        emulator: Vec<String>,
        cross_compiling: bool,
    ) -> Self {
        let mut fp = Fingerprint::new();
        fp.update_str(&compiler)
            .update_str(&version)
            .update_str(&family)
            .update_str(&target)
            .update_list(cflags.iter().map(String::as_str))
            .update_list(ldflags.iter().map(String::as_str))
            .update_list(emulator.iter().map(String::as_str))
            .update_bool(cross_compiling);
        let hash = fp.finish();

        ToolchainFingerprint {
            compiler,
            version,
            family,
            target,
            cflags,
            ldflags,
            emulator,
            cross_compiling,
            hash,
        }
    }

    /// Full fingerprint hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Abbreviated hash for display.
    pub fn short_hash(&self) -> &str {
        &self.hash[..16.min(self.hash.len())]
    }

    /// Whether probe binaries can be executed on this host.
    pub fn can_execute(&self) -> bool {
        !self.cross_compiling || !self.emulator.is_empty()
    }

    /// Recompute the hash from the fields and compare.
    pub fn verify(&self) -> bool {
        let expected = Self::new(
            self.compiler.clone(),
            self.version.clone(),
            self.family.clone(),
            self.target.clone(),
            self.cflags.clone(),
            self.ldflags.clone(),
            self.emulator.clone(),
            self.cross_compiling,
        );
        expected.hash == self.hash
    }
}

fn query_version(toolchain: &dyn Toolchain) -> String {
    let output = match toolchain.version_command().to_process().exec() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("could not query compiler version: {:#}", e);
            return "unknown".to_string();
        }
    };

    // MSVC prints its banner on stderr
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn query_target(toolchain: &dyn Toolchain) -> Option<TargetTriple> {
    let output = toolchain.target_command()?.to_process().exec().ok()?;
    if !output.status.success() {
        return None;
    }
    TargetTriple::parse(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::toolchain::{GccToolchain, ToolchainFamily};
    use std::path::PathBuf;

    // Serializes tests that observe registry identity against `reconfigure`.
    static REGISTRY_LOCK: Mutex<()> = Mutex::new(());

    fn fingerprint(target: &str, cflags: &[&str], emulator: &[&str], cross: bool) -> ToolchainFingerprint {
        ToolchainFingerprint::new(
            "/usr/bin/cc".into(),
            "cc (GCC) 13.2.0".into(),
            "gcc".into(),
            target.into(),
            cflags.iter().map(|s| s.to_string()).collect(),
            vec![],
            emulator.iter().map(|s| s.to_string()).collect(),
            cross,
        )
    }

    #[test]
    fn test_hash_changes_with_inputs() {
        let base = fingerprint("x86_64-unknown-linux-gnu", &[], &[], false);
        let flags = fingerprint("x86_64-unknown-linux-gnu", &["-O2"], &[], false);
        let target = fingerprint("aarch64-unknown-linux-gnu", &[], &[], true);

        assert_eq!(base.hash(), fingerprint("x86_64-unknown-linux-gnu", &[], &[], false).hash());
        assert_ne!(base.hash(), flags.hash());
        assert_ne!(base.hash(), target.hash());
        assert!(base.verify());
    }

    #[test]
    fn test_can_execute() {
        assert!(fingerprint("x86_64-unknown-linux-gnu", &[], &[], false).can_execute());
        assert!(!fingerprint("aarch64-unknown-linux-gnu", &[], &[], true).can_execute());
        assert!(fingerprint("aarch64-unknown-linux-gnu", &[], &["qemu-aarch64"], true).can_execute());
    }

    #[test]
    fn test_tampered_record_fails_verification() {
        let mut fp = fingerprint("x86_64-unknown-linux-gnu", &[], &[], false);
        fp.version = "cc (GCC) 14.1.0".into();
        assert!(!fp.verify());
    }

    #[test]
    fn test_registry_computes_once() {
        let _guard = REGISTRY_LOCK.lock().unwrap();
        // A compiler that does not exist still yields a fingerprint.
        let tc = GccToolchain::new(
            PathBuf::from("/nonexistent/registry-test-cc"),
            PathBuf::from("/nonexistent/registry-test-c++"),
            PathBuf::from("ar"),
            ToolchainFamily::Gcc,
        );
        let settings = ToolchainSettings {
            target: Some("riscv64gc-unknown-none-elf".into()),
            ..Default::default()
        };

        let a = fingerprint_for(&tc, &settings);
        let b = fingerprint_for(&tc, &settings);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.version, "unknown");
        assert_eq!(a.target, "riscv64gc-unknown-none-elf");
        assert!(a.cross_compiling);

        let forced = ToolchainSettings {
            cross_compiling: Some(false),
            ..settings.clone()
        };
        let c = fingerprint_for(&tc, &forced);
        assert!(!c.cross_compiling);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_reconfigure_recomputes() {
        let _guard = REGISTRY_LOCK.lock().unwrap();
        let tc = GccToolchain::new(
            PathBuf::from("/nonexistent/reconfigure-test-cc"),
            PathBuf::from("/nonexistent/reconfigure-test-c++"),
            PathBuf::from("ar"),
            ToolchainFamily::Gcc,
        );
        let settings = ToolchainSettings::default();
        let a = fingerprint_for(&tc, &settings);
        reconfigure();
        let b = fingerprint_for(&tc, &settings);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.hash(), b.hash());
    }
}
