//! Configuration file support for cprobe.
//!
//! cprobe supports two configuration file locations:
//! - Global: `~/.cprobe/config.toml` - User-wide defaults
//! - Project: `.cprobe/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config.
//!
//! Toolchain overrides are stored separately:
//! - Global: `~/.cprobe/toolchain.toml`
//! - Project: `.cprobe/toolchain.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default wall-clock limit for a single probe binary.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 10;

/// Default wall-clock limit for a single compiler invocation.
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 120;

/// Default number of retries after an infrastructure failure.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

/// cprobe configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probe execution settings
    pub probe: ProbeConfig,

    /// Fact cache settings
    pub cache: CacheConfig,
}

/// Probe execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProbeConfig {
    /// Number of probes run in parallel (None = number of CPUs)
    pub jobs: Option<usize>,

    /// Timeout for a probe binary, in seconds
    pub timeout_secs: Option<u64>,

    /// Timeout for a compiler invocation, in seconds
    pub compile_timeout_secs: Option<u64>,

    /// Retries after spawn/I/O failures before the run is aborted
    pub retry_budget: Option<u32>,
}

impl ProbeConfig {
    /// Effective probe run timeout.
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_RUN_TIMEOUT_SECS))
    }

    /// Effective compiler timeout.
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(
            self.compile_timeout_secs
                .unwrap_or(DEFAULT_COMPILE_TIMEOUT_SECS),
        )
    }

    /// Effective retry budget.
    pub fn retry_budget(&self) -> u32 {
        self.retry_budget.unwrap_or(DEFAULT_RETRY_BUDGET)
    }
}

/// Fact cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Persist facts between invocations
    pub enabled: bool,

    /// Cache directory override (defaults to `.cprobe/cache`)
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            dir: None,
        }
    }
}

/// Toolchain configuration for compiler overrides.
///
/// This is stored in a separate file (`toolchain.toml`) from the main config
/// to allow easy toolchain switching without modifying other settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Toolchain settings
    pub toolchain: ToolchainSettings,
}

/// Toolchain settings for probe compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolchainSettings {
    /// Path to the C compiler (e.g., /usr/bin/clang)
    pub cc: Option<PathBuf>,

    /// Path to the archiver (e.g., /usr/bin/llvm-ar)
    pub ar: Option<PathBuf>,

    /// Target triple for cross-compilation (e.g., aarch64-unknown-linux-gnu)
    pub target: Option<String>,

    /// Additional compiler flags applied to every probe
    pub cflags: Vec<String>,

    /// Additional linker flags applied to every probe
    pub ldflags: Vec<String>,

    /// Launcher for target binaries when cross-compiling (e.g., ["qemu-aarch64", "-L", "/usr/aarch64-linux-gnu"])
    pub emulator: Vec<String>,

    /// Force cross-compilation on or off instead of comparing triples
    pub cross_compiling: Option<bool>,
}

impl ToolchainConfig {
    /// Load toolchain configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read toolchain config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse toolchain config: {}", path.display()))
    }

    /// Load toolchain configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!(
                    "Failed to load toolchain config from {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Save toolchain configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory: {}", parent.display())
            })?;
        }

        let contents =
            toml::to_string_pretty(self).context("failed to serialize toolchain config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("failed to write toolchain config: {}", path.display()))?;

        Ok(())
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: ToolchainConfig) {
        let other = other.toolchain;
        if other.cc.is_some() {
            self.toolchain.cc = other.cc;
        }
        if other.ar.is_some() {
            self.toolchain.ar = other.ar;
        }
        if other.target.is_some() {
            self.toolchain.target = other.target;
        }
        if !other.cflags.is_empty() {
            self.toolchain.cflags = other.cflags;
        }
        if !other.ldflags.is_empty() {
            self.toolchain.ldflags = other.ldflags;
        }
        if !other.emulator.is_empty() {
            self.toolchain.emulator = other.emulator;
        }
        if other.cross_compiling.is_some() {
            self.toolchain.cross_compiling = other.cross_compiling;
        }
    }
}

/// Load merged toolchain configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.cprobe/toolchain.toml)
/// 2. Global config (~/.cprobe/toolchain.toml)
/// 3. Defaults
pub fn load_toolchain_config(global_path: Option<&Path>, project_path: &Path) -> ToolchainConfig {
    let mut config = ToolchainConfig::default();

    if let Some(global) = global_path.filter(|p| p.exists()) {
        config.merge(ToolchainConfig::load_or_default(global));
    }

    if project_path.exists() {
        config.merge(ToolchainConfig::load_or_default(project_path));
    }

    config
}

/// Get the global cprobe config directory (~/.cprobe).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".cprobe"))
}

/// Get the global config path (~/.cprobe/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the global toolchain config path (~/.cprobe/toolchain.toml).
pub fn global_toolchain_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("toolchain.toml"))
}

/// Get the project config path (.cprobe/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".cprobe").join("config.toml")
}

/// Get the project toolchain config path (.cprobe/toolchain.toml).
pub fn project_toolchain_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".cprobe").join("toolchain.toml")
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.probe.jobs.is_some() {
            self.probe.jobs = other.probe.jobs;
        }
        if other.probe.timeout_secs.is_some() {
            self.probe.timeout_secs = other.probe.timeout_secs;
        }
        if other.probe.compile_timeout_secs.is_some() {
            self.probe.compile_timeout_secs = other.probe.compile_timeout_secs;
        }
        if other.probe.retry_budget.is_some() {
            self.probe.retry_budget = other.probe.retry_budget;
        }

        // `enabled` defaults to true, so only an explicit opt-out propagates
        if !other.cache.enabled {
            self.cache.enabled = false;
        }
        if other.cache.dir.is_some() {
            self.cache.dir = other.cache.dir;
        }
    }
}

/// Load merged configuration from global and project locations.
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global) = global_path.filter(|p| p.exists()) {
        config.merge(Config::load_or_default(global));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.probe.jobs.is_none());
        assert!(config.cache.enabled);
        assert_eq!(
            config.probe.run_timeout(),
            Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS)
        );
        assert_eq!(config.probe.retry_budget(), DEFAULT_RETRY_BUDGET);
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[probe]
jobs = 8
timeout-secs = 3
retry-budget = 0

[cache]
enabled = false
dir = "/tmp/facts"
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.probe.jobs, Some(8));
        assert_eq!(config.probe.run_timeout(), Duration::from_secs(3));
        assert_eq!(config.probe.retry_budget(), 0);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/facts")));
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.probe.jobs = Some(4);
        base.probe.timeout_secs = Some(5);

        let mut override_cfg = Config::default();
        override_cfg.probe.timeout_secs = Some(30);

        base.merge(override_cfg);

        assert_eq!(base.probe.timeout_secs, Some(30));
        assert_eq!(base.probe.jobs, Some(4));
        assert!(base.cache.enabled);
    }

    #[test]
    fn test_toolchain_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("toolchain.toml");

        std::fs::write(
            &config_path,
            r#"
[toolchain]
cc = "/usr/bin/aarch64-linux-gnu-gcc"
target = "aarch64-unknown-linux-gnu"
cflags = ["-O2"]
emulator = ["qemu-aarch64", "-L", "/usr/aarch64-linux-gnu"]
cross-compiling = true
"#,
        )
        .unwrap();

        let config = ToolchainConfig::load(&config_path).unwrap();
        let tc = &config.toolchain;
        assert_eq!(tc.cc, Some(PathBuf::from("/usr/bin/aarch64-linux-gnu-gcc")));
        assert_eq!(tc.target.as_deref(), Some("aarch64-unknown-linux-gnu"));
        assert_eq!(tc.cflags, vec!["-O2"]);
        assert_eq!(tc.emulator.len(), 3);
        assert_eq!(tc.cross_compiling, Some(true));
        assert!(config.toolchain.cc.is_some());
    }

    #[test]
    fn test_toolchain_config_save_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join(".cprobe").join("toolchain.toml");

        let mut config = ToolchainConfig::default();
        config.toolchain.cc = Some(PathBuf::from("/usr/bin/gcc"));
        config.toolchain.ldflags = vec!["-static".to_string()];
        config.save(&config_path).unwrap();

        let loaded = ToolchainConfig::load(&config_path).unwrap();
        assert_eq!(loaded.toolchain, config.toolchain);
    }

    #[test]
    fn test_load_toolchain_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(
            &global_path,
            "[toolchain]\ncc = \"/usr/bin/gcc\"\nar = \"/usr/bin/ar\"\ncflags = [\"-O2\"]\n",
        )
        .unwrap();
        std::fs::write(
            &project_path,
            "[toolchain]\ncc = \"/usr/bin/clang\"\ncflags = [\"-O0\"]\n",
        )
        .unwrap();

        let config = load_toolchain_config(Some(&global_path), &project_path);

        assert_eq!(config.toolchain.cc, Some(PathBuf::from("/usr/bin/clang")));
        assert_eq!(config.toolchain.ar, Some(PathBuf::from("/usr/bin/ar")));
        assert_eq!(config.toolchain.cflags, vec!["-O0"]);
    }
}
