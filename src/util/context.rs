//! Global context for cprobe operations.
//!
//! Provides centralized access to configuration, paths, and environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::manifest::MANIFEST_NAME;
use crate::util::config::{
    global_config_path, global_toolchain_config_path, load_config, load_toolchain_config,
    project_config_path, project_toolchain_config_path, Config, ToolchainConfig,
};

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Whether to use verbose output
    verbose: bool,

    /// Merged global + project configuration
    config: Config,

    /// Merged global + project toolchain overrides
    toolchain_config: ToolchainConfig,
}

impl GlobalContext {
    /// Create a new GlobalContext rooted at the current directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(Self::with_cwd(cwd))
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Self {
        let config = load_config(global_config_path().as_deref(), &project_config_path(&cwd));
        let toolchain_config = load_toolchain_config(
            global_toolchain_config_path().as_deref(),
            &project_toolchain_config_path(&cwd),
        );

        GlobalContext {
            cwd,
            verbose: false,
            config,
            toolchain_config,
        }
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the merged configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the merged toolchain overrides.
    pub fn toolchain_config(&self) -> &ToolchainConfig {
        &self.toolchain_config
    }

    /// Get the project-local cprobe directory.
    pub fn project_dir(&self) -> PathBuf {
        self.cwd.join(".cprobe")
    }

    /// Get the fact cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.config.cache.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.cwd.join(dir),
            None => self.project_dir().join("cache"),
        }
    }

    /// Get the directory fixture libraries are built into.
    pub fn build_dir(&self) -> PathBuf {
        self.project_dir().join("build")
    }

    /// Find the probe manifest starting from cwd and searching upward.
    pub fn find_manifest(&self) -> Option<PathBuf> {
        self.cwd
            .ancestors()
            .map(|dir| dir.join(MANIFEST_NAME))
            .find(|candidate| candidate.is_file())
    }
}
