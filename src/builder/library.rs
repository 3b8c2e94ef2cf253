//! Fixture libraries built before probing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::builder::cancel::CancellationToken;
use crate::builder::executor::spawn_and_wait;
use crate::builder::toolchain::{ArchiveInput, CommandSpec, ObjectInput, Toolchain};
use crate::core::manifest::FixtureLibrary;
use crate::util::fs::ensure_dir;

/// A fixture library that was built.
#[derive(Debug, Clone)]
pub struct BuiltLibrary {
    pub name: String,
    /// The static archive
    pub path: PathBuf,
}

/// Compiles fixture sources to objects and archives them.
pub struct LibraryBuilder<'a> {
    toolchain: &'a dyn Toolchain,
    out_dir: PathBuf,
    cflags: Vec<String>,
    timeout: Duration,
}

impl<'a> LibraryBuilder<'a> {
    /// Libraries are written to `out_dir`, objects to `out_dir/obj/<name>`.
    pub fn new(toolchain: &'a dyn Toolchain, out_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        LibraryBuilder {
            toolchain,
            out_dir: out_dir.into(),
            cflags: Vec::new(),
            timeout,
        }
    }

    /// Toolchain-wide flags applied before each library's own flags.
    pub fn cflags(mut self, cflags: Vec<String>) -> Self {
        self.cflags = cflags;
        self
    }

    /// Directory probes should search for the built libraries.
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Build every library in parallel. Results keep the input order.
    pub fn build_all(
        &self,
        libraries: &[FixtureLibrary],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuiltLibrary>> {
        libraries
            .par_iter()
            .map(|lib| self.build(lib, cancel))
            .collect()
    }

    pub fn build(&self, lib: &FixtureLibrary, cancel: &CancellationToken) -> Result<BuiltLibrary> {
        if lib.sources.is_empty() {
            bail!("fixture library `{}` has no sources", lib.name);
        }

        let obj_dir = self.out_dir.join("obj").join(&lib.name);
        ensure_dir(&obj_dir)?;

        let mut cflags = self.cflags.clone();
        cflags.extend(lib.flags.iter().cloned());

        let mut objects = Vec::with_capacity(lib.sources.len());
        for source in &lib.sources {
            let stem = source
                .file_stem()
                .with_context(|| format!("invalid source path: {}", source.display()))?;
            let mut object = obj_dir.join(stem);
            object.set_extension(self.toolchain.object_extension());

            let input = ObjectInput {
                source: source.clone(),
                output: object.clone(),
                include_dirs: lib.include_dirs.clone(),
                cflags: cflags.clone(),
            };
            tracing::debug!("Compiling {} -> {}", source.display(), object.display());
            self.exec(self.toolchain.object_command(&input), cancel)
                .with_context(|| format!("compilation failed for {}", source.display()))?;
            objects.push(object);
        }

        let output = self.out_dir.join(self.toolchain.static_lib_name(&lib.name));
        // `ar rcs` appends to an existing archive
        if output.exists() {
            std::fs::remove_file(&output)
                .with_context(|| format!("failed to remove {}", output.display()))?;
        }
        let input = ArchiveInput {
            objects,
            output: output.clone(),
        };
        tracing::debug!("Creating static library {}", output.display());
        self.exec(self.toolchain.archive_command(&input), cancel)
            .with_context(|| format!("archiving failed for {}", output.display()))?;

        tracing::info!("built fixture library `{}`", lib.name);
        Ok(BuiltLibrary {
            name: lib.name.clone(),
            path: output,
        })
    }

    fn exec(&self, spec: CommandSpec, cancel: &CancellationToken) -> Result<()> {
        let process = spec.to_process();
        let result = spawn_and_wait(&process, self.timeout, cancel)?;
        if !result.status.success() {
            bail!(
                "`{}` {}\n{}{}",
                process.display_command(),
                result.status,
                result.stdout,
                result.stderr
            );
        }
        Ok(())
    }
}
