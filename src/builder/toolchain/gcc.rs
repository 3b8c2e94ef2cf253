//! GCC/Clang toolchain implementation.

use std::path::{Path, PathBuf};

use crate::core::probe::Language;

use super::{
    ArchiveInput, CommandSpec, ObjectInput, ProbeCompileInput, Toolchain, ToolchainFamily,
};

/// GCC/Clang toolchain (Unix-like systems).
#[derive(Debug, Clone)]
pub struct GccToolchain {
    /// Path to the C compiler
    pub cc: PathBuf,
    /// Path to the C++ compiler
    pub cxx: PathBuf,
    /// Path to the archiver
    pub ar: PathBuf,
    /// Compiler family (gcc, clang, apple-clang)
    pub family: ToolchainFamily,
}

impl GccToolchain {
    pub fn new(cc: PathBuf, cxx: PathBuf, ar: PathBuf, family: ToolchainFamily) -> Self {
        GccToolchain {
            cc,
            cxx,
            ar,
            family,
        }
    }

    /// Infer C++ compiler path from C compiler path.
    ///
    /// - gcc, x86_64-linux-gnu-gcc -> g++, x86_64-linux-gnu-g++
    /// - clang -> clang++
    /// - cc, /usr/bin/cc -> c++, /usr/bin/c++
    pub fn infer_cxx(cc: &Path) -> PathBuf {
        let cc_str = cc.to_string_lossy();

        if let Some(prefix) = cc_str.strip_suffix("gcc") {
            return PathBuf::from(format!("{}g++", prefix));
        }
        if cc_str.ends_with("clang") {
            return PathBuf::from(format!("{}++", cc_str));
        }

        // Only a complete `cc` basename, not `mycc`
        let is_standalone_cc = cc_str == "cc"
            || cc_str.ends_with("/cc")
            || cc_str.ends_with("\\cc")
            || cc_str.ends_with("-cc");
        if let (true, Some(prefix)) = (is_standalone_cc, cc_str.strip_suffix("cc")) {
            return PathBuf::from(format!("{}c++", prefix));
        }

        PathBuf::from(format!("{}++", cc_str))
    }

    fn driver(&self, language: Language) -> &Path {
        match language {
            Language::C => &self.cc,
            Language::Cxx => &self.cxx,
        }
    }
}

impl Toolchain for GccToolchain {
    fn family(&self) -> ToolchainFamily {
        self.family
    }

    fn compiler_path(&self) -> &Path {
        &self.cc
    }

    fn cxx_compiler_path(&self) -> &Path {
        &self.cxx
    }

    fn archiver_path(&self) -> &Path {
        &self.ar
    }

    fn probe_command(&self, input: &ProbeCompileInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(self.driver(input.language));

        if let Some(std) = &input.std {
            cmd = cmd.arg(format!("-std={}", std));
        }
        for dir in &input.include_dirs {
            cmd = cmd.arg(format!("-I{}", dir.display()));
        }
        cmd = cmd.args(input.cflags.iter().cloned());

        cmd = cmd
            .arg(input.source.display().to_string())
            .arg("-o")
            .arg(input.output.display().to_string());

        // Search paths and libraries after the source so single-pass
        // linkers resolve the probe's references.
        for dir in &input.lib_dirs {
            cmd = cmd.arg(format!("-L{}", dir.display()));
        }
        for lib in &input.libs {
            cmd = cmd.arg(format!("-l{}", lib));
        }
        cmd.args(input.ldflags.iter().cloned())
    }

    fn object_command(&self, input: &ObjectInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.cc).arg("-c");
        for dir in &input.include_dirs {
            cmd = cmd.arg(format!("-I{}", dir.display()));
        }
        cmd.args(input.cflags.iter().cloned())
            .arg(input.source.display().to_string())
            .arg("-o")
            .arg(input.output.display().to_string())
    }

    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec {
        // Create archive with symbol index, replace files
        CommandSpec::new(&self.ar)
            .arg("rcs")
            .arg(input.output.display().to_string())
            .args(input.objects.iter().map(|o| o.display().to_string()))
    }

    fn version_command(&self) -> CommandSpec {
        CommandSpec::new(&self.cc).arg("--version")
    }

    fn target_command(&self) -> Option<CommandSpec> {
        Some(CommandSpec::new(&self.cc).arg("-dumpmachine"))
    }

    fn object_extension(&self) -> &str {
        "o"
    }

    fn exe_extension(&self) -> &str {
        if cfg!(windows) {
            "exe"
        } else {
            ""
        }
    }

    fn static_lib_name(&self, name: &str) -> String {
        format!("lib{}.a", name)
    }
}
