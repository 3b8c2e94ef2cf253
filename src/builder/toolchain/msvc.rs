//! MSVC toolchain implementation.

use std::path::{Path, PathBuf};

use crate::core::probe::Language;

use super::{
    ArchiveInput, CommandSpec, ObjectInput, ProbeCompileInput, Toolchain, ToolchainFamily,
};

/// MSVC toolchain (Windows).
#[derive(Debug, Clone)]
pub struct MsvcToolchain {
    /// Path to cl.exe (compiler)
    pub cl: PathBuf,
    /// Path to lib.exe (librarian)
    pub lib: PathBuf,
    /// Path to link.exe (linker)
    pub link: PathBuf,
}

impl MsvcToolchain {
    pub fn new(cl: PathBuf, lib: PathBuf, link: PathBuf) -> Self {
        MsvcToolchain { cl, lib, link }
    }

    /// Map a GCC-style standard name onto the closest `/std:` value.
    ///
    /// cl has no C99 mode; C11 is the oldest standard it accepts.
    fn std_flag(std: &str) -> String {
        let std = std.strip_prefix("gnu").map_or(std.to_string(), |s| format!("c{}", s));
        let value = match std.as_str() {
            "c89" | "c90" | "c99" | "c11" => "c11",
            "c17" | "c18" => "c17",
            other => other,
        };
        format!("/std:{}", value)
    }
}

impl Toolchain for MsvcToolchain {
    fn family(&self) -> ToolchainFamily {
        ToolchainFamily::Msvc
    }

    fn compiler_path(&self) -> &Path {
        &self.cl
    }

    fn cxx_compiler_path(&self) -> &Path {
        // cl.exe compiles both languages
        &self.cl
    }

    fn archiver_path(&self) -> &Path {
        &self.lib
    }

    fn probe_command(&self, input: &ProbeCompileInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.cl).arg("/nologo");

        if input.language == Language::Cxx {
            cmd = cmd.arg("/TP").arg("/EHsc");
        }
        if let Some(std) = &input.std {
            cmd = cmd.arg(Self::std_flag(std));
        }
        for dir in &input.include_dirs {
            cmd = cmd.arg(format!("/I{}", dir.display()));
        }
        cmd = cmd
            .args(input.cflags.iter().cloned())
            .arg(input.source.display().to_string())
            .arg(format!("/Fe{}", input.output.display()));

        // Everything after /link goes to link.exe
        cmd = cmd.arg("/link");
        for dir in &input.lib_dirs {
            cmd = cmd.arg(format!("/LIBPATH:{}", dir.display()));
        }
        for lib in &input.libs {
            cmd = cmd.arg(format!("{}.lib", lib));
        }
        cmd.args(input.ldflags.iter().cloned())
    }

    fn object_command(&self, input: &ObjectInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.cl).arg("/nologo").arg("/c");
        for dir in &input.include_dirs {
            cmd = cmd.arg(format!("/I{}", dir.display()));
        }
        cmd.args(input.cflags.iter().cloned())
            .arg(input.source.display().to_string())
            .arg(format!("/Fo{}", input.output.display()))
    }

    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec {
        CommandSpec::new(&self.lib)
            .arg("/nologo")
            .arg(format!("/OUT:{}", input.output.display()))
            .args(input.objects.iter().map(|o| o.display().to_string()))
    }

    fn version_command(&self) -> CommandSpec {
        // cl prints its banner on stderr when run without arguments
        CommandSpec::new(&self.cl)
    }

    fn target_command(&self) -> Option<CommandSpec> {
        None
    }

    fn object_extension(&self) -> &str {
        "obj"
    }

    fn exe_extension(&self) -> &str {
        "exe"
    }

    fn static_lib_name(&self, name: &str) -> String {
        format!("{}.lib", name)
    }
}
