//! Toolchain abstraction for C/C++ compilers.
//!
//! A toolchain knows how to turn a probe into a single compile+link command,
//! and how to build the object files and static archives used by fixture
//! libraries.
//!
//! Toolchain detection priority:
//! 1. Toolchain config file (`.cprobe/toolchain.toml` or `~/.cprobe/toolchain.toml`)
//! 2. Environment variables (CC, AR)
//! 3. Auto-detection (searching PATH for common compilers)

use std::path::{Path, PathBuf};

use crate::core::probe::Language;
use crate::util::process::ProcessBuilder;

mod detect;
mod gcc;
mod msvc;

pub use detect::{detect_compiler_family, detect_toolchain};
pub use gcc::GccToolchain;
pub use msvc::MsvcToolchain;

/// A command to execute, with program, arguments, and environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The program to run (e.g., "gcc", "cl.exe")
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Convert into a process builder ready to spawn.
    pub fn to_process(&self) -> ProcessBuilder {
        let mut process = ProcessBuilder::new(&self.program).args(&self.args);
        for (key, value) in &self.env {
            process = process.env(key, value);
        }
        process
    }
}

/// Input for a probe's single-step compile and link.
#[derive(Debug, Clone)]
pub struct ProbeCompileInput {
    /// Rendered probe source
    pub source: PathBuf,
    /// Output executable
    pub output: PathBuf,
    pub language: Language,
    /// Language standard (`c99`, `c++17`, ...)
    pub std: Option<String>,
    pub include_dirs: Vec<PathBuf>,
    pub lib_dirs: Vec<PathBuf>,
    /// Libraries to link (without -l prefix)
    pub libs: Vec<String>,
    /// Compiler flags (toolchain-wide first, then the probe's own)
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
}

/// Input for compiling one fixture source to an object file.
#[derive(Debug, Clone)]
pub struct ObjectInput {
    pub source: PathBuf,
    pub output: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub cflags: Vec<String>,
}

/// Input for an archive step (creating static library).
#[derive(Debug, Clone)]
pub struct ArchiveInput {
    /// Object files to archive
    pub objects: Vec<PathBuf>,
    /// Output archive file
    pub output: PathBuf,
}

/// The family of a toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainFamily {
    Gcc,
    Clang,
    AppleClang,
    Msvc,
}

impl ToolchainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainFamily::Gcc => "gcc",
            ToolchainFamily::Clang => "clang",
            ToolchainFamily::AppleClang => "apple-clang",
            ToolchainFamily::Msvc => "msvc",
        }
    }
}

/// Trait for toolchain implementations.
///
/// Each toolchain knows how to generate commands for its specific compiler.
pub trait Toolchain: Send + Sync {
    fn family(&self) -> ToolchainFamily;

    /// Get the C compiler path.
    fn compiler_path(&self) -> &Path;

    /// Get the C++ compiler path.
    fn cxx_compiler_path(&self) -> &Path;

    /// Get the archiver path.
    fn archiver_path(&self) -> &Path;

    /// Compile and link a probe into an executable in one step.
    fn probe_command(&self, input: &ProbeCompileInput) -> CommandSpec;

    /// Compile a fixture source to an object file.
    fn object_command(&self, input: &ObjectInput) -> CommandSpec;

    /// Generate an archive command (create static library).
    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec;

    /// A command whose first output line identifies the compiler version.
    fn version_command(&self) -> CommandSpec;

    /// A command that prints the compiler's default target triple, if the
    /// compiler can report one.
    fn target_command(&self) -> Option<CommandSpec>;

    /// Get the object file extension.
    fn object_extension(&self) -> &str;

    /// Get the executable extension.
    fn exe_extension(&self) -> &str;

    /// File name of a static library called `name`.
    fn static_lib_name(&self, name: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_input() -> ProbeCompileInput {
        ProbeCompileInput {
            source: PathBuf::from("/tmp/p/probe.c"),
            output: PathBuf::from("/tmp/p/probe"),
            language: Language::C,
            std: Some("c99".to_string()),
            include_dirs: vec![PathBuf::from("/opt/include")],
            lib_dirs: vec![PathBuf::from("/opt/lib")],
            libs: vec!["simple_math".to_string()],
            cflags: vec!["-Wall".to_string()],
            ldflags: vec![],
        }
    }

    #[test]
    fn test_gcc_probe_command() {
        let tc = GccToolchain::new(
            PathBuf::from("gcc"),
            PathBuf::from("g++"),
            PathBuf::from("ar"),
            ToolchainFamily::Gcc,
        );
        let cmd = tc.probe_command(&probe_input());
        assert_eq!(cmd.program, PathBuf::from("gcc"));
        assert!(!cmd.args.contains(&"-c".to_string()));
        assert!(cmd.args.contains(&"-std=c99".to_string()));
        assert!(cmd.args.contains(&"-I/opt/include".to_string()));
        assert!(cmd.args.contains(&"-L/opt/lib".to_string()));
        assert!(cmd.args.contains(&"-Wall".to_string()));

        // Libraries must follow the source for single-pass linkers.
        let src = cmd.args.iter().position(|a| a == "/tmp/p/probe.c").unwrap();
        let lib = cmd.args.iter().position(|a| a == "-lsimple_math").unwrap();
        assert!(src < lib);
    }

    #[test]
    fn test_gcc_cxx_uses_cxx_driver() {
        let tc = GccToolchain::new(
            PathBuf::from("clang"),
            PathBuf::from("clang++"),
            PathBuf::from("ar"),
            ToolchainFamily::Clang,
        );
        let mut input = probe_input();
        input.language = Language::Cxx;
        input.std = Some("c++17".to_string());
        let cmd = tc.probe_command(&input);
        assert_eq!(cmd.program, PathBuf::from("clang++"));
        assert!(cmd.args.contains(&"-std=c++17".to_string()));
    }

    #[test]
    fn test_gcc_fixture_commands() {
        let tc = GccToolchain::new(
            PathBuf::from("cc"),
            PathBuf::from("c++"),
            PathBuf::from("ar"),
            ToolchainFamily::Gcc,
        );
        let obj = tc.object_command(&ObjectInput {
            source: PathBuf::from("simple_math.c"),
            output: PathBuf::from("simple_math.o"),
            include_dirs: vec![],
            cflags: vec![],
        });
        assert!(obj.args.contains(&"-c".to_string()));

        let ar = tc.archive_command(&ArchiveInput {
            objects: vec![PathBuf::from("simple_math.o")],
            output: PathBuf::from("libsimple_math.a"),
        });
        assert_eq!(ar.program, PathBuf::from("ar"));
        assert!(ar.args.contains(&"rcs".to_string()));
        assert_eq!(tc.static_lib_name("simple_math"), "libsimple_math.a");
        assert!(tc.target_command().is_some());
    }

    #[test]
    fn test_msvc_probe_command() {
        let tc = MsvcToolchain::new(
            PathBuf::from("cl"),
            PathBuf::from("lib"),
            PathBuf::from("link"),
        );
        let cmd = tc.probe_command(&probe_input());
        assert_eq!(cmd.program, PathBuf::from("cl"));
        assert!(cmd.args.contains(&"/nologo".to_string()));
        assert!(cmd.args.contains(&"/std:c11".to_string()));
        assert!(cmd.args.contains(&"/link".to_string()));
        assert!(cmd.args.contains(&"simple_math.lib".to_string()));
        assert!(cmd.args.iter().any(|a| a.starts_with("/LIBPATH:")));
        assert!(tc.target_command().is_none());
    }

    #[test]
    fn test_command_spec_to_process() {
        let spec = CommandSpec::new("cc").arg("--version").env("LC_ALL", "C");
        let process = spec.to_process();
        assert_eq!(process.get_program(), Path::new("cc"));
        assert_eq!(process.get_args(), ["--version".to_string()]);
    }
}
