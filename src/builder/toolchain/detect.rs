//! Toolchain detection functions.

use std::path::{Path, PathBuf};

use crate::builder::errors::ProbeError;
use crate::util::config::ToolchainSettings;
use crate::util::process::{find_ar, find_c_compiler, find_executable, ProcessBuilder};

use super::{GccToolchain, MsvcToolchain, Toolchain, ToolchainFamily};

/// Detect the toolchain probes are compiled with.
///
/// Priority:
/// 1. `cc`/`ar` from the toolchain config
/// 2. Environment variables (CC, AR)
/// 3. On Windows: an MSVC developer prompt environment
/// 4. PATH search for cc, gcc, clang
pub fn detect_toolchain(settings: &ToolchainSettings) -> Result<Box<dyn Toolchain>, ProbeError> {
    if let Some(cc) = &settings.cc {
        match find_executable(&cc.to_string_lossy()) {
            Some(cc) => {
                tracing::debug!("using configured C compiler {}", cc.display());
                return Ok(toolchain_for(cc, settings.ar.clone()));
            }
            None => tracing::warn!("configured C compiler not found: {}", cc.display()),
        }
    }

    #[cfg(target_os = "windows")]
    {
        if std::env::var("CC").is_err() {
            if let Some(toolchain) = try_detect_msvc_prompt() {
                return Ok(toolchain);
            }
        }
    }

    match find_c_compiler() {
        Some(cc) => Ok(toolchain_for(cc, settings.ar.clone())),
        None => Err(ProbeError::ToolchainUnavailable {
            reason: "no C compiler found (tried $CC, cc, gcc, clang)".to_string(),
        }),
    }
}

fn is_msvc_driver(cc: &Path) -> bool {
    cc.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("cl"))
}

fn toolchain_for(cc: PathBuf, ar: Option<PathBuf>) -> Box<dyn Toolchain> {
    if is_msvc_driver(&cc) {
        let sibling = |name: &str| {
            cc.parent()
                .map(|dir| dir.join(name))
                .filter(|p| p.exists())
                .unwrap_or_else(|| PathBuf::from(name))
        };
        let lib = ar.unwrap_or_else(|| sibling("lib.exe"));
        let link = sibling("link.exe");
        return Box::new(MsvcToolchain::new(cc, lib, link));
    }

    let cxx = std::env::var("CXX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| GccToolchain::infer_cxx(&cc));

    // The archiver is only needed for fixture libraries; a missing one
    // surfaces when a fixture is built.
    let ar = ar
        .or_else(find_ar)
        .unwrap_or_else(|| PathBuf::from("ar"));

    let family = detect_compiler_family(&cc);
    tracing::debug!(
        "detected {} toolchain: cc={}, ar={}",
        family.as_str(),
        cc.display(),
        ar.display()
    );
    Box::new(GccToolchain::new(cc, cxx, ar, family))
}

/// Use cl.exe when running inside a Developer Command Prompt.
#[cfg(target_os = "windows")]
fn try_detect_msvc_prompt() -> Option<Box<dyn Toolchain>> {
    let cl = find_executable("cl")?;
    if std::env::var("INCLUDE").is_err() || std::env::var("LIB").is_err() {
        tracing::debug!("cl.exe found but the MSVC environment is not configured");
        return None;
    }
    let lib = find_executable("lib")?;
    let link = find_executable("link")?;
    Some(Box::new(MsvcToolchain::new(cl, lib, link)))
}

/// Detect whether the compiler is GCC, Clang, Apple Clang or MSVC.
pub fn detect_compiler_family(cc: &Path) -> ToolchainFamily {
    if is_msvc_driver(cc) {
        return ToolchainFamily::Msvc;
    }

    let name = cc
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    if name.contains("gcc") || name.contains("g++") {
        return ToolchainFamily::Gcc;
    }

    // `cc` and friends could be anything; ask the compiler.
    let version = ProcessBuilder::new(cc)
        .arg("--version")
        .exec()
        .map(|out| String::from_utf8_lossy(&out.stdout).to_lowercase())
        .unwrap_or_default();

    if version.contains("clang") || name.contains("clang") {
        if version.contains("apple") {
            ToolchainFamily::AppleClang
        } else {
            ToolchainFamily::Clang
        }
    } else {
        ToolchainFamily::Gcc
    }
}
