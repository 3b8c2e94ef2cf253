//! Target triples and host execution compatibility.

use std::fmt;
use std::str::FromStr;

/// Target triple components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetTriple {
    /// CPU architecture (x86_64, aarch64, etc.)
    pub arch: String,
    /// Vendor (unknown, apple, pc, etc.)
    pub vendor: String,
    /// Operating system (linux, darwin, windows, etc.)
    pub os: String,
    /// Environment/ABI (gnu, musl, msvc, etc.)
    pub env: Option<String>,
}

impl TargetTriple {
    /// Create a new target triple.
    pub fn new(arch: &str, vendor: &str, os: &str, env: Option<&str>) -> Self {
        TargetTriple {
            arch: arch.to_string(),
            vendor: vendor.to_string(),
            os: os.to_string(),
            env: env.map(|s| s.to_string()),
        }
    }

    /// Detect the host target triple.
    pub fn host() -> Self {
        let arch = std::env::consts::ARCH;
        let os = std::env::consts::OS;

        let (vendor, os, env) = match os {
            "linux" => ("unknown", "linux", Some("gnu")),
            "macos" => ("apple", "darwin", None),
            "windows" => ("pc", "windows", Some("msvc")),
            other => ("unknown", other, None),
        };

        TargetTriple::new(arch, vendor, os, env)
    }

    /// Parse a target triple string.
    ///
    /// Accepts `arch-vendor-os[-env]` and the common three-part
    /// `arch-os-env` form emitted by `gcc -dumpmachine` (e.g. `x86_64-linux-gnu`).
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        match parts.as_slice() {
            [arch, "linux", env] => Some(TargetTriple::new(arch, "unknown", "linux", Some(env))),
            [arch, vendor, os] => Some(TargetTriple::new(arch, vendor, os, None)),
            [arch, vendor, os, env, ..] => Some(TargetTriple::new(arch, vendor, os, Some(env))),
            _ => None,
        }
    }

    /// Normalized operating system name (`macos` and `darwin*` compare equal).
    fn os_family(&self) -> &str {
        if self.os.starts_with("darwin") || self.os == "macos" {
            "darwin"
        } else {
            &self.os
        }
    }

    /// Whether binaries for this target can run natively on `host`.
    ///
    /// Vendor and ABI environment are ignored: a `-musl` binary runs on a
    /// `-gnu` host of the same architecture and OS.
    pub fn runs_on(&self, host: &TargetTriple) -> bool {
        let same_arch = self.arch == host.arch
            || matches!(
                (self.arch.as_str(), host.arch.as_str()),
                ("i686", "x86_64") | ("i586", "x86_64") | ("arm64", "aarch64") | ("aarch64", "arm64")
            );
        same_arch && self.os_family() == host.os_family()
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.env {
            Some(env) => write!(f, "{}-{}-{}-{}", self.arch, self.vendor, self.os, env),
            None => write!(f, "{}-{}-{}", self.arch, self.vendor, self.os),
        }
    }
}

impl FromStr for TargetTriple {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetTriple::parse(s).ok_or_else(|| format!("invalid target triple `{}`", s))
    }
}
