//! Hashing for cache keys, payload hashes and toolchain fingerprints.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(sha256_bytes(&bytes))
}

/// Incremental hash over a sequence of typed components.
///
/// Strings are NUL-terminated and lists are length-prefixed, so
/// `["ab", "c"]` and `["a", "bc"]` never collide.
#[derive(Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Fingerprint {
            hasher: Sha256::new(),
        }
    }

    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.hasher.update(s.as_bytes());
        self.hasher.update(b"\0");
        self
    }

    pub fn update_list<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let items: Vec<&str> = items.into_iter().collect();
        self.update_u64(items.len() as u64);
        for s in items {
            self.update_str(s);
        }
        self
    }

    /// Paths are hashed by their display form.
    pub fn update_paths(&mut self, paths: &[PathBuf]) -> &mut Self {
        let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        self.update_list(shown.iter().map(String::as_str))
    }

    pub fn update_opt(&mut self, opt: Option<&str>) -> &mut Self {
        match opt {
            Some(s) => {
                self.hasher.update(b"\x01");
                self.update_str(s)
            }
            None => {
                self.hasher.update(b"\x00");
                self
            }
        }
    }

    pub fn update_bool(&mut self, b: bool) -> &mut Self {
        self.hasher.update([b as u8]);
        self
    }

    pub fn update_u64(&mut self, n: u64) -> &mut Self {
        self.hasher.update(n.to_le_bytes());
        self
    }

    /// Hex digest of everything added so far.
    pub fn finish(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}
