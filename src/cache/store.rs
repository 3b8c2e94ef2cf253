//! On-disk fact records.
//!
//! One pretty-printed JSON file per cache key under `<cache-dir>/facts/`.
//! Records are written atomically, so a reader sees either the previous
//! record or the new one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ProbeOutcome;
use crate::core::fact::Fact;
use crate::util::fs::write_atomic;

/// Bumped whenever the record layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// A persisted fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub format_version: u32,
    pub key: String,
    /// Toolchain fingerprint hash the fact was produced with
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub fact: Fact,
    pub outcome: ProbeOutcome,
}

/// A record that exists but cannot be used.
#[derive(Debug, Error)]
#[error("corrupt cache record {}: {reason}", path.display())]
pub struct CorruptRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Directory of JSON fact records.
#[derive(Debug, Clone)]
pub struct FactStore {
    dir: PathBuf,
}

impl FactStore {
    /// Records live in `<cache_dir>/facts`.
    pub fn new(cache_dir: &Path) -> Self {
        FactStore {
            dir: cache_dir.join("facts"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load the record for `key`. `Ok(None)` when there is none.
    pub fn load(&self, key: &str) -> Result<Option<CacheRecord>, CorruptRecord> {
        let path = self.record_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CorruptRecord {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let record: CacheRecord = serde_json::from_str(&content).map_err(|e| CorruptRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let reason = if record.format_version != FORMAT_VERSION {
            Some(format!(
                "format version {} (expected {})",
                record.format_version, FORMAT_VERSION
            ))
        } else if record.key != key {
            Some(format!("record is for key {}", record.key))
        } else if record.fact.provenance.fingerprint != record.fingerprint {
            Some("fact provenance does not match the record fingerprint".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CorruptRecord { path, reason }),
            None => Ok(Some(record)),
        }
    }

    /// Persist `record` under its key.
    pub fn save(&self, record: &CacheRecord) -> Result<()> {
        let path = self.record_path(&record.key);
        let content =
            serde_json::to_string_pretty(record).context("failed to serialize cache record")?;
        write_atomic(&path, content.as_bytes())?;
        tracing::debug!("cached fact for `{}` at {}", record.fact.probe(), path.display());
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to remove cache record {}", path.display()))
            }
        }
    }

    /// All readable records, oldest first. Corrupt records are skipped.
    pub fn list(&self) -> Result<Vec<CacheRecord>> {
        let mut records = Vec::new();
        for key in self.keys()? {
            match self.load(&key) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.key.cmp(&b.key)));
        Ok(records)
    }

    /// Remove every record. Returns how many were removed.
    pub fn clean(&self) -> Result<usize> {
        let keys = self.keys()?;
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }

    fn keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read cache directory {}", self.dir.display()))?;
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.context("failed to read cache entry")?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
