//! Content-addressed fact cache.
//!
//! Facts are keyed by probe identity, payload hash and toolchain
//! fingerprint, so any change to what is compiled or how it is compiled
//! lands on a different key. Lookups are served from memory first and from
//! the optional on-disk store second.
//!
//! Concurrent requests for the same key are single-flight: one requester
//! computes while the rest wait on the key's slot and then read the result.

pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::builder::errors::Condition;
use crate::builder::executor::RunStatus;
use crate::builder::fingerprint::ToolchainFingerprint;
use crate::core::fact::Fact;
use crate::core::probe::Probe;
use crate::util::hash::Fingerprint;

pub use store::{CacheRecord, CorruptRecord, FactStore, FORMAT_VERSION};

/// Cache key of one probe under one toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `inputs` identifies anything else the probe links against (built
    /// fixture libraries).
    pub fn new(probe: &Probe, fingerprint: &ToolchainFingerprint, inputs: &str) -> Self {
        let mut fp = Fingerprint::new();
        fp.update_str(probe.id())
            .update_str(&probe.payload_hash())
            .update_str(fingerprint.hash())
            .update_str(inputs);
        CacheKey(fp.finish())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happened when a fact was computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Whether the (last) compile succeeded
    pub compiled: bool,
    /// How the probe binary ended, when it ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Compile and run attempts made
    pub attempts: u32,
    pub duration_ms: u64,
}

/// A cached fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fact: Fact,
    pub outcome: ProbeOutcome,
    /// Toolchain fingerprint hash
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fact: Fact, outcome: ProbeOutcome) -> Self {
        CacheEntry {
            fingerprint: fact.provenance.fingerprint.clone(),
            fact,
            outcome,
            timestamp: Utc::now(),
        }
    }

    fn from_record(record: CacheRecord) -> Self {
        CacheEntry {
            fact: record.fact,
            outcome: record.outcome,
            fingerprint: record.fingerprint,
            timestamp: record.timestamp,
        }
    }

    fn to_record(&self, key: &CacheKey) -> CacheRecord {
        CacheRecord {
            format_version: FORMAT_VERSION,
            key: key.as_str().to_string(),
            fingerprint: self.fingerprint.clone(),
            timestamp: self.timestamp,
            fact: self.fact.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// How [`FactCache::get_or_probe`] obtained its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from memory or disk.
    Hit,
    /// Computed now.
    Miss,
    /// A persisted record was unusable; computed now and rewritten.
    Corrupt(String),
}

/// In-memory fact cache with optional persistence.
#[derive(Debug, Default)]
pub struct FactCache {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    slots: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    store: Option<FactStore>,
}

impl FactCache {
    /// A cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        FactCache::default()
    }

    /// A cache backed by records under `<cache_dir>/facts`.
    pub fn persistent(cache_dir: &Path) -> Self {
        FactCache {
            store: Some(FactStore::new(cache_dir)),
            ..FactCache::default()
        }
    }

    pub fn store(&self) -> Option<&FactStore> {
        self.store.as_ref()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        match self.lookup(key) {
            Ok(entry) => entry,
            Err(_) => None,
        }
    }

    /// Insert `entry`, replacing any previous one, and persist it.
    ///
    /// A failure to persist is logged; the entry stays in memory.
    pub fn put(&self, key: &CacheKey, entry: CacheEntry) -> Arc<CacheEntry> {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&entry.to_record(key)) {
                tracing::warn!("failed to persist fact for `{}`: {:#}", entry.fact.probe(), e);
            }
        }
        let entry = Arc::new(entry);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), Arc::clone(&entry));
        entry
    }

    /// Return the entry for `key`, running `probe` to produce it on a miss.
    ///
    /// At most one `probe` runs per key at a time. Other callers for the
    /// same key block until it finishes. An `Err` from `probe` is returned
    /// to its caller and nothing is cached.
    pub fn get_or_probe<F>(&self, key: &CacheKey, probe: F) -> Result<(Arc<CacheEntry>, CacheStatus)>
    where
        F: FnOnce() -> Result<CacheEntry>,
    {
        if let Some(entry) = self.memory(key) {
            return Ok((entry, CacheStatus::Hit));
        }

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());

        let status = match self.lookup(key) {
            Ok(Some(entry)) => return Ok((entry, CacheStatus::Hit)),
            Ok(None) => CacheStatus::Miss,
            Err(corrupt) => CacheStatus::Corrupt(corrupt.reason),
        };

        let entry = probe()?;
        Ok((self.put(key, entry), status))
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn memory(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn lookup(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CorruptRecord> {
        if let Some(entry) = self.memory(key) {
            return Ok(Some(entry));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };

        match store.load(key.as_str()) {
            Ok(Some(record)) => {
                let entry = Arc::new(CacheEntry::from_record(record));
                self.entries
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.clone(), Arc::clone(&entry));
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(corrupt) => {
                tracing::warn!("{}; treating as a miss", corrupt);
                Err(corrupt)
            }
        }
    }
}
