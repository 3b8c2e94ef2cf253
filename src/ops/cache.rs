//! Implementation of `cprobe cache`.

use std::path::PathBuf;

use anyhow::Result;

use crate::cache::store::{CacheRecord, FactStore};
use crate::util::fs::{dir_size, remove_dir_all_if_exists};
use crate::util::GlobalContext;

/// Directory holding persisted fact records.
pub fn facts_dir(ctx: &GlobalContext) -> PathBuf {
    FactStore::new(&ctx.cache_dir()).dir().to_path_buf()
}

/// Every readable cached fact, oldest first.
pub fn list(ctx: &GlobalContext) -> Result<Vec<CacheRecord>> {
    FactStore::new(&ctx.cache_dir()).list()
}

/// Bytes used by persisted facts.
pub fn size(ctx: &GlobalContext) -> u64 {
    dir_size(&facts_dir(ctx))
}

/// What `clean` removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanResult {
    pub records: usize,
    pub build_dir_removed: bool,
}

/// Drop all cached facts, and the fixture build directory with `all`.
pub fn clean(ctx: &GlobalContext, all: bool) -> Result<CleanResult> {
    let records = FactStore::new(&ctx.cache_dir()).clean()?;
    tracing::debug!("removed {} cached facts", records);

    let mut build_dir_removed = false;
    if all {
        let build_dir = ctx.build_dir();
        if build_dir.exists() {
            remove_dir_all_if_exists(&build_dir)?;
            build_dir_removed = true;
        }
    }

    Ok(CleanResult {
        records,
        build_dir_removed,
    })
}
