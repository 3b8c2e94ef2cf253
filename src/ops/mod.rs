//! High-level operations.
//!
//! This module contains the implementation of cprobe commands.

pub mod cache;
pub mod probe;

pub use probe::{
    load_manifest, open_cache, open_toolchain, run, show, toolchain_settings, ProbeDescription,
    RunOptions,
};
