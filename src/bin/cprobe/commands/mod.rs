//! Command implementations

pub mod cache;
pub mod completions;
pub mod run;
pub mod show;
pub mod toolchain;
