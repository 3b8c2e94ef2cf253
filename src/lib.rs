//! cprobe - capability probes for C toolchains
//!
//! This crate compiles, runs and interprets small C programs against the
//! configured toolchain and turns their outcomes into typed facts that a
//! build can be configured from.

pub mod builder;
pub mod cache;
pub mod core;
pub mod ops;
pub mod util;

pub use builder::{ProbeError, ProbeSession};
pub use core::{
    fact::{Fact, FactSet, FactValue},
    manifest::Manifest,
    probe::{Probe, ProbeBuilder},
};
pub use util::context::GlobalContext;
