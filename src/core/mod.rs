//! Core data structures for cprobe.
//!
//! This module contains the foundational types used throughout cprobe:
//! - Probe declarations and their output grammars
//! - Facts and the fact set handed to downstream configuration
//! - Target triples
//! - The Probes.toml manifest

pub mod fact;
pub mod grammar;
pub mod manifest;
pub mod probe;
pub mod triple;

pub use fact::{Fact, FactOrigin, FactSet, FactValue, Provenance};
pub use grammar::{FieldKind, OutputGrammar};
pub use manifest::{FixtureLibrary, Manifest, MANIFEST_NAME};
pub use probe::{
    CrossCompileDefault, InconclusivePolicy, Language, Probe, ProbeBuilder, RunPolicy,
    SourcePayload,
};
pub use triple::TargetTriple;
