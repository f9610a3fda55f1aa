//! AppMap core library: the trace engine behind AppMap tooling.
//!
//! Traces (`*.appmap.json`) are parsed and built into an indexed call tree
//! ([`AppMap`]) with a de-duplicated code-object tree ([`ClassMap`]). From a
//! built trace the crate derives canonical forms and fingerprints, keeps an
//! on-disk index next to each trace, and builds and diffs sequence
//! diagrams.

pub mod appmap;
pub mod builder;
pub mod canonicalize;
pub mod code_object;
pub mod compare;
pub mod config;
pub mod errors;
pub mod event;
pub mod fingerprint;
pub mod models;
pub mod sequence;
pub mod sql;

#[cfg(test)]
mod test_support;

pub use appmap::AppMap;
pub use builder::{build_appmap, AppMapBuilder, PruneReport};
pub use canonicalize::{algorithms, canonicalize, Algorithm, Canonical};
pub use code_object::{ClassMap, CodeObject, CodeObjectType};
pub use config::IndexConfig;
pub use errors::{AppMapError, AppMapResult};
pub use event::{EventRef, EventType};
pub use fingerprint::{FingerprintOutcome, FingerprintQueue, Fingerprinter};
pub use sequence::{ActionFilter, DiagramDiffer, DiffOptions};
