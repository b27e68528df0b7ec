//! Reference backend: a JSON outline of every rendered contract.
//!
//! The outline carries exactly what a source-emitting backend must
//! reproduce (base type, properties, constructor overloads, recorded
//! signatures, wiring, serialized record layout, select membership) without
//! committing to any target language. It is also what the workspace tests
//! use to pin the contract down.

pub mod outline;

pub use outline::{
    render_outline, Manifest, ManifestEntry, Outline, OutlineDocument, OutlineError,
    OutlineOptions, OutlineRenderer,
};
