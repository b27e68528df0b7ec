//! EXPRESS schema surface syntax.
//!
//! This crate defines the typed parse tree the `expressgen` front end consumes
//! and a reader for the EXPRESS subset used by real-world product schemas
//! (IFC2x3, IFC4). The reader only recognizes declaration *shapes*: rule
//! bodies, `WHERE`/`UNIQUE` clauses and function bodies are skipped, and
//! nothing is resolved here. Name resolution lives in `expressgen-model`.

pub mod digest;
pub mod express;
