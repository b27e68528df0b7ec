//! Error taxonomy for the model crate.
//!
//! Construction failures (`BuildError`) and renderer/model mismatches
//! (`LookupError`) are kept apart: the first means the schema is bad, the
//! second means a caller asked for something the model never registered.

use std::path::PathBuf;

use thiserror::Error;

use expressgen_dsl::express::ExpressParseError;

use crate::types::{Name, TypeKind};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("invalid type reference `{base}`: collection={is_collection} with rank {rank}")]
    InvalidTypeRef {
        base: Name,
        is_collection: bool,
        rank: u32,
    },

    #[error("{entity}.{attribute}: collection-typed attribute has rank 0")]
    CollectionWithoutRank { entity: Name, attribute: Name },

    #[error("{entity}.{attribute}: inverse attributes cannot be OPTIONAL")]
    OptionalInverse { entity: Name, attribute: Name },

    #[error("`{name}`: unsupported declaration shape ({shape})")]
    UnsupportedShape { name: Name, shape: String },

    #[error("`{name}` is declared more than once")]
    DuplicateDeclaration { name: Name },

    #[error("`{name}` is used as {expected} but declared as {found}")]
    KindMismatch {
        name: Name,
        expected: TypeKind,
        found: TypeKind,
    },

    #[error("inheritance cycle through `{entity}`")]
    InheritanceCycle { entity: Name },

    #[error("{entity}.{attribute}: inverse of `{target}.{for_attribute}` does not resolve")]
    UnresolvedInverse {
        entity: Name,
        attribute: Name,
        target: Name,
        for_attribute: Name,
    },

    #[error("`{name}` is referenced by `{referenced_by}` but never declared")]
    Undeclared { name: Name, referenced_by: Name },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("`{name}` is not registered in the model")]
    UnknownType { name: Name },

    #[error("`{name}` is {found}, not {expected}")]
    WrongKind {
        name: Name,
        expected: TypeKind,
        found: TypeKind,
    },

    #[error("function `{name}` is not registered in the model")]
    UnknownFunction { name: Name },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the in-memory instance graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("cannot instantiate abstract entity `{entity}`")]
    AbstractEntity { entity: Name },

    #[error("`{entity}` has no attribute `{attribute}`")]
    UnknownAttribute { entity: Name, attribute: Name },

    #[error("{entity}.{attribute}: value does not match the attribute's cardinality")]
    CardinalityMismatch { entity: Name, attribute: Name },

    #[error("no instance with id {id}")]
    UnknownInstance { id: usize },
}

/// Umbrella error for the one-shot [`crate::compile`] helper.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ExpressParseError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
