//! Resolved attribute, parameter and return types.

use std::fmt;

use serde::Serialize;

use expressgen_dsl::express::SimpleType;

use crate::error::BuildError;
use crate::types::Name;

/// EXPRESS simple types. A `TypeRef` whose base names one of these is not a
/// model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Primitive {
    Binary,
    Boolean,
    Integer,
    Logical,
    Number,
    Real,
    String,
}

impl Primitive {
    pub fn keyword(self) -> &'static str {
        match self {
            Primitive::Binary => "BINARY",
            Primitive::Boolean => "BOOLEAN",
            Primitive::Integer => "INTEGER",
            Primitive::Logical => "LOGICAL",
            Primitive::Number => "NUMBER",
            Primitive::Real => "REAL",
            Primitive::String => "STRING",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "BINARY" => Some(Primitive::Binary),
            "BOOLEAN" => Some(Primitive::Boolean),
            "INTEGER" => Some(Primitive::Integer),
            "LOGICAL" => Some(Primitive::Logical),
            "NUMBER" => Some(Primitive::Number),
            "REAL" => Some(Primitive::Real),
            "STRING" => Some(Primitive::String),
            _ => None,
        }
    }
}

impl From<SimpleType> for Primitive {
    fn from(ty: SimpleType) -> Self {
        match ty {
            SimpleType::Binary => Primitive::Binary,
            SimpleType::Boolean => Primitive::Boolean,
            SimpleType::Integer => Primitive::Integer,
            SimpleType::Logical => Primitive::Logical,
            SimpleType::Number => Primitive::Number,
            SimpleType::Real => Primitive::Real,
            SimpleType::String => Primitive::String,
        }
    }
}

/// `{ base, is_collection, rank, is_generic }` with `is_collection ⇔ rank ≥ 1`.
///
/// The invariant is enforced at construction, so every `TypeRef` in a model
/// is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeRef {
    base: Name,
    is_collection: bool,
    rank: u32,
    is_generic: bool,
}

impl TypeRef {
    pub fn new(
        base: impl Into<Name>,
        is_collection: bool,
        rank: u32,
        is_generic: bool,
    ) -> Result<Self, BuildError> {
        let base = base.into();
        if is_collection != (rank >= 1) {
            return Err(BuildError::InvalidTypeRef {
                base,
                is_collection,
                rank,
            });
        }
        Ok(Self {
            base,
            is_collection,
            rank,
            is_generic,
        })
    }

    /// A non-collection reference to `base`.
    pub fn named(base: impl Into<Name>) -> Self {
        Self {
            base: base.into(),
            is_collection: false,
            rank: 0,
            is_generic: false,
        }
    }

    pub fn primitive_type(primitive: Primitive) -> Self {
        Self::named(primitive.keyword())
    }

    /// A non-collection generic type parameter.
    pub fn generic(placeholder: impl Into<Name>) -> Self {
        Self {
            base: placeholder.into(),
            is_collection: false,
            rank: 0,
            is_generic: true,
        }
    }

    /// Wrap `self` in `depth` more collection levels.
    pub fn nested(self, depth: u32) -> Self {
        let rank = self.rank + depth;
        Self {
            is_collection: rank >= 1,
            rank,
            ..self
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_collection(&self) -> bool {
        self.is_collection
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn is_generic(&self) -> bool {
        self.is_generic
    }

    pub fn primitive(&self) -> Option<Primitive> {
        if self.is_generic {
            return None;
        }
        Primitive::from_keyword(&self.base)
    }

    /// The innermost element type (rank 0).
    pub fn element(&self) -> TypeRef {
        Self {
            base: self.base.clone(),
            is_collection: false,
            rank: 0,
            is_generic: self.is_generic,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.rank {
            write!(f, "LIST OF ")?;
        }
        if self.is_generic {
            write!(f, "GENERIC:")?;
        }
        write!(f, "{}", self.base)
    }
}
