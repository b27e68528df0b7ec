//! Type definitions held by the semantic model.
//!
//! The variant set is closed (`Entity`, `Enum`, `Select`, `Wrapper`), so
//! consumers match on [`TypeDef`] exhaustively instead of dispatching through
//! a class hierarchy. Entities refer to each other by name only; the model
//! owns every definition.

use std::fmt;

use serde::Serialize;

use crate::type_ref::TypeRef;

pub type Name = String;

/// Stable slot index of a definition inside the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Entity,
    Enum,
    Select,
    Wrapper,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TypeKind::Entity => "an entity",
            TypeKind::Enum => "an enumeration",
            TypeKind::Select => "a select",
            TypeKind::Wrapper => "a defined type",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDef {
    Entity(Entity),
    Enum(EnumType),
    Select(SelectType),
    Wrapper(WrapperType),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Entity(e) => &e.name,
            TypeDef::Enum(e) => &e.name,
            TypeDef::Select(s) => &s.name,
            TypeDef::Wrapper(w) => &w.name,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            TypeDef::Entity(_) => TypeKind::Entity,
            TypeDef::Enum(_) => TypeKind::Enum,
            TypeDef::Select(_) => TypeKind::Select,
            TypeDef::Wrapper(_) => TypeKind::Wrapper,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            TypeDef::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// A name that was referenced but has not (yet) been declared.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, TypeDef::Entity(e) if e.placeholder)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub(crate) name: Name,
    pub(crate) is_abstract: bool,
    pub(crate) parents: Vec<Name>,
    pub(crate) children: Vec<Name>,
    pub(crate) attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) placeholder: bool,
}

impl Entity {
    pub(crate) fn placeholder(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            is_abstract: false,
            parents: Vec::new(),
            children: Vec::new(),
            attributes: Vec::new(),
            placeholder: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Declared parents in `SUBTYPE OF` order.
    pub fn parents(&self) -> &[Name] {
        &self.parents
    }

    /// Immediate subtypes from the `SUPERTYPE OF (ONEOF …)` choice.
    pub fn children(&self) -> &[Name] {
        &self.children
    }

    /// Own attributes: explicit, then derived, then inverse, each in declaration order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// The single base used for inheritance: the first declared parent.
    /// Further parents are kept in [`Entity::parents`] but never followed.
    pub fn effective_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumType {
    pub(crate) name: Name,
    pub(crate) literals: Vec<Name>,
}

impl EnumType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn literals(&self) -> &[Name] {
        &self.literals
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectType {
    pub(crate) name: Name,
    pub(crate) alternatives: Vec<Name>,
}

impl SelectType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct alternatives in declaration order.
    pub fn alternatives(&self) -> &[Name] {
        &self.alternatives
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrapperType {
    pub(crate) name: Name,
    pub(crate) wrapped: TypeRef,
}

impl WrapperType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wrapped(&self) -> &TypeRef {
        &self.wrapped
    }

    pub fn is_collection(&self) -> bool {
        self.wrapped.is_collection()
    }

    pub fn rank(&self) -> u32 {
        self.wrapped.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub(crate) name: Name,
    pub(crate) ty: TypeRef,
    pub(crate) optional: bool,
    pub(crate) derived: bool,
    pub(crate) inverse: bool,
    pub(crate) hides_parent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) redeclares: Option<Name>,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn is_inverse(&self) -> bool {
        self.inverse
    }

    /// Derived through `SELF\Base.Name`: replaces the inherited `Name`.
    pub fn hides_parent_attribute(&self) -> bool {
        self.hides_parent
    }

    /// Entity named in an explicit `SELF\Base.Name` redeclaration.
    pub fn redeclares(&self) -> Option<&str> {
        self.redeclares.as_deref()
    }

    /// Occupies a constructor/record slot of its own.
    pub fn is_positional(&self) -> bool {
        !self.derived && !self.inverse && self.redeclares.is_none()
    }

    pub fn parameter_name(&self) -> String {
        parameter_name(&self.name)
    }
}

/// Lower-camel parameter name for an attribute; `Operator` becomes `op`.
pub fn parameter_name(attribute: &str) -> String {
    if attribute == "Operator" {
        return "op".to_string();
    }
    let mut chars = attribute.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: Name,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub(crate) name: Name,
    pub(crate) return_type: TypeRef,
    pub(crate) parameters: Vec<Parameter>,
}

impl FunctionSignature {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> &TypeRef {
        &self.return_type
    }

    /// One entry per declared name; `a, b : REAL` yields two parameters.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_generic(&self) -> bool {
        self.return_type.is_generic() || self.parameters.iter().any(|p| p.ty.is_generic())
    }
}
