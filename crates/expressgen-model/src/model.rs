//! The resolved semantic model and its derived queries.
//!
//! A `SemanticModel` is produced only by a successful
//! [`crate::builder::SchemaBuilder::finish`] and is immutable afterwards. It
//! is `Send + Sync` and can be shared read-only by any number of renderers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::config::ModelConfig;
use crate::error::LookupError;
use crate::inverse::InverseIndex;
use crate::type_ref::TypeRef;
use crate::types::{
    Attribute, Entity, EnumType, FunctionSignature, Name, SelectType, TypeDef, TypeId, TypeKind,
    WrapperType,
};

#[derive(Debug, Clone)]
pub struct SemanticModel {
    pub(crate) schema_name: Name,
    pub(crate) config: ModelConfig,
    /// Arena in registration order; `TypeId` indexes it.
    pub(crate) types: Vec<TypeDef>,
    pub(crate) index: HashMap<Name, TypeId>,
    pub(crate) inverses: InverseIndex,
    pub(crate) functions: Vec<FunctionSignature>,
    pub(crate) function_index: HashMap<Name, usize>,
    /// alternative name → selects naming it directly.
    pub(crate) select_membership: BTreeMap<Name, Vec<Name>>,
}

/// Parameter types of one recorded constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConstructorSignature {
    pub types: Vec<TypeRef>,
}

impl ConstructorSignature {
    pub fn arity(&self) -> usize {
        self.types.len()
    }
}

/// One position of a serialized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializedField<'m> {
    Stored(&'m Attribute),
    /// Redefined by a derived attribute further down the chain; written as an
    /// opaque marker instead of a value.
    Hidden(&'m Attribute),
}

impl<'m> SerializedField<'m> {
    pub fn attribute(&self) -> &'m Attribute {
        match self {
            SerializedField::Stored(a) | SerializedField::Hidden(a) => a,
        }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, SerializedField::Hidden(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub entities: usize,
    pub placeholders: usize,
    pub enums: usize,
    pub selects: usize,
    pub wrappers: usize,
    pub inverse_links: usize,
    pub functions: usize,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entities={} placeholders={} enums={} selects={} wrappers={} inverse_links={} functions={}",
            self.entities,
            self.placeholders,
            self.enums,
            self.selects,
            self.wrappers,
            self.inverse_links,
            self.functions
        )
    }
}

impl SemanticModel {
    pub(crate) fn empty(config: ModelConfig) -> Self {
        Self {
            schema_name: Name::new(),
            config,
            types: Vec::new(),
            index: HashMap::new(),
            inverses: InverseIndex::new(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            select_membership: BTreeMap::new(),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Registry access
    // ------------------------------------------------------------------

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn by_id(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.index())
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeDef> {
        self.type_id(name).and_then(|id| self.by_id(id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&TypeDef, LookupError> {
        self.lookup(name).ok_or_else(|| LookupError::UnknownType {
            name: name.to_string(),
        })
    }

    pub fn entity(&self, name: &str) -> Result<&Entity, LookupError> {
        match self.get(name)? {
            TypeDef::Entity(e) => Ok(e),
            other => Err(wrong_kind(name, TypeKind::Entity, other)),
        }
    }

    pub fn enumeration(&self, name: &str) -> Result<&EnumType, LookupError> {
        match self.get(name)? {
            TypeDef::Enum(e) => Ok(e),
            other => Err(wrong_kind(name, TypeKind::Enum, other)),
        }
    }

    pub fn select(&self, name: &str) -> Result<&SelectType, LookupError> {
        match self.get(name)? {
            TypeDef::Select(s) => Ok(s),
            other => Err(wrong_kind(name, TypeKind::Select, other)),
        }
    }

    pub fn wrapper(&self, name: &str) -> Result<&WrapperType, LookupError> {
        match self.get(name)? {
            TypeDef::Wrapper(w) => Ok(w),
            other => Err(wrong_kind(name, TypeKind::Wrapper, other)),
        }
    }

    /// All definitions in registration order (placeholders included).
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.types.iter().filter_map(TypeDef::as_entity)
    }

    /// Every registered name in registration order; feeds backend manifests.
    pub fn names(&self) -> Vec<&str> {
        self.types.iter().map(TypeDef::name).collect()
    }

    /// Names that were referenced but never declared.
    pub fn placeholders(&self) -> Vec<&str> {
        self.types
            .iter()
            .filter(|t| t.is_placeholder())
            .map(TypeDef::name)
            .collect()
    }

    pub fn inverses(&self) -> &InverseIndex {
        &self.inverses
    }

    pub fn functions(&self) -> &[FunctionSignature] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Result<&FunctionSignature, LookupError> {
        self.function_index
            .get(name)
            .and_then(|idx| self.functions.get(*idx))
            .ok_or_else(|| LookupError::UnknownFunction {
                name: name.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Inheritance
    // ------------------------------------------------------------------

    /// Root-to-self chain following effective (first declared) parents.
    ///
    /// Parents that are not registered end the chain.
    pub fn ancestors(&self, name: &str) -> Result<Vec<&Entity>, LookupError> {
        let start = self.entity(name)?;
        let mut chain = vec![start];
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(start.name());

        while let Some(parent) = chain.last().copied().and_then(Entity::effective_parent) {
            // Cycles are rejected at build time; stop rather than loop.
            if !visited.insert(parent) {
                break;
            }
            match self.lookup(parent) {
                Some(TypeDef::Entity(e)) => chain.push(e),
                _ => break,
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// `entity` equals `ancestor` or inherits from it through effective parents.
    pub fn is_subtype_of(&self, entity: &str, ancestor: &str) -> Result<bool, LookupError> {
        Ok(self
            .ancestors(entity)?
            .iter()
            .any(|e| e.name() == ancestor))
    }

    // ------------------------------------------------------------------
    // Attribute views
    // ------------------------------------------------------------------

    /// Positional attributes of the chain, root to leaf, declaration order.
    ///
    /// Derived, inverse and redeclaring attributes never take a slot;
    /// optional ones are dropped when `include_optional` is false.
    pub fn all_attributes(
        &self,
        name: &str,
        include_optional: bool,
    ) -> Result<Vec<&Attribute>, LookupError> {
        Ok(self
            .ancestors(name)?
            .into_iter()
            .flat_map(|e| e.attributes.iter())
            .filter(|a| a.is_positional())
            .filter(|a| include_optional || !a.is_optional())
            .collect())
    }

    /// The stored attribute `attribute` as seen from `entity`: the nearest
    /// explicit declaration or redeclaration walking from `entity` to the root.
    pub fn forward_attribute(
        &self,
        entity: &str,
        attribute: &str,
    ) -> Result<Option<&Attribute>, LookupError> {
        Ok(self
            .ancestors(entity)?
            .into_iter()
            .rev()
            .flat_map(|e| e.attributes.iter())
            .find(|a| a.name == attribute && !a.is_inverse() && !a.is_derived()))
    }

    pub fn requires_second_constructor_overload(&self, name: &str) -> Result<bool, LookupError> {
        Ok(self
            .all_attributes(name, true)?
            .iter()
            .any(|a| a.is_optional()))
    }

    /// Required-only, then required+optional when the entity has any optional slot.
    pub fn constructor_overloads(&self, name: &str) -> Result<Vec<Vec<&Attribute>>, LookupError> {
        let required = self.all_attributes(name, false)?;
        if !self.requires_second_constructor_overload(name)? {
            return Ok(vec![required]);
        }
        Ok(vec![required, self.all_attributes(name, true)?])
    }

    /// Signatures recorded for deserialization dispatch.
    ///
    /// Abstract entities record none. Empty lists are not recorded, and the
    /// full list is recorded only when it differs from the required one.
    pub fn constructor_signatures(
        &self,
        name: &str,
    ) -> Result<Vec<ConstructorSignature>, LookupError> {
        if self.entity(name)?.is_abstract() {
            return Ok(Vec::new());
        }

        let signature = |attrs: Vec<&Attribute>| ConstructorSignature {
            types: attrs.into_iter().map(|a| a.ty.clone()).collect(),
        };
        let required = signature(self.all_attributes(name, false)?);
        let all = signature(self.all_attributes(name, true)?);

        let mut out = Vec::with_capacity(2);
        if !required.types.is_empty() {
            out.push(required);
        }
        if !all.types.is_empty() && out.first() != Some(&all) {
            out.push(all);
        }
        Ok(out)
    }

    /// `all_attributes(name, true)` order, with slots redefined by a derived
    /// `SELF\…` attribute lower in the chain marked hidden.
    pub fn serialization_fields(&self, name: &str) -> Result<Vec<SerializedField<'_>>, LookupError> {
        let chain = self.ancestors(name)?;
        let mut fields = Vec::new();

        for (depth, entity) in chain.iter().enumerate() {
            for attr in entity.attributes.iter().filter(|a| a.is_positional()) {
                let hidden = chain[depth + 1..].iter().any(|sub| {
                    sub.attributes
                        .iter()
                        .any(|d| d.derived && d.hides_parent && d.name == attr.name)
                });
                fields.push(if hidden {
                    SerializedField::Hidden(attr)
                } else {
                    SerializedField::Stored(attr)
                });
            }
        }

        Ok(fields)
    }

    // ------------------------------------------------------------------
    // Selects
    // ------------------------------------------------------------------

    /// Leaf alternatives of a select, nested selects expanded in place.
    ///
    /// Each leaf appears once, at its first occurrence. Names the model does
    /// not know (opaque literals) are leaves.
    pub fn flatten_select(&self, name: &str) -> Result<Vec<&str>, LookupError> {
        let root = self.select(name)?;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        visited.insert(root.name());
        self.flatten_into(root, &mut visited, &mut seen, &mut out);
        Ok(out)
    }

    fn flatten_into<'m>(
        &'m self,
        select: &'m SelectType,
        visited: &mut HashSet<&'m str>,
        seen: &mut HashSet<&'m str>,
        out: &mut Vec<&'m str>,
    ) {
        for alt in &select.alternatives {
            match self.lookup(alt) {
                Some(TypeDef::Select(nested)) => {
                    if visited.insert(nested.name()) {
                        self.flatten_into(nested, visited, seen, out);
                    }
                }
                _ => {
                    if seen.insert(alt.as_str()) {
                        out.push(alt.as_str());
                    }
                }
            }
        }
    }

    /// Selects that list `name` as a direct alternative, in registration order.
    pub fn selects_containing(&self, name: &str) -> &[Name] {
        self.select_membership
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_opaque_alternative(&self, name: &str) -> bool {
        self.config.is_opaque_alternative(name)
    }

    pub fn summary(&self) -> ModelSummary {
        let mut summary = ModelSummary {
            inverse_links: self.inverses.len(),
            functions: self.functions.len(),
            ..ModelSummary::default()
        };
        for def in &self.types {
            match def {
                TypeDef::Entity(e) if e.placeholder => summary.placeholders += 1,
                TypeDef::Entity(_) => summary.entities += 1,
                TypeDef::Enum(_) => summary.enums += 1,
                TypeDef::Select(_) => summary.selects += 1,
                TypeDef::Wrapper(_) => summary.wrappers += 1,
            }
        }
        summary
    }
}

fn wrong_kind(name: &str, expected: TypeKind, found: &TypeDef) -> LookupError {
    LookupError::WrongKind {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}
