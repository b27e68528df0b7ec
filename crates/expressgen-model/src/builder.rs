//! Schema builder: parse tree → [`SemanticModel`].
//!
//! One pass over the declarations, tolerant of forward references. A name
//! used as a parent, child, attribute type or inverse target before it is
//! declared gets a placeholder entity slot right away; the real declaration
//! later fills the *same* slot (its kind may change), so every reference
//! taken earlier stays valid.
//!
//! Any failure poisons the builder: [`SchemaBuilder::finish`] then returns the
//! first error and no model is ever produced.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use expressgen_dsl::express::{
    AttrName, Declaration, ElementType, EntityDecl, ExpressSchema, FunctionDecl, ParamType,
    TypeBody, TypeDecl,
};

use crate::config::ModelConfig;
use crate::error::BuildError;
use crate::inverse::InverseLink;
use crate::model::SemanticModel;
use crate::type_ref::{Primitive, TypeRef};
use crate::types::{
    Attribute, Entity, EnumType, FunctionSignature, Name, Parameter, SelectType, TypeDef,
    TypeId, TypeKind, WrapperType,
};

/// Unvalidated type description handed to [`SchemaBuilder::add_attribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub base: Name,
    pub is_collection: bool,
    pub rank: u32,
    pub is_generic: bool,
}

impl TypeSpec {
    pub fn named(base: impl Into<Name>) -> Self {
        Self {
            base: base.into(),
            is_collection: false,
            rank: 0,
            is_generic: false,
        }
    }

    pub fn collection(base: impl Into<Name>, rank: u32) -> Self {
        Self {
            base: base.into(),
            is_collection: true,
            rank,
            is_generic: false,
        }
    }

    fn to_type_ref(&self) -> Result<TypeRef, BuildError> {
        TypeRef::new(
            self.base.clone(),
            self.is_collection,
            self.rank,
            self.is_generic,
        )
    }

    /// Names a schema type (as opposed to a primitive or a type parameter).
    fn is_model_reference(&self) -> bool {
        !self.is_generic && Primitive::from_keyword(&self.base).is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeRole {
    Explicit,
    Derived,
    /// Reverse view of `for_attribute` on the entity named by the type.
    Inverse { for_attribute: Name },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: AttrName,
    pub ty: TypeSpec,
    pub optional: bool,
    pub role: AttributeRole,
}

pub struct SchemaBuilder {
    model: SemanticModel,
    declared: HashSet<Name>,
    /// First referrer of every placeholder, for error reports.
    referenced_by: HashMap<Name, Name>,
    /// (name, referrer) pairs that must resolve to entities.
    entity_refs: Vec<(Name, Name)>,
    failed: Option<BuildError>,
}

impl SchemaBuilder {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            model: SemanticModel::empty(config),
            declared: HashSet::new(),
            referenced_by: HashMap::new(),
            entity_refs: Vec::new(),
            failed: None,
        }
    }

    /// Build a model from a whole parse tree.
    pub fn build(schema: &ExpressSchema, config: ModelConfig) -> Result<SemanticModel, BuildError> {
        let mut builder = Self::new(config);
        builder.add_schema(schema)?;
        builder.finish()
    }

    pub fn add_schema(&mut self, schema: &ExpressSchema) -> Result<(), BuildError> {
        self.model.schema_name = schema.name.clone();
        for decl in &schema.declarations {
            self.add_declaration(decl)?;
        }
        Ok(())
    }

    pub fn add_declaration(&mut self, decl: &Declaration) -> Result<(), BuildError> {
        match decl {
            Declaration::Type(t) => self.add_type(t).map(drop),
            Declaration::Entity(e) => self.add_entity(e).map(drop),
            Declaration::Function(f) => self.add_function(f),
            Declaration::Rule { name } => {
                warn!(rule = %name, "rule bodies are not modelled; skipping");
                Ok(())
            }
        }
    }

    pub fn add_type(&mut self, decl: &TypeDecl) -> Result<TypeId, BuildError> {
        let result = self.add_type_inner(decl);
        self.guard(result)
    }

    pub fn add_entity(&mut self, decl: &EntityDecl) -> Result<TypeId, BuildError> {
        let result = self.add_entity_inner(decl);
        self.guard(result)
    }

    pub fn add_function(&mut self, decl: &FunctionDecl) -> Result<(), BuildError> {
        let result = self.add_function_inner(decl);
        self.guard(result)
    }

    /// Attach one attribute to an already declared entity.
    ///
    /// Placeholder slots are refused with [`BuildError::Undeclared`].
    /// Rejects collection types with rank 0 and optional inverses, naming the
    /// entity and attribute.
    pub fn add_attribute(&mut self, entity: &str, spec: AttributeSpec) -> Result<(), BuildError> {
        let result = self.add_attribute_inner(entity, spec);
        self.guard(result)
    }

    /// Slot currently registered for `name`, placeholder or declared.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.model.type_id(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<TypeKind> {
        self.model.lookup(name).map(TypeDef::kind)
    }

    /// Validate the whole schema and hand out the immutable model.
    pub fn finish(mut self) -> Result<SemanticModel, BuildError> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }

        self.check_entity_references()?;
        self.check_inheritance_cycles()?;
        self.check_placeholders()?;
        self.check_inverses()?;
        self.index_select_membership();

        let summary = self.model.summary();
        info!(schema = %self.model.schema_name, %summary, "semantic model built");
        Ok(self.model)
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn add_type_inner(&mut self, decl: &TypeDecl) -> Result<TypeId, BuildError> {
        let name = decl.name.clone();
        let def = match &decl.body {
            TypeBody::Simple { ty } => TypeDef::Wrapper(WrapperType {
                name,
                wrapped: TypeRef::primitive_type((*ty).into()),
            }),
            TypeBody::Collection { ty } => {
                let spec = self.element_spec(&ElementType::Collection { ty: ty.clone() });
                TypeDef::Wrapper(WrapperType {
                    name,
                    wrapped: spec.to_type_ref()?,
                })
            }
            TypeBody::Named { name: target } => TypeDef::Wrapper(WrapperType {
                name,
                wrapped: TypeRef::named(target.clone()),
            }),
            TypeBody::Enumeration { values } => TypeDef::Enum(EnumType {
                name,
                literals: values.clone(),
            }),
            TypeBody::Select { alternatives } => TypeDef::Select(SelectType {
                name,
                alternatives: alternatives.clone(),
            }),
        };
        self.declare(def)
    }

    fn add_entity_inner(&mut self, decl: &EntityDecl) -> Result<TypeId, BuildError> {
        let (is_abstract, children) = match &decl.supertype {
            None => (false, Vec::new()),
            Some(supertype) => {
                if supertype.choice.is_none() {
                    if let Some(expr) = &supertype.expr_text {
                        warn!(
                            entity = %decl.name,
                            expression = %expr,
                            "only ONEOF supertype choices populate children; expression ignored"
                        );
                    }
                }
                (
                    supertype.is_abstract,
                    supertype.choice.clone().unwrap_or_default(),
                )
            }
        };

        let id = self.declare(TypeDef::Entity(Entity {
            name: decl.name.clone(),
            is_abstract,
            parents: decl.subtype_of.clone(),
            children: children.clone(),
            attributes: Vec::new(),
            placeholder: false,
        }))?;

        for related in children.iter().chain(decl.subtype_of.iter()) {
            self.resolve(related, &decl.name);
            self.entity_refs.push((related.clone(), decl.name.clone()));
        }

        for attr in &decl.explicit {
            let ty = self.element_spec(&attr.ty);
            for name in &attr.names {
                self.add_attribute_inner(
                    &decl.name,
                    AttributeSpec {
                        name: name.clone(),
                        ty: ty.clone(),
                        optional: attr.optional,
                        role: AttributeRole::Explicit,
                    },
                )?;
            }
        }

        for attr in &decl.derived {
            let ty = self.element_spec(&attr.ty);
            self.add_attribute_inner(
                &decl.name,
                AttributeSpec {
                    name: attr.name.clone(),
                    ty,
                    optional: false,
                    role: AttributeRole::Derived,
                },
            )?;
        }

        for attr in &decl.inverse {
            let ty = match attr.aggregate {
                Some(_) => TypeSpec::collection(attr.entity.clone(), 1),
                None => TypeSpec::named(attr.entity.clone()),
            };
            self.add_attribute_inner(
                &decl.name,
                AttributeSpec {
                    name: attr.name.clone(),
                    ty,
                    optional: false,
                    role: AttributeRole::Inverse {
                        for_attribute: attr.for_attribute.clone(),
                    },
                },
            )?;
        }

        Ok(id)
    }

    fn add_attribute_inner(&mut self, entity: &str, spec: AttributeSpec) -> Result<(), BuildError> {
        let attribute = spec.name.attribute().to_string();
        // A placeholder slot is overwritten on declaration.
        let id = match self.model.type_id(entity) {
            Some(id) if self.declared.contains(entity) => id,
            _ => {
                return Err(BuildError::Undeclared {
                    name: entity.to_string(),
                    referenced_by: attribute,
                })
            }
        };

        if spec.ty.is_collection && spec.ty.rank == 0 {
            return Err(BuildError::CollectionWithoutRank {
                entity: entity.to_string(),
                attribute,
            });
        }
        let for_attribute = match &spec.role {
            AttributeRole::Inverse { for_attribute } => Some(for_attribute.clone()),
            _ => None,
        };
        if for_attribute.is_some() && spec.optional {
            return Err(BuildError::OptionalInverse {
                entity: entity.to_string(),
                attribute,
            });
        }
        let ty = spec.ty.to_type_ref()?;

        if spec.ty.is_model_reference() {
            self.resolve(&spec.ty.base, entity);
        }

        let qualifier = spec.name.qualifier().map(str::to_string);
        let (derived, hides_parent, redeclares) = match spec.role {
            AttributeRole::Explicit => (false, false, qualifier),
            AttributeRole::Derived => (true, qualifier.is_some(), None),
            AttributeRole::Inverse { .. } => (false, false, None),
        };

        match self.model.types.get_mut(id.index()) {
            Some(TypeDef::Entity(e)) => e.attributes.push(Attribute {
                name: attribute.clone(),
                ty,
                optional: spec.optional,
                derived,
                inverse: for_attribute.is_some(),
                hides_parent,
                redeclares,
            }),
            Some(other) => {
                return Err(BuildError::KindMismatch {
                    name: entity.to_string(),
                    expected: TypeKind::Entity,
                    found: other.kind(),
                });
            }
            None => {
                return Err(BuildError::Undeclared {
                    name: entity.to_string(),
                    referenced_by: attribute,
                });
            }
        }

        if let Some(for_attribute) = for_attribute {
            debug!(
                entity = %entity,
                attribute = %attribute,
                target_entity = %spec.ty.base,
                for_attribute = %for_attribute,
                "inverse link"
            );
            self.entity_refs
                .push((spec.ty.base.clone(), entity.to_string()));
            self.model.inverses.insert(InverseLink {
                owning_entity: entity.to_string(),
                owning_attribute: attribute,
                target_entity: spec.ty.base,
                target_attribute: for_attribute,
            });
        }

        Ok(())
    }

    fn add_function_inner(&mut self, decl: &FunctionDecl) -> Result<(), BuildError> {
        if self.model.function_index.contains_key(&decl.name) {
            return Err(BuildError::DuplicateDeclaration {
                name: decl.name.clone(),
            });
        }

        let return_type = self.param_type_ref(&decl.name, &decl.return_type)?;
        let mut parameters = Vec::new();
        for clause in &decl.params {
            let ty = self.param_type_ref(&decl.name, &clause.ty)?;
            parameters.extend(clause.names.iter().map(|name| Parameter {
                name: name.clone(),
                ty: ty.clone(),
            }));
        }

        debug!(function = %decl.name, params = parameters.len(), "function");
        self.model
            .function_index
            .insert(decl.name.clone(), self.model.functions.len());
        self.model.functions.push(FunctionSignature {
            name: decl.name.clone(),
            return_type,
            parameters,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    fn declare(&mut self, def: TypeDef) -> Result<TypeId, BuildError> {
        let name = def.name().to_string();
        if !self.declared.insert(name.clone()) {
            return Err(BuildError::DuplicateDeclaration { name });
        }

        debug!(name = %name, kind = ?def.kind(), "declaration");
        match self.model.type_id(&name) {
            Some(id) => {
                self.model.types[id.index()] = def;
                Ok(id)
            }
            None => Ok(self.push(def)),
        }
    }

    /// Slot for `name`, registering a placeholder entity on first sight.
    fn resolve(&mut self, name: &str, referrer: &str) -> TypeId {
        if let Some(id) = self.model.type_id(name) {
            return id;
        }
        debug!(name = %name, referenced_by = %referrer, "placeholder");
        self.referenced_by
            .insert(name.to_string(), referrer.to_string());
        self.push(TypeDef::Entity(Entity::placeholder(name)))
    }

    fn push(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.model.types.len() as u32);
        self.model.index.insert(def.name().to_string(), id);
        self.model.types.push(def);
        id
    }

    fn guard<T>(&mut self, result: Result<T, BuildError>) -> Result<T, BuildError> {
        if let Err(err) = &result {
            if self.failed.is_none() {
                self.failed = Some(err.clone());
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn element_spec(&self, ty: &ElementType) -> TypeSpec {
        match ty {
            ElementType::Collection { ty } => {
                let mut spec = self.element_spec(&ty.element);
                spec.rank += 1;
                spec.is_collection = true;
                spec
            }
            ElementType::Simple { ty } => TypeSpec::named(ty.keyword()),
            ElementType::Named { name } => TypeSpec::named(name.clone()),
            ElementType::Generic { .. } => TypeSpec {
                is_generic: true,
                ..TypeSpec::named(self.model.config.generic_placeholder.clone())
            },
        }
    }

    fn param_type_ref(&self, function: &str, ty: &ParamType) -> Result<TypeRef, BuildError> {
        match ty {
            ParamType::Simple { ty } => Ok(TypeRef::primitive_type((*ty).into())),
            ParamType::Named { name } => Ok(TypeRef::named(name.clone())),
            ParamType::Generic { .. } => Ok(TypeRef::generic(
                self.model.config.generic_placeholder.clone(),
            )),
            ParamType::Collection { element, .. } => {
                Ok(self.param_type_ref(function, element)?.nested(1))
            }
            ParamType::Aggregate { .. } => Err(BuildError::UnsupportedShape {
                name: function.to_string(),
                shape: "AGGREGATE OF parameter type".to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Whole-schema validation
    // ------------------------------------------------------------------

    fn check_entity_references(&self) -> Result<(), BuildError> {
        for (name, _referrer) in &self.entity_refs {
            if let Some(def) = self.model.lookup(name) {
                if def.kind() != TypeKind::Entity {
                    return Err(BuildError::KindMismatch {
                        name: name.clone(),
                        expected: TypeKind::Entity,
                        found: def.kind(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_inheritance_cycles(&self) -> Result<(), BuildError> {
        for start in self.model.entities() {
            let mut visited: HashSet<&str> = HashSet::new();
            visited.insert(start.name());
            let mut current = start;
            while let Some(parent) = current.effective_parent() {
                if !visited.insert(parent) {
                    return Err(BuildError::InheritanceCycle {
                        entity: start.name().to_string(),
                    });
                }
                match self.model.lookup(parent) {
                    Some(TypeDef::Entity(e)) => current = e,
                    _ => break,
                }
            }
        }
        Ok(())
    }

    fn check_placeholders(&self) -> Result<(), BuildError> {
        for name in self.model.placeholders() {
            let referrer = self.referenced_by.get(name).cloned().unwrap_or_default();
            if self.model.config.strict_references {
                return Err(BuildError::Undeclared {
                    name: name.to_string(),
                    referenced_by: referrer,
                });
            }
            // Names match exactly; a spelling that differs only in case stays a placeholder.
            match self.declared.iter().find(|d| d.eq_ignore_ascii_case(name)) {
                Some(declared) => warn!(
                    name = %name,
                    declared_as = %declared,
                    referenced_by = %referrer,
                    "reference differs from the declaration only in case"
                ),
                None => warn!(name = %name, referenced_by = %referrer, "referenced but never declared"),
            }
        }
        Ok(())
    }

    fn check_inverses(&self) -> Result<(), BuildError> {
        for link in self.model.inverses.iter() {
            let chain = match self.model.ancestors(&link.target_entity) {
                Ok(chain) => chain,
                // Non-entity targets are reported by `check_entity_references`.
                Err(_) => continue,
            };
            let complete = chain
                .first()
                .is_some_and(|root| !root.is_placeholder() && root.effective_parent().is_none());

            let found = self
                .model
                .forward_attribute(&link.target_entity, &link.target_attribute)
                .ok()
                .flatten()
                .is_some();
            if found {
                continue;
            }
            if !complete {
                warn!(
                    entity = %link.owning_entity,
                    attribute = %link.owning_attribute,
                    target_entity = %link.target_entity,
                    "inverse target has undeclared ancestry; not validated"
                );
                continue;
            }
            return Err(BuildError::UnresolvedInverse {
                entity: link.owning_entity.clone(),
                attribute: link.owning_attribute.clone(),
                target: link.target_entity.clone(),
                for_attribute: link.target_attribute.clone(),
            });
        }
        Ok(())
    }

    fn index_select_membership(&mut self) {
        let mut membership: BTreeMap<Name, Vec<Name>> = BTreeMap::new();
        for def in &self.model.types {
            if let TypeDef::Select(select) = def {
                for alt in &select.alternatives {
                    let selects = membership.entry(alt.clone()).or_default();
                    if !selects.contains(&select.name) {
                        selects.push(select.name.clone());
                    }
                }
            }
        }
        self.model.select_membership = membership;
    }
}
