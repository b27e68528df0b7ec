//! Renderer contract.
//!
//! A backend implements [`Renderer`] once per target language. [`drive`]
//! walks the model in registration order, builds the read-only view for each
//! definition and hands it to the backend, then passes the function
//! signatures and the manifest name list. Placeholders (names referenced but
//! never declared) are not rendered.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::LookupError;
use crate::model::{ConstructorSignature, SemanticModel, SerializedField};
use crate::relationship::{wiring_rules, WiringRule};
use crate::type_ref::TypeRef;
use crate::types::{Attribute, Entity, FunctionSignature, Name, TypeDef, TypeKind};

#[derive(Debug, Error)]
pub enum RenderError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("backend failed: {0}")]
    Backend(#[source] E),
}

pub trait Renderer {
    type Error: std::error::Error + 'static;

    fn entity(&mut self, view: &EntityView<'_>) -> Result<(), Self::Error>;
    fn enumeration(&mut self, view: &EnumView<'_>) -> Result<(), Self::Error>;
    fn select(&mut self, view: &SelectView<'_>) -> Result<(), Self::Error>;
    fn wrapper(&mut self, view: &WrapperView<'_>) -> Result<(), Self::Error>;
    fn functions(&mut self, functions: &[FunctionSignature]) -> Result<(), Self::Error>;
    /// Every rendered name, in registration order.
    fn manifest(&mut self, names: &[&str]) -> Result<(), Self::Error>;
}

/// Render every declared definition, then functions, then the manifest.
pub fn drive<R: Renderer>(
    model: &SemanticModel,
    renderer: &mut R,
) -> Result<(), RenderError<R::Error>> {
    let mut rendered = Vec::new();

    for def in model.types() {
        if def.is_placeholder() {
            debug!(name = %def.name(), "skipping placeholder");
            continue;
        }
        match def {
            TypeDef::Entity(e) => {
                let view = EntityView::new(model, e.name())?;
                renderer.entity(&view).map_err(RenderError::Backend)?;
            }
            TypeDef::Enum(e) => {
                let view = EnumView::new(model, e.name())?;
                renderer.enumeration(&view).map_err(RenderError::Backend)?;
            }
            TypeDef::Select(s) => {
                let view = SelectView::new(model, s.name())?;
                renderer.select(&view).map_err(RenderError::Backend)?;
            }
            TypeDef::Wrapper(w) => {
                let view = WrapperView::new(model, w.name())?;
                renderer.wrapper(&view).map_err(RenderError::Backend)?;
            }
        }
        rendered.push(def.name());
    }

    renderer
        .functions(model.functions())
        .map_err(RenderError::Backend)?;
    renderer.manifest(&rendered).map_err(RenderError::Backend)?;
    Ok(())
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyView<'m> {
    pub name: &'m str,
    pub parameter_name: String,
    pub ty: &'m TypeRef,
    pub optional: bool,
    pub derived: bool,
    pub inverse: bool,
    pub hides_parent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeclares: Option<&'m str>,
}

impl<'m> PropertyView<'m> {
    pub fn of(attr: &'m Attribute) -> Self {
        Self {
            name: attr.name(),
            parameter_name: attr.parameter_name(),
            ty: attr.ty(),
            optional: attr.is_optional(),
            derived: attr.is_derived(),
            inverse: attr.is_inverse(),
            hides_parent: attr.hides_parent_attribute(),
            redeclares: attr.redeclares(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityView<'m> {
    pub entity: &'m Entity,
    /// Effective single base.
    pub base: Option<&'m str>,
    /// Own attributes only.
    pub properties: Vec<PropertyView<'m>>,
    /// One or two parameter lists over the whole chain.
    pub constructors: Vec<Vec<&'m Attribute>>,
    pub signatures: Vec<ConstructorSignature>,
    pub wiring: Vec<WiringRule>,
    pub serialized: Vec<SerializedField<'m>>,
    /// Selects naming this entity directly.
    pub selects: &'m [Name],
}

impl<'m> EntityView<'m> {
    pub fn new(model: &'m SemanticModel, name: &str) -> Result<Self, LookupError> {
        let entity = model.entity(name)?;
        Ok(Self {
            entity,
            base: entity.effective_parent(),
            properties: entity.attributes().iter().map(PropertyView::of).collect(),
            constructors: model.constructor_overloads(name)?,
            signatures: model.constructor_signatures(name)?,
            wiring: wiring_rules(model, name)?,
            serialized: model.serialization_fields(name)?,
            selects: model.selects_containing(name),
        })
    }

    pub fn name(&self) -> &'m str {
        self.entity.name()
    }
}

#[derive(Debug, Clone)]
pub struct EnumView<'m> {
    pub name: &'m str,
    pub literals: &'m [Name],
    pub selects: &'m [Name],
}

impl<'m> EnumView<'m> {
    pub fn new(model: &'m SemanticModel, name: &str) -> Result<Self, LookupError> {
        let enumeration = model.enumeration(name)?;
        Ok(Self {
            name: enumeration.name(),
            literals: enumeration.literals(),
            selects: model.selects_containing(name),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectAlternative<'m> {
    pub name: &'m str,
    /// `None` for names the model does not define.
    pub kind: Option<TypeKind>,
    /// Configured non-model literal; renderers special-case it.
    pub opaque: bool,
}

#[derive(Debug, Clone)]
pub struct SelectView<'m> {
    pub name: &'m str,
    pub alternatives: Vec<SelectAlternative<'m>>,
    pub flattened: Vec<&'m str>,
    pub selects: &'m [Name],
}

impl<'m> SelectView<'m> {
    pub fn new(model: &'m SemanticModel, name: &str) -> Result<Self, LookupError> {
        let select = model.select(name)?;
        let alternatives = select
            .alternatives()
            .iter()
            .map(|alt| SelectAlternative {
                name: alt.as_str(),
                kind: model.lookup(alt).map(TypeDef::kind),
                opaque: model.is_opaque_alternative(alt),
            })
            .collect();
        Ok(Self {
            name: select.name(),
            alternatives,
            flattened: model.flatten_select(name)?,
            selects: model.selects_containing(name),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WrapperView<'m> {
    pub name: &'m str,
    pub wrapped: &'m TypeRef,
    pub selects: &'m [Name],
}

impl<'m> WrapperView<'m> {
    pub fn new(model: &'m SemanticModel, name: &str) -> Result<Self, LookupError> {
        let wrapper = model.wrapper(name)?;
        Ok(Self {
            name: wrapper.name(),
            wrapped: wrapper.wrapped(),
            selects: model.selects_containing(name),
        })
    }
}
