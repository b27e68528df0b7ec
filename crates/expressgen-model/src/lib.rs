//! Expressgen semantic model.
//!
//! Turns an EXPRESS parse tree into a resolved, language-agnostic model:
//!
//! - [`builder`]: single-pass construction with lazy placeholders,
//! - [`model`]: the immutable registry and its derived queries (ancestry,
//!   positional attributes, constructor overloads, serialization order,
//!   select flattening),
//! - [`relationship`]: wiring rules synthesized from inverse declarations,
//! - [`render`]: the contract every backend implements.

pub mod builder;
pub mod config;
pub mod error;
pub mod inverse;
pub mod model;
pub mod relationship;
pub mod render;
pub mod type_ref;
pub mod types;

pub use builder::{AttributeRole, AttributeSpec, SchemaBuilder, TypeSpec};
pub use config::ModelConfig;
pub use error::{BuildError, ConfigError, Error, GraphError, LookupError};
pub use inverse::{InverseIndex, InverseLink};
pub use model::{ConstructorSignature, ModelSummary, SemanticModel, SerializedField};
pub use relationship::{
    wiring_rules, Cardinality, InstanceGraph, InstanceId, Slot, WiringAction, WiringRule,
};
pub use render::{drive, RenderError, Renderer};
pub use type_ref::{Primitive, TypeRef};
pub use types::{
    parameter_name, Attribute, Entity, EnumType, FunctionSignature, Name, Parameter, SelectType,
    TypeDef, TypeId, TypeKind, WrapperType,
};

use expressgen_dsl::express::parse_express;

/// Parse and build in one step.
pub fn compile(text: &str, config: ModelConfig) -> Result<SemanticModel, Error> {
    let schema = parse_express(text)?;
    Ok(SchemaBuilder::build(&schema, config)?)
}
