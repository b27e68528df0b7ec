//! `OutlineRenderer`: one JSON document per rendered definition plus a manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use expressgen_dsl::digest::schema_digest_v1;
use expressgen_model::render::{EntityView, EnumView, SelectView, WrapperView};
use expressgen_model::{
    drive, FunctionSignature, Name, RenderError, Renderer, SemanticModel, SerializedField,
    TypeKind, TypeRef, WiringRule,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineOptions {
    /// Written in place of a serialized slot that a subtype redefines.
    pub hidden_marker: String,
    pub pretty: bool,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self {
            hidden_marker: "*".to_string(),
            pretty: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("failed to encode outline: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineDocument {
    pub name: Name,
    pub kind: TypeKind,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name: Name,
    pub artifact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub schema: Name,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outline {
    pub documents: Vec<OutlineDocument>,
    pub functions: Value,
    pub manifest: Manifest,
}

impl Outline {
    pub fn document(&self, name: &str) -> Option<&OutlineDocument> {
        self.documents.iter().find(|d| d.name == name)
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, OutlineError> {
        Ok(if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        })
    }
}

pub struct OutlineRenderer {
    options: OutlineOptions,
    schema: Name,
    digest: Option<String>,
    documents: Vec<OutlineDocument>,
    functions: Value,
    entries: Vec<ManifestEntry>,
}

impl OutlineRenderer {
    pub fn new(schema: impl Into<Name>, options: OutlineOptions) -> Self {
        Self {
            options,
            schema: schema.into(),
            digest: None,
            documents: Vec::new(),
            functions: Value::Array(Vec::new()),
            entries: Vec::new(),
        }
    }

    /// Record the digest of the schema text the model was built from.
    pub fn with_source(mut self, schema_text: &str) -> Self {
        self.digest = Some(schema_digest_v1(schema_text));
        self
    }

    pub fn options(&self) -> &OutlineOptions {
        &self.options
    }

    pub fn finish(self) -> Outline {
        Outline {
            documents: self.documents,
            functions: self.functions,
            manifest: Manifest {
                schema: self.schema,
                digest: self.digest,
                entries: self.entries,
            },
        }
    }

    fn push(&mut self, name: &str, kind: TypeKind, body: Value) {
        debug!(name = %name, kind = ?kind, "outline document");
        self.documents.push(OutlineDocument {
            name: name.to_string(),
            kind,
            body,
        });
    }
}

/// Render `model` into an outline; `schema_text` adds a digest to the manifest.
pub fn render_outline(
    model: &SemanticModel,
    options: OutlineOptions,
    schema_text: Option<&str>,
) -> Result<Outline, RenderError<OutlineError>> {
    let mut renderer = OutlineRenderer::new(model.schema_name(), options);
    if let Some(text) = schema_text {
        renderer = renderer.with_source(text);
    }
    drive(model, &mut renderer)?;
    Ok(renderer.finish())
}

// ----------------------------------------------------------------------------
// Document shapes
// ----------------------------------------------------------------------------

#[derive(Serialize)]
struct EntityOutline<'a> {
    name: &'a str,
    #[serde(rename = "abstract")]
    is_abstract: bool,
    base: Option<&'a str>,
    parents: &'a [Name],
    children: &'a [Name],
    properties: &'a [expressgen_model::render::PropertyView<'a>],
    constructors: Vec<Vec<String>>,
    signatures: Vec<Vec<String>>,
    wiring: &'a [WiringRule],
    record: Vec<String>,
    selects: &'a [Name],
}

#[derive(Serialize)]
struct EnumOutline<'a> {
    name: &'a str,
    literals: &'a [Name],
    selects: &'a [Name],
}

#[derive(Serialize)]
struct SelectOutline<'a> {
    name: &'a str,
    alternatives: &'a [expressgen_model::render::SelectAlternative<'a>],
    flattened: &'a [&'a str],
    selects: &'a [Name],
}

#[derive(Serialize)]
struct WrapperOutline<'a> {
    name: &'a str,
    wrapped: &'a TypeRef,
    selects: &'a [Name],
}

fn type_text(ty: &TypeRef) -> String {
    ty.to_string()
}

impl Renderer for OutlineRenderer {
    type Error = OutlineError;

    fn entity(&mut self, view: &EntityView<'_>) -> Result<(), OutlineError> {
        let record = view
            .serialized
            .iter()
            .map(|field| match field {
                SerializedField::Stored(attr) => attr.name().to_string(),
                SerializedField::Hidden(_) => self.options.hidden_marker.clone(),
            })
            .collect();

        let body = serde_json::to_value(EntityOutline {
            name: view.name(),
            is_abstract: view.entity.is_abstract(),
            base: view.base,
            parents: view.entity.parents(),
            children: view.entity.children(),
            properties: &view.properties,
            constructors: view
                .constructors
                .iter()
                .map(|ctor| ctor.iter().map(|a| a.parameter_name()).collect())
                .collect(),
            signatures: view
                .signatures
                .iter()
                .map(|sig| sig.types.iter().map(type_text).collect())
                .collect(),
            wiring: &view.wiring,
            record,
            selects: view.selects,
        })?;
        self.push(view.name(), TypeKind::Entity, body);
        Ok(())
    }

    fn enumeration(&mut self, view: &EnumView<'_>) -> Result<(), OutlineError> {
        let body = serde_json::to_value(EnumOutline {
            name: view.name,
            literals: view.literals,
            selects: view.selects,
        })?;
        self.push(view.name, TypeKind::Enum, body);
        Ok(())
    }

    fn select(&mut self, view: &SelectView<'_>) -> Result<(), OutlineError> {
        let body = serde_json::to_value(SelectOutline {
            name: view.name,
            alternatives: &view.alternatives,
            flattened: &view.flattened,
            selects: view.selects,
        })?;
        self.push(view.name, TypeKind::Select, body);
        Ok(())
    }

    fn wrapper(&mut self, view: &WrapperView<'_>) -> Result<(), OutlineError> {
        let body = serde_json::to_value(WrapperOutline {
            name: view.name,
            wrapped: view.wrapped,
            selects: view.selects,
        })?;
        self.push(view.name, TypeKind::Wrapper, body);
        Ok(())
    }

    fn functions(&mut self, functions: &[FunctionSignature]) -> Result<(), OutlineError> {
        let mut out = Vec::with_capacity(functions.len());
        for function in functions {
            let mut value = serde_json::to_value(function)?;
            if let Value::Object(map) = &mut value {
                map.insert("generic".to_string(), Value::Bool(function.is_generic()));
            }
            out.push(value);
        }
        self.functions = Value::Array(out);
        Ok(())
    }

    fn manifest(&mut self, names: &[&str]) -> Result<(), OutlineError> {
        self.entries = names
            .iter()
            .map(|name| ManifestEntry {
                name: name.to_string(),
                artifact: format!("{name}.json"),
            })
            .collect();
        Ok(())
    }
}
