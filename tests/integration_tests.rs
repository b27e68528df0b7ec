//! Integration tests for the complete expressgen pipeline
//!
//! These tests run one IFC-style schema through every crate:
//! - EXPRESS text → parse tree (`expressgen-dsl`)
//! - parse tree → semantic model → instance wiring (`expressgen-model`)
//! - semantic model → outline artifacts (`expressgen-render`)
//!
//! Run with: cargo test --test integration_tests

use std::fs;

use serde_json::json;
use tempfile::tempdir;

use expressgen_dsl::digest::schema_digest_v1;
use expressgen_dsl::express::{parse_express, Declaration};
use expressgen_model::{
    wiring_rules, GraphError, InstanceGraph, ModelConfig, SchemaBuilder, SemanticModel, Slot,
    TypeKind, WiringAction,
};
use expressgen_render::{render_outline, OutlineOptions};

const MINI_IFC: &str = include_str!("fixtures/mini_ifc.exp");

fn build(config: ModelConfig) -> SemanticModel {
    let schema = parse_express(MINI_IFC).expect("fixture parses");
    SchemaBuilder::build(&schema, config).expect("fixture builds")
}

// ============================================================================
// Reading
// ============================================================================

#[test]
fn test_fixture_parse_keeps_every_declaration() {
    let schema = parse_express(MINI_IFC).expect("should parse");
    assert_eq!(schema.name, "MINI_IFC4");
    assert_eq!(schema.entities().count(), 18);
    assert_eq!(schema.types().count(), 18);
    assert_eq!(schema.functions().count(), 3);
    assert!(schema
        .declarations
        .iter()
        .any(|d| matches!(d, Declaration::Rule { name } if name == "IfcSingleProjectInstance")));

    let list = schema.entity("IfcCartesianPointList").expect("entity");
    assert_eq!(list.explicit.len(), 2);
    assert!(list.explicit[1].optional);
}

// ============================================================================
// Model
// ============================================================================

#[test]
fn test_model_summary_counts_declared_definitions() {
    let model = build(ModelConfig::default());
    let summary = model.summary();
    assert_eq!(summary.entities, 18);
    assert_eq!(summary.placeholders, 0);
    assert_eq!(summary.enums, 4);
    assert_eq!(summary.selects, 5);
    assert_eq!(summary.wrappers, 9);
    assert_eq!(summary.inverse_links, 2);
    assert_eq!(summary.functions, 3);
    assert!(model.placeholders().is_empty());
}

#[test]
fn test_forward_declared_inverse_target_is_resolved() {
    let model = build(ModelConfig::default());

    // IfcRelAggregates is first named by an INVERSE clause, declared later.
    let rel = model.entity("IfcRelAggregates").expect("declared");
    assert!(!rel.is_placeholder());
    assert_eq!(rel.effective_parent(), Some("IfcRelDecomposes"));

    let chain: Vec<&str> = model
        .ancestors("IfcRelAggregates")
        .expect("chain")
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(
        chain,
        vec!["IfcRoot", "IfcRelationship", "IfcRelDecomposes", "IfcRelAggregates"]
    );
    assert_eq!(model.inverses().links_to("IfcRelAggregates").len(), 2);
}

#[test]
fn test_constructor_overloads_walk_the_object_chain() {
    let model = build(ModelConfig::default());

    let names = |attrs: &[&expressgen_model::Attribute]| -> Vec<String> {
        attrs.iter().map(|a| a.parameter_name()).collect()
    };
    let overloads = model.constructor_overloads("IfcProduct").expect("overloads");
    assert_eq!(overloads.len(), 2);
    assert_eq!(names(&overloads[0]), vec!["globalId"]);
    assert_eq!(
        names(&overloads[1]),
        vec!["globalId", "name", "description", "objectType", "representation"]
    );

    // No optional attribute anywhere in the chain: one overload.
    let exponents = model
        .constructor_overloads("IfcDimensionalExponents")
        .expect("overloads");
    assert_eq!(exponents.len(), 1);
    assert_eq!(exponents[0].len(), 3);

    assert!(model
        .constructor_signatures("IfcObjectDefinition")
        .expect("signatures")
        .is_empty());
}

#[test]
fn test_derived_redeclaration_hides_the_parent_slot() {
    let model = build(ModelConfig::default());

    let fields = model.serialization_fields("IfcSIUnit").expect("fields");
    let layout: Vec<(&str, bool)> = fields
        .iter()
        .map(|f| (f.attribute().name(), f.is_hidden()))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("Dimensions", true),
            ("UnitType", false),
            ("Prefix", false),
            ("Name", false),
        ]
    );

    // Plain derived attributes take no slot at all.
    let point = model.serialization_fields("IfcCartesianPoint").expect("fields");
    assert_eq!(point.len(), 1);
    assert_eq!(point[0].attribute().name(), "Coordinates");
}

#[test]
fn test_nested_collections_keep_their_rank() {
    let model = build(ModelConfig::default());

    let list = model.entity("IfcCartesianPointList").expect("entity");
    let coords = list.attribute("CoordList").expect("attribute");
    assert_eq!(coords.ty().rank(), 2);
    assert_eq!(coords.ty().base(), "IfcLengthMeasure");

    let index = model.wrapper("IfcLineIndex").expect("wrapper");
    assert!(index.is_collection());
    assert_eq!(index.rank(), 1);
    assert!(!model.wrapper("IfcLabel").expect("wrapper").is_collection());
}

#[test]
fn test_selects_flatten_and_index_membership() {
    let model = build(ModelConfig::default());

    assert_eq!(
        model.flatten_select("IfcValue").expect("select"),
        vec!["IfcLengthMeasure", "IfcPositiveLengthMeasure", "IfcLabel", "IfcText"]
    );
    assert_eq!(
        model.selects_containing("IfcLengthMeasure"),
        &["IfcMeasureValue".to_string(), "IfcSimpleValue".to_string()]
    );
    assert!(model.is_opaque_alternative("IfcNullStyle"));
    assert!(!model.is_opaque_alternative("IfcCurveStyle"));
}

#[test]
fn test_generic_functions_use_the_configured_placeholder() {
    let config = ModelConfig {
        generic_placeholder: "Item".to_string(),
        ..ModelConfig::default()
    };
    let model = build(config);

    let choose = model.function("IfcBooleanChoose").expect("function");
    assert!(choose.is_generic());
    assert_eq!(choose.parameters().len(), 3);
    assert_eq!(choose.return_type().base(), "Item");

    let to_array = model.function("IfcListToArray").expect("function");
    assert_eq!(to_array.return_type().rank(), 1);
    assert!(to_array.return_type().is_generic());

    assert!(!model
        .function("IfcDimensionsForSiUnit")
        .expect("function")
        .is_generic());
}

#[test]
fn test_config_file_drives_the_build() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("expressgen.json");
    fs::write(
        &path,
        r#"{ "opaque_select_alternatives": ["IfcCurveStyle"], "strict_references": true }"#,
    )
    .expect("write config");

    let config = ModelConfig::load(&path).expect("load config");
    assert_eq!(config.generic_placeholder, "T");

    // Every referenced name is declared, so strict mode still builds.
    let model = build(config);
    assert!(model.is_opaque_alternative("IfcCurveStyle"));
    assert!(!model.is_opaque_alternative("IfcNullStyle"));
}

// ============================================================================
// Relationships
// ============================================================================

#[test]
fn test_aggregation_wires_both_inverses() {
    let model = build(ModelConfig::default());

    let rules = wiring_rules(&model, "IfcRelAggregates").expect("rules");
    let actions: Vec<(&str, WiringAction)> = rules
        .iter()
        .map(|r| (r.attribute.as_str(), r.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("RelatingObject", WiringAction::Append),
            ("RelatedObjects", WiringAction::AppendEach),
        ]
    );

    let mut graph = InstanceGraph::new(&model);
    let site = graph.create("IfcProduct").expect("site");
    let building = graph.create("IfcProduct").expect("building");
    let storey = graph.create("IfcProduct").expect("storey");

    let upper = graph
        .construct(
            "IfcRelAggregates",
            vec![
                ("RelatingObject", Slot::One(site)),
                ("RelatedObjects", Slot::Many(vec![building])),
            ],
        )
        .expect("site aggregation");
    let lower = graph
        .construct(
            "IfcRelAggregates",
            vec![
                ("RelatingObject", Slot::One(building)),
                ("RelatedObjects", Slot::Many(vec![storey])),
            ],
        )
        .expect("building aggregation");

    assert_eq!(graph.len(), 5);
    assert_eq!(
        graph.get(site, "IsDecomposedBy").expect("slot"),
        &Slot::Many(vec![upper])
    );
    assert_eq!(
        graph.get(building, "Decomposes").expect("slot"),
        &Slot::Many(vec![upper])
    );
    assert_eq!(
        graph.get(building, "IsDecomposedBy").expect("slot"),
        &Slot::Many(vec![lower])
    );
    assert!(graph.get(storey, "Decomposes").expect("slot").contains(lower));
    assert_eq!(graph.get(storey, "IsDecomposedBy").expect("slot"), &Slot::Empty);
}

#[test]
fn test_graph_rejects_abstract_and_wrong_cardinality() {
    let model = build(ModelConfig::default());
    let mut graph = InstanceGraph::new(&model);

    assert!(matches!(
        graph.create("IfcRoot"),
        Err(GraphError::AbstractEntity { .. })
    ));

    let product = graph.create("IfcProduct").expect("product");
    let rel = graph.create("IfcRelAggregates").expect("rel");
    assert!(matches!(
        graph.set(rel, "RelatingObject", Slot::Many(vec![product])),
        Err(GraphError::CardinalityMismatch { .. })
    ));
    assert!(matches!(
        graph.set(rel, "IsDecomposedBy", Slot::One(product)),
        Err(GraphError::UnknownAttribute { .. })
    ));
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_outline_covers_every_declared_definition() {
    let model = build(ModelConfig::default());
    let outline =
        render_outline(&model, OutlineOptions::default(), Some(MINI_IFC)).expect("render");

    assert_eq!(outline.manifest.schema, "MINI_IFC4");
    assert_eq!(outline.manifest.entries.len(), 36);
    assert_eq!(outline.manifest.digest, Some(schema_digest_v1(MINI_IFC)));
    assert_eq!(outline.documents.len(), outline.manifest.entries.len());

    let si = outline.document("IfcSIUnit").expect("IfcSIUnit");
    assert_eq!(si.kind, TypeKind::Entity);
    assert_eq!(si.body["record"], json!(["*", "UnitType", "Prefix", "Name"]));
    assert_eq!(
        si.body["signatures"],
        json!([
            ["IfcDimensionalExponents", "IfcUnitEnum", "IfcSIUnitName"],
            ["IfcDimensionalExponents", "IfcUnitEnum", "IfcSIPrefix", "IfcSIUnitName"]
        ])
    );

    let rel = outline.document("IfcRelAggregates").expect("IfcRelAggregates");
    assert_eq!(rel.body["wiring"][0]["counterpart_attribute"], json!("IsDecomposedBy"));
    assert_eq!(rel.body["wiring"][1]["action"], json!("append_each"));

    let style = outline
        .document("IfcPresentationStyleSelect")
        .expect("IfcPresentationStyleSelect");
    assert_eq!(style.body["alternatives"][0]["opaque"], json!(true));
    assert_eq!(style.body["alternatives"][1]["opaque"], json!(false));

    assert_eq!(outline.functions.as_array().map(Vec::len), Some(3));
}

#[test]
fn test_outline_artifacts_can_be_written_per_document() {
    let model = build(ModelConfig::default());
    let outline = render_outline(&model, OutlineOptions::default(), None).expect("render");
    assert!(outline.manifest.digest.is_none());

    let dir = tempdir().expect("tempdir");
    for (entry, document) in outline.manifest.entries.iter().zip(&outline.documents) {
        assert_eq!(entry.name, document.name);
        let text = serde_json::to_string_pretty(&document.body).expect("json");
        fs::write(dir.path().join(&entry.artifact), text).expect("write artifact");
    }

    let text = fs::read_to_string(dir.path().join("IfcCartesianPoint.json")).expect("artifact");
    let body: serde_json::Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(body["base"], json!("IfcPoint"));
    assert_eq!(body["constructors"], json!([["coordinates"]]));
    assert_eq!(body["signatures"], json!([["LIST OF IfcLengthMeasure"]]));
}
