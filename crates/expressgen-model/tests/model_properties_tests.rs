use std::collections::HashSet;

use expressgen_dsl::express::{parse_express, AttrName, EntityDecl};
use expressgen_model::{
    compile, AttributeRole, AttributeSpec, BuildError, Error, LookupError, ModelConfig,
    SchemaBuilder, SerializedField, TypeKind, TypeSpec,
};
use proptest::prelude::*;

fn model(text: &str) -> expressgen_model::SemanticModel {
    compile(text, ModelConfig::default()).expect("compile")
}

#[test]
fn forward_referenced_parent_keeps_its_slot() {
    let schema = parse_express(
        "SCHEMA S;\n\
         ENTITY IfcWall SUBTYPE OF (IfcElement); Tag : OPTIONAL STRING; END_ENTITY;\n\
         ENTITY IfcElement; Name : STRING; END_ENTITY;\n\
         END_SCHEMA;",
    )
    .expect("parse");

    let mut builder = SchemaBuilder::new(ModelConfig::default());
    builder.add_declaration(&schema.declarations[0]).expect("wall");
    let via_child = builder.lookup("IfcElement").expect("placeholder for parent");
    assert!(!builder.is_declared("IfcElement"));

    builder.add_declaration(&schema.declarations[1]).expect("element");
    assert_eq!(builder.lookup("IfcElement"), Some(via_child));

    let model = builder.finish().expect("finish");
    assert_eq!(model.type_id("IfcElement"), Some(via_child));
    let element = model.entity("IfcElement").expect("entity");
    assert!(!element.is_placeholder());
    assert_eq!(element.attributes().len(), 1);

    let chain: Vec<&str> = model
        .ancestors("IfcWall")
        .expect("ancestors")
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(chain, vec!["IfcElement", "IfcWall"]);
}

#[test]
fn only_first_parent_is_followed() {
    let m = model(
        "SCHEMA S;\n\
         ENTITY A; a : REAL; END_ENTITY;\n\
         ENTITY B; b : REAL; END_ENTITY;\n\
         ENTITY C SUBTYPE OF (A, B); c : REAL; END_ENTITY;\n\
         END_SCHEMA;",
    );
    let c = m.entity("C").expect("C");
    assert_eq!(c.parents(), &["A".to_string(), "B".to_string()]);
    assert_eq!(c.effective_parent(), Some("A"));
    let names: Vec<&str> = m
        .all_attributes("C", true)
        .expect("attrs")
        .iter()
        .map(|a| a.name())
        .collect();
    assert_eq!(names, vec!["a", "c"]);
    assert!(m.is_subtype_of("C", "A").expect("query"));
    assert!(!m.is_subtype_of("C", "B").expect("query"));
}

#[test]
fn constructor_arity_two_and_three() {
    let m = model(
        "SCHEMA S;\n\
         ENTITY WithOptional; a : REAL; b : REAL; c : OPTIONAL REAL; END_ENTITY;\n\
         ENTITY RequiredOnly; a : REAL; b : REAL; END_ENTITY;\n\
         END_SCHEMA;",
    );

    assert!(m.requires_second_constructor_overload("WithOptional").expect("flag"));
    let arities: Vec<usize> = m
        .constructor_signatures("WithOptional")
        .expect("sigs")
        .iter()
        .map(|s| s.arity())
        .collect();
    assert_eq!(arities, vec![2, 3]);
    assert_eq!(m.constructor_overloads("WithOptional").expect("ctors").len(), 2);

    assert!(!m.requires_second_constructor_overload("RequiredOnly").expect("flag"));
    let arities: Vec<usize> = m
        .constructor_signatures("RequiredOnly")
        .expect("sigs")
        .iter()
        .map(|s| s.arity())
        .collect();
    assert_eq!(arities, vec![2]);
    assert_eq!(m.constructor_overloads("RequiredOnly").expect("ctors").len(), 1);
}

#[test]
fn optional_in_ancestor_requires_second_overload() {
    let m = model(
        "SCHEMA S;\n\
         ENTITY Base ABSTRACT SUPERTYPE OF (ONEOF (Leaf)); note : OPTIONAL STRING; END_ENTITY;\n\
         ENTITY Leaf SUBTYPE OF (Base); a : REAL; END_ENTITY;\n\
         END_SCHEMA;",
    );
    assert!(m.requires_second_constructor_overload("Leaf").expect("flag"));
    assert!(m.constructor_signatures("Base").expect("sigs").is_empty());
    let sigs = m.constructor_signatures("Leaf").expect("sigs");
    assert_eq!(sigs.len(), 2);
    assert_eq!(sigs[0].types[0].base(), "REAL");
    assert_eq!(sigs[1].types[0].base(), "STRING");
    assert_eq!(m.entity("Base").expect("Base").children(), &["Leaf".to_string()]);
}

#[test]
fn derived_redefinition_hides_the_inherited_slot() {
    let m = model(
        "SCHEMA S;\n\
         ENTITY Base; Dims : INTEGER; Name : STRING; END_ENTITY;\n\
         ENTITY Derived SUBTYPE OF (Base);\n\
          DERIVE SELF\\Base.Dims : INTEGER := 3;\n\
         END_ENTITY;\n\
         END_SCHEMA;",
    );

    let base = m.serialization_fields("Base").expect("base fields");
    assert_eq!(base.len(), 2);
    assert!(base.iter().all(|f| matches!(f, SerializedField::Stored(_))));

    let derived = m.serialization_fields("Derived").expect("derived fields");
    assert_eq!(derived.len(), 2);
    assert!(derived[0].is_hidden());
    assert_eq!(derived[0].attribute().name(), "Dims");
    assert!(!derived[1].is_hidden());

    let redefinition = m
        .entity("Derived")
        .expect("Derived")
        .attribute("Dims")
        .expect("derived Dims");
    assert!(redefinition.is_derived());
    assert!(redefinition.hides_parent_attribute());
    // Derived attributes never take a positional slot.
    assert_eq!(m.all_attributes("Derived", true).expect("attrs").len(), 2);
}

#[test]
fn explicit_redeclaration_does_not_add_a_slot() {
    let m = model(
        "SCHEMA S;\n\
         ENTITY Base; Item : Thing; END_ENTITY;\n\
         ENTITY Narrow SUBTYPE OF (Base); SELF\\Base.Item : SpecialThing; END_ENTITY;\n\
         ENTITY Thing; END_ENTITY;\n\
         ENTITY SpecialThing SUBTYPE OF (Thing); END_ENTITY;\n\
         END_SCHEMA;",
    );
    let attrs = m.all_attributes("Narrow", true).expect("attrs");
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].ty().base(), "Thing");

    let narrowed = m.forward_attribute("Narrow", "Item").expect("query").expect("found");
    assert_eq!(narrowed.ty().base(), "SpecialThing");
    assert_eq!(narrowed.redeclares(), Some("Base"));
}

#[test]
fn flatten_nested_select() {
    let m = model(
        "SCHEMA S;\n\
         TYPE Outer = SELECT (X, Y); END_TYPE;\n\
         TYPE Y = SELECT (Z, W); END_TYPE;\n\
         TYPE X = REAL; END_TYPE;\n\
         TYPE Z = INTEGER; END_TYPE;\n\
         TYPE W = STRING; END_TYPE;\n\
         END_SCHEMA;",
    );
    assert_eq!(m.flatten_select("Outer").expect("flatten"), vec!["X", "Z", "W"]);
    assert_eq!(m.selects_containing("Z"), &["Y".to_string()]);
    assert_eq!(m.selects_containing("Y"), &["Outer".to_string()]);
    assert!(m.selects_containing("Outer").is_empty());
}

#[test]
fn self_referential_selects_terminate() {
    let m = model(
        "SCHEMA S;\n\
         TYPE A = SELECT (B, IfcNullStyle); END_TYPE;\n\
         TYPE B = SELECT (A, Leaf); END_TYPE;\n\
         TYPE Leaf = REAL; END_TYPE;\n\
         END_SCHEMA;",
    );
    assert_eq!(m.flatten_select("A").expect("flatten"), vec!["Leaf", "IfcNullStyle"]);
    assert!(m.is_opaque_alternative("IfcNullStyle"));
}

#[test]
fn wrapper_mirrors_wrapped_rank() {
    let m = model(
        "SCHEMA S;\n\
         TYPE Matrix = LIST [1:?] OF LIST [3:3] OF REAL; END_TYPE;\n\
         TYPE Label = STRING; END_TYPE;\n\
         END_SCHEMA;",
    );
    let matrix = m.wrapper("Matrix").expect("Matrix");
    assert!(matrix.is_collection());
    assert_eq!(matrix.rank(), 2);
    assert_eq!(matrix.wrapped().base(), "REAL");
    assert!(!m.wrapper("Label").expect("Label").is_collection());
}

#[test]
fn function_clauses_are_flattened_and_generics_flagged() {
    let m = model(
        "SCHEMA S;\n\
         FUNCTION Pick (B : BOOLEAN; Choice1, Choice2 : GENERIC : Item) : GENERIC : Item;\n\
           RETURN (Choice1);\n\
         END_FUNCTION;\n\
         FUNCTION Dot (A, B : Dir) : REAL; RETURN (0.0); END_FUNCTION;\n\
         END_SCHEMA;",
    );
    let pick = m.function("Pick").expect("Pick");
    let names: Vec<&str> = pick.parameters().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["B", "Choice1", "Choice2"]);
    assert!(pick.is_generic());
    assert_eq!(pick.return_type().base(), "T");

    let dot = m.function("Dot").expect("Dot");
    assert!(!dot.is_generic());
    assert_eq!(dot.parameters().len(), 2);
    assert_eq!(dot.parameters()[1].ty.base(), "Dir");
}

#[test]
fn invalid_attributes_fail_without_a_model() {
    let entity = EntityDecl {
        name: "Bad".to_string(),
        supertype: None,
        subtype_of: Vec::new(),
        explicit: Vec::new(),
        derived: Vec::new(),
        inverse: Vec::new(),
    };

    let mut builder = SchemaBuilder::new(ModelConfig::default());
    builder.add_entity(&entity).expect("declare");
    let err = builder
        .add_attribute(
            "Bad",
            AttributeSpec {
                name: AttrName::simple("Owner"),
                ty: TypeSpec::named("Other"),
                optional: true,
                role: AttributeRole::Inverse {
                    for_attribute: "Owned".to_string(),
                },
            },
        )
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::OptionalInverse {
            entity: "Bad".to_string(),
            attribute: "Owner".to_string()
        }
    );
    assert!(builder.finish().is_err());

    let mut builder = SchemaBuilder::new(ModelConfig::default());
    builder.add_entity(&entity).expect("declare");
    let err = builder
        .add_attribute(
            "Bad",
            AttributeSpec {
                name: AttrName::simple("Points"),
                ty: TypeSpec::collection("IfcCartesianPoint", 0),
                optional: false,
                role: AttributeRole::Explicit,
            },
        )
        .unwrap_err();
    assert!(matches!(err, BuildError::CollectionWithoutRank { .. }));
    assert!(builder.finish().is_err());
}

#[test]
fn attributes_on_placeholders_are_refused() {
    let mut builder = SchemaBuilder::new(ModelConfig::default());
    let user = EntityDecl {
        name: "User".to_string(),
        supertype: None,
        subtype_of: vec!["Base".to_string()],
        explicit: Vec::new(),
        derived: Vec::new(),
        inverse: Vec::new(),
    };
    builder.add_entity(&user).expect("declare");
    assert!(builder.lookup("Base").is_some());
    assert!(!builder.is_declared("Base"));

    let err = builder
        .add_attribute(
            "Base",
            AttributeSpec {
                name: AttrName::simple("Tag"),
                ty: TypeSpec::named("STRING"),
                optional: false,
                role: AttributeRole::Explicit,
            },
        )
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::Undeclared {
            name: "Base".to_string(),
            referenced_by: "Tag".to_string()
        }
    );
    assert!(builder.finish().is_err());
}

#[test]
fn lookups_by_renderers_are_distinct_errors() {
    let m = model("SCHEMA S; TYPE E = ENUMERATION OF (A, B); END_TYPE; END_SCHEMA;");
    assert!(matches!(
        m.all_attributes("Nope", true),
        Err(LookupError::UnknownType { .. })
    ));
    assert!(matches!(
        m.flatten_select("E"),
        Err(LookupError::WrongKind {
            expected: TypeKind::Select,
            found: TypeKind::Enum,
            ..
        })
    ));
}

#[test]
fn compile_surfaces_parse_errors() {
    let err = compile("ENTITY A; END_ENTITY;", ModelConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}

#[test]
fn compile_surfaces_build_errors() {
    let err = compile(
        "SCHEMA S; TYPE A = REAL; END_TYPE; TYPE A = INTEGER; END_TYPE; END_SCHEMA;",
        ModelConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Build(BuildError::DuplicateDeclaration { .. })
    ));
}

#[test]
fn summary_counts_kinds() {
    let m = model(
        "SCHEMA S;\n\
         TYPE L = STRING; END_TYPE;\n\
         TYPE E = ENUMERATION OF (A); END_TYPE;\n\
         TYPE U = SELECT (L, P); END_TYPE;\n\
         ENTITY P; name : L; next : Q; INVERSE prev : SET OF Q FOR target; END_ENTITY;\n\
         ENTITY Q; target : P; END_ENTITY;\n\
         FUNCTION F (x : REAL) : REAL; RETURN (x); END_FUNCTION;\n\
         RULE R FOR (P); WHERE W : TRUE; END_RULE;\n\
         END_SCHEMA;",
    );
    let summary = m.summary();
    assert_eq!(summary.entities, 2);
    assert_eq!(summary.placeholders, 0);
    assert_eq!(summary.enums, 1);
    assert_eq!(summary.selects, 1);
    assert_eq!(summary.wrappers, 1);
    assert_eq!(summary.inverse_links, 1);
    assert_eq!(summary.functions, 1);
    assert_eq!(m.names(), vec!["L", "E", "U", "P", "Q"]);
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

type EntityShape = (Option<usize>, Vec<bool>);

fn hierarchy_strategy() -> impl Strategy<Value = (Vec<EntityShape>, Vec<usize>)> {
    prop::collection::vec(
        (any::<Option<usize>>(), prop::collection::vec(any::<bool>(), 0..4)),
        1..8,
    )
    .prop_flat_map(|entities| {
        let order: Vec<usize> = (0..entities.len()).collect();
        (Just(entities), Just(order).prop_shuffle())
    })
}

fn parent_of(entities: &[EntityShape], i: usize) -> Option<usize> {
    if i == 0 {
        return None;
    }
    entities[i].0.map(|p| p % i)
}

/// Entities `E<i>` whose parent index is always smaller, declared in `order`.
fn hierarchy_text(entities: &[EntityShape], order: &[usize]) -> String {
    let mut text = String::from("SCHEMA Generated;\n");
    for &i in order {
        text.push_str(&format!("ENTITY E{i}"));
        if let Some(p) = parent_of(entities, i) {
            text.push_str(&format!(" SUBTYPE OF (E{p})"));
        }
        text.push_str(";\n");
        for (j, optional) in entities[i].1.iter().enumerate() {
            let opt = if *optional { "OPTIONAL " } else { "" };
            text.push_str(&format!("  a{i}_{j} : {opt}REAL;\n"));
        }
        text.push_str("END_ENTITY;\n");
    }
    text.push_str("END_SCHEMA;\n");
    text
}

fn select_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(0usize..10, 1..5), 1..6)
}

/// Selects `S<i>` over leaves `L0..L3` and each other (cycles allowed).
fn select_text(selects: &[Vec<usize>]) -> String {
    let n = selects.len();
    let mut text = String::from("SCHEMA Generated;\n");
    for leaf in 0..4 {
        text.push_str(&format!("TYPE L{leaf} = REAL; END_TYPE;\n"));
    }
    for (i, alts) in selects.iter().enumerate() {
        let names: Vec<String> = alts
            .iter()
            .map(|a| if a % 2 == 0 { format!("L{}", a % 4) } else { format!("S{}", a % n) })
            .collect();
        text.push_str(&format!("TYPE S{i} = SELECT ({}); END_TYPE;\n", names.join(", ")));
    }
    text.push_str("END_SCHEMA;\n");
    text
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn optional_superset_holds((entities, order) in hierarchy_strategy()) {
        let m = model(&hierarchy_text(&entities, &order));
        for i in 0..entities.len() {
            let name = format!("E{i}");
            let all = m.all_attributes(&name, true).expect("all");
            let required = m.all_attributes(&name, false).expect("required");

            prop_assert!(required.iter().all(|a| !a.is_optional()));
            let all_names: HashSet<&str> = all.iter().map(|a| a.name()).collect();
            prop_assert!(required.iter().all(|a| all_names.contains(a.name())));

            let mut expected = 0;
            let mut cursor = Some(i);
            while let Some(c) = cursor {
                expected += entities[c].1.len();
                cursor = parent_of(&entities, c);
            }
            prop_assert_eq!(all.len(), expected);

            let sigs = m.constructor_signatures(&name).expect("sigs");
            let want = usize::from(!required.is_empty())
                + usize::from(!all.is_empty() && all.len() != required.len());
            prop_assert_eq!(sigs.len(), want);
        }
    }

    #[test]
    fn ancestors_are_acyclic_and_end_at_self((entities, order) in hierarchy_strategy()) {
        let m = model(&hierarchy_text(&entities, &order));
        for i in 0..entities.len() {
            let name = format!("E{i}");
            let chain = m.ancestors(&name).expect("ancestors");
            let names: Vec<&str> = chain.iter().map(|e| e.name()).collect();
            let unique: HashSet<&str> = names.iter().copied().collect();
            prop_assert_eq!(unique.len(), names.len());
            prop_assert_eq!(names.last().copied(), Some(name.as_str()));
            prop_assert_eq!(names.iter().filter(|n| **n == name).count(), 1);
            prop_assert!(chain[0].effective_parent().is_none());
        }
    }

    #[test]
    fn flatten_yields_unique_leaves(selects in select_strategy()) {
        let m = model(&select_text(&selects));
        for i in 0..selects.len() {
            let flat = m.flatten_select(&format!("S{i}")).expect("flatten");
            let unique: HashSet<&str> = flat.iter().copied().collect();
            prop_assert_eq!(unique.len(), flat.len());
            prop_assert!(flat.iter().all(|n| n.starts_with('L')));
            prop_assert!(!flat.is_empty() || selects[i].iter().all(|a| a % 2 == 1));
        }
    }
}
