//! EXPRESS schema reader: `SCHEMA … END_SCHEMA;`
//!
//! The reader splits a schema into top-level declaration blocks
//! (`TYPE … END_TYPE;`, `ENTITY … END_ENTITY;`, …) and parses the *head* of
//! each block with `nom`. It recognizes the constructs the model builder
//! needs and nothing more:
//!
//! - defined types: simple, aggregate, named alias, `ENUMERATION OF`, `SELECT`,
//! - entities: `ABSTRACT`, `SUPERTYPE OF`, `SUBTYPE OF`, explicit, `DERIVE` and
//!   `INVERSE` attributes,
//! - function signatures (bodies are skipped),
//! - rule names (bodies are skipped).
//!
//! `WHERE`/`UNIQUE` clauses, `CONSTANT`, `PROCEDURE` and `SUBTYPE_CONSTRAINT`
//! blocks are accepted and dropped. Keywords are case-insensitive; identifiers
//! keep their spelling.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char as pchar, multispace0, satisfy},
    combinator::{all_consuming, map, not, opt, recognize, rest, value},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Name = String;

// ============================================================================
// Parse tree
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpressSchema {
    pub name: Name,
    pub declarations: Vec<Declaration>,
}

impl ExpressSchema {
    pub fn entities(&self) -> impl Iterator<Item = &EntityDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Entity(e) => Some(e),
            _ => None,
        })
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Type(t) => Some(t),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDecl> {
        self.entities().find(|e| e.name == name)
    }

    pub fn type_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.types().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    Type(TypeDecl),
    Entity(EntityDecl),
    Function(FunctionDecl),
    /// Rules are kept by name only; their bodies are not modelled.
    Rule {
        name: Name,
    },
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Type(t) => &t.name,
            Declaration::Entity(e) => &e.name,
            Declaration::Function(f) => &f.name,
            Declaration::Rule { name } => name,
        }
    }
}

/// `TYPE <name> = <body>;`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: Name,
    pub body: TypeBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum TypeBody {
    Simple { ty: SimpleType },
    Collection { ty: CollectionType },
    Named { name: Name },
    Enumeration { values: Vec<Name> },
    Select { alternatives: Vec<Name> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimpleType {
    Binary,
    Boolean,
    Integer,
    Logical,
    Number,
    Real,
    String,
}

impl SimpleType {
    pub fn keyword(self) -> &'static str {
        match self {
            SimpleType::Binary => "BINARY",
            SimpleType::Boolean => "BOOLEAN",
            SimpleType::Integer => "INTEGER",
            SimpleType::Logical => "LOGICAL",
            SimpleType::Number => "NUMBER",
            SimpleType::Real => "REAL",
            SimpleType::String => "STRING",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateKind {
    Array,
    List,
    Set,
    Bag,
}

impl AggregateKind {
    pub fn keyword(self) -> &'static str {
        match self {
            AggregateKind::Array => "ARRAY",
            AggregateKind::List => "LIST",
            AggregateKind::Set => "SET",
            AggregateKind::Bag => "BAG",
        }
    }
}

/// `LIST [1:?] OF [OPTIONAL] [UNIQUE] <element>`
///
/// Bounds are kept as written (whitespace removed), e.g. `"1:?"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionType {
    pub kind: AggregateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<String>,
    #[serde(default)]
    pub optional_elements: bool,
    #[serde(default)]
    pub unique: bool,
    pub element: Box<ElementType>,
}

impl CollectionType {
    /// Nesting depth: `LIST OF REAL` is 1, `LIST OF LIST OF REAL` is 2.
    pub fn rank(&self) -> u32 {
        match self.element.as_ref() {
            ElementType::Collection { ty } => 1 + ty.rank(),
            _ => 1,
        }
    }

    /// The non-aggregate element type at the bottom of the nesting.
    pub fn innermost(&self) -> &ElementType {
        match self.element.as_ref() {
            ElementType::Collection { ty } => ty.innermost(),
            other => other,
        }
    }
}

/// Attribute and defined-type element types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ElementType {
    Collection {
        ty: CollectionType,
    },
    Simple {
        ty: SimpleType,
    },
    Named {
        name: Name,
    },
    Generic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<Name>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityDecl {
    pub name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supertype: Option<SupertypeDecl>,
    #[serde(default)]
    pub subtype_of: Vec<Name>,
    #[serde(default)]
    pub explicit: Vec<ExplicitAttr>,
    #[serde(default)]
    pub derived: Vec<DerivedAttr>,
    #[serde(default)]
    pub inverse: Vec<InverseAttr>,
}

impl EntityDecl {
    pub fn is_abstract(&self) -> bool {
        self.supertype.as_ref().is_some_and(|s| s.is_abstract)
    }
}

/// `[ABSTRACT] SUPERTYPE [OF (<expr>)]`
///
/// `choice` is set when the expression starts with a `ONEOF (…)` factor, the
/// only form that lists several immediate subtypes. Other expressions are
/// preserved as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupertypeDecl {
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<Vec<Name>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr_text: Option<String>,
}

/// Attribute declarator: `Name` or a redeclaration path `SELF\Entity.Name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum AttrName {
    Simple { name: Name },
    Qualified { entity: Name, attribute: Name },
}

impl AttrName {
    pub fn simple(name: impl Into<Name>) -> Self {
        AttrName::Simple { name: name.into() }
    }

    /// The attribute name the declaration introduces or redeclares.
    pub fn attribute(&self) -> &str {
        match self {
            AttrName::Simple { name } => name,
            AttrName::Qualified { attribute, .. } => attribute,
        }
    }

    pub fn qualifier(&self) -> Option<&str> {
        match self {
            AttrName::Simple { .. } => None,
            AttrName::Qualified { entity, .. } => Some(entity),
        }
    }
}

impl std::fmt::Display for AttrName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrName::Simple { name } => write!(f, "{name}"),
            AttrName::Qualified { entity, attribute } => write!(f, "SELF\\{entity}.{attribute}"),
        }
    }
}

/// `a, b : [OPTIONAL] <type>;`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplicitAttr {
    pub names: Vec<AttrName>,
    #[serde(default)]
    pub optional: bool,
    pub ty: ElementType,
}

/// `name : <type> := <expr>;` (the expression is kept verbatim).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DerivedAttr {
    pub name: AttrName,
    pub ty: ElementType,
    pub expr: String,
}

/// `name : [SET|BAG [bounds] OF] <entity> FOR <attribute>;`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InverseAttr {
    pub name: AttrName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<InverseAggregate>,
    pub entity: Name,
    pub for_attribute: Name,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InverseAggregate {
    pub kind: AggregateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<String>,
}

/// `FUNCTION <name> (<params>) : <return type>;`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: Name,
    #[serde(default)]
    pub params: Vec<FormalParam>,
    pub return_type: ParamType,
}

/// One parameter clause; `a, b : REAL` declares two parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormalParam {
    pub names: Vec<Name>,
    pub ty: ParamType,
}

/// Parameter and return types (`all_type_sel` in ISO 10303-11).
///
/// Unlike attribute types, bounds are optional here (conformant aggregates)
/// and the `AGGREGATE` pseudo type may appear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ParamType {
    Simple {
        ty: SimpleType,
    },
    Named {
        name: Name,
    },
    Generic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<Name>,
    },
    Collection {
        kind: AggregateKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<String>,
        element: Box<ParamType>,
    },
    Aggregate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<Name>,
        element: Box<ParamType>,
    },
}

// ============================================================================
// Reader
// ============================================================================

#[derive(Debug, Error)]
pub enum ExpressParseError {
    #[error("missing `SCHEMA <name>;` header")]
    MissingSchemaHeader,

    #[error("missing `END_SCHEMA;`")]
    MissingEndSchema,

    #[error("parse error on line {line}: {message}")]
    Line { line: usize, message: String },
}

/// Parse an EXPRESS schema into a parse tree.
///
/// Only the first `SCHEMA` in the text is read.
pub fn parse_express(text: &str) -> Result<ExpressSchema, ExpressParseError> {
    let clean = strip_comments(text);
    // ASCII upper-casing keeps byte offsets aligned with `clean`.
    let upper = clean.to_ascii_uppercase();

    let start = skip_whitespace(&clean, 0);
    let header_end =
        find_statement_end(&clean, start).ok_or(ExpressParseError::MissingSchemaHeader)?;
    let name = parse_schema_header(&clean[start..header_end])
        .map_err(|_| ExpressParseError::MissingSchemaHeader)?;

    let mut declarations = Vec::new();
    let mut pos = header_end + 1;
    loop {
        pos = skip_whitespace(&clean, pos);
        if pos >= clean.len() {
            return Err(ExpressParseError::MissingEndSchema);
        }

        let line = line_at(&clean, pos);
        let word = leading_word(&upper[pos..]);
        match word {
            "END_SCHEMA" => break,
            "USE" | "REFERENCE" => {
                let end = find_statement_end(&clean, pos).ok_or_else(|| {
                    ExpressParseError::Line {
                        line,
                        message: format!("unterminated {word} clause"),
                    }
                })?;
                pos = end + 1;
                continue;
            }
            "TYPE" | "ENTITY" | "FUNCTION" | "RULE" | "PROCEDURE" | "CONSTANT"
            | "SUBTYPE_CONSTRAINT" => {}
            "" => {
                let found = clean[pos..].chars().next().unwrap_or(' ');
                return Err(ExpressParseError::Line {
                    line,
                    message: format!("unexpected character `{found}`"),
                });
            }
            other => {
                return Err(ExpressParseError::Line {
                    line,
                    message: format!("unrecognized declaration `{other}`"),
                });
            }
        }

        let end_keyword = format!("END_{word}");
        let (body_end, next) =
            find_block_end(&upper, pos, &end_keyword).ok_or_else(|| ExpressParseError::Line {
                line,
                message: format!("unterminated {word} block (expected `{end_keyword};`)"),
            })?;
        let block = clean[pos..body_end].trim();

        let parsed = match word {
            "TYPE" => parse_type_decl(block).map(|d| Some(Declaration::Type(d))),
            "ENTITY" => parse_entity_decl(block).map(|d| Some(Declaration::Entity(d))),
            "FUNCTION" => parse_function_head(block).map(|d| Some(Declaration::Function(d))),
            "RULE" => parse_rule_head(block).map(|name| Some(Declaration::Rule { name })),
            _ => Ok(None),
        };
        match parsed {
            Ok(Some(decl)) => declarations.push(decl),
            Ok(None) => {}
            Err(message) => {
                return Err(ExpressParseError::Line {
                    line,
                    message: format!("{word} `{}`: {message}", declared_name(block)),
                });
            }
        }

        pos = next;
    }

    Ok(ExpressSchema { name, declarations })
}

fn parse_schema_header(text: &str) -> Result<Name, String> {
    fn parser(input: &str) -> IResult<&str, Name> {
        let (input, _) = keyword("SCHEMA")(input)?;
        let (input, name) = ws(parse_ident)(input)?;
        // Optional schema version id: `SCHEMA IFC4 '{ 1 0 10303 … }'`.
        let (input, _) = opt(ws(delimited(
            pchar('\''),
            take_while(|c: char| c != '\''),
            pchar('\''),
        )))(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, name.to_string()))
    }

    all_consuming(parser)(text.trim())
        .map(|(_, v)| v)
        .map_err(|_| "schema header expects: `SCHEMA <Name>;`".to_string())
}

fn parse_type_decl(block: &str) -> Result<TypeDecl, String> {
    fn parser(input: &str) -> IResult<&str, TypeDecl> {
        let (input, _) = keyword("TYPE")(input)?;
        let (input, name) = ws(parse_ident)(input)?;
        let (input, _) = ws(pchar('='))(input)?;
        let (input, body) = ws(type_body)(input)?;
        let (input, _) = ws(pchar(';'))(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = opt(preceded(keyword("WHERE"), rest))(input)?;
        Ok((
            input,
            TypeDecl {
                name: name.to_string(),
                body,
            },
        ))
    }

    all_consuming(parser)(block).map(|(_, v)| v).map_err(|_| {
        "TYPE expects: `TYPE <Name> = <simple | aggregate | named | ENUMERATION OF (…) | SELECT (…)>;`"
            .to_string()
    })
}

fn parse_entity_decl(block: &str) -> Result<EntityDecl, String> {
    fn parser(input: &str) -> IResult<&str, EntityDecl> {
        let (input, _) = keyword("ENTITY")(input)?;
        let (input, name) = ws(parse_ident)(input)?;
        let (input, supertype) = opt(ws(supertype_decl))(input)?;
        let (input, subtype_of) = opt(ws(subtype_decl))(input)?;
        let (input, _) = ws(pchar(';'))(input)?;
        let (input, explicit) = many0(ws(explicit_attr))(input)?;
        let (input, derived) =
            opt(preceded(ws(keyword("DERIVE")), many1(ws(derived_attr))))(input)?;
        let (input, inverse) =
            opt(preceded(ws(keyword("INVERSE")), many1(ws(inverse_attr))))(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = opt(preceded(alt((keyword("UNIQUE"), keyword("WHERE"))), rest))(input)?;
        Ok((
            input,
            EntityDecl {
                name: name.to_string(),
                supertype,
                subtype_of: subtype_of.unwrap_or_default(),
                explicit,
                derived: derived.unwrap_or_default(),
                inverse: inverse.unwrap_or_default(),
            },
        ))
    }

    all_consuming(parser)(block).map(|(_, v)| v).map_err(|_| {
        "ENTITY expects: a head `ENTITY <Name> [ABSTRACT] [SUPERTYPE OF (…)] [SUBTYPE OF (…)];` \
         followed by explicit, DERIVE, INVERSE, UNIQUE and WHERE clauses in that order"
            .to_string()
    })
}

fn parse_function_head(block: &str) -> Result<FunctionDecl, String> {
    fn parser(input: &str) -> IResult<&str, FunctionDecl> {
        let (input, _) = keyword("FUNCTION")(input)?;
        let (input, name) = ws(parse_ident)(input)?;
        let (input, params) = opt(delimited(
            ws(pchar('(')),
            separated_list1(ws(pchar(';')), ws(formal_param)),
            ws(pchar(')')),
        ))(input)?;
        let (input, _) = ws(pchar(':'))(input)?;
        let (input, return_type) = ws(param_type)(input)?;
        let (input, _) = ws(pchar(';'))(input)?;
        Ok((
            input,
            FunctionDecl {
                name: name.to_string(),
                params: params.unwrap_or_default(),
                return_type,
            },
        ))
    }

    // The body after the head is not modelled.
    parser(block)
        .map(|(_, v)| v)
        .map_err(|_| "FUNCTION expects: `FUNCTION <Name> (<params>) : <type>;`".to_string())
}

fn parse_rule_head(block: &str) -> Result<Name, String> {
    fn parser(input: &str) -> IResult<&str, Name> {
        let (input, _) = keyword("RULE")(input)?;
        let (input, name) = ws(parse_ident)(input)?;
        Ok((input, name.to_string()))
    }

    parser(block)
        .map(|(_, v)| v)
        .map_err(|_| "RULE expects: `RULE <Name> FOR (…);`".to_string())
}

// ----------------------------------------------------------------------------
// Type grammar
// ----------------------------------------------------------------------------

fn type_body(input: &str) -> IResult<&str, TypeBody> {
    alt((
        map(enumeration_type, |values| TypeBody::Enumeration { values }),
        map(select_type, |alternatives| TypeBody::Select { alternatives }),
        map(collection_type, |ty| TypeBody::Collection { ty }),
        map(simple_type, |ty| TypeBody::Simple { ty }),
        map(parse_ident, |name: &str| TypeBody::Named {
            name: name.to_string(),
        }),
    ))(input)
}

fn enumeration_type(input: &str) -> IResult<&str, Vec<Name>> {
    let (input, _) = opt(terminated(keyword("EXTENSIBLE"), multispace0))(input)?;
    let (input, _) = keyword("ENUMERATION")(input)?;
    let (input, _) = ws(keyword("OF"))(input)?;
    name_list(input)
}

fn select_type(input: &str) -> IResult<&str, Vec<Name>> {
    let (input, _) = opt(terminated(keyword("EXTENSIBLE"), multispace0))(input)?;
    let (input, _) = keyword("SELECT")(input)?;
    name_list(input)
}

fn simple_type(input: &str) -> IResult<&str, SimpleType> {
    let (input, ty) = alt((
        value(SimpleType::Binary, keyword("BINARY")),
        value(SimpleType::Boolean, keyword("BOOLEAN")),
        value(SimpleType::Integer, keyword("INTEGER")),
        value(SimpleType::Logical, keyword("LOGICAL")),
        value(SimpleType::Number, keyword("NUMBER")),
        value(SimpleType::Real, keyword("REAL")),
        value(SimpleType::String, keyword("STRING")),
    ))(input)?;
    // Width and precision specs (`STRING(22) FIXED`, `REAL(15)`) are dropped.
    let (input, _) = opt(tuple((
        ws(pchar('(')),
        take_while(|c: char| c != ')'),
        pchar(')'),
        opt(ws(keyword("FIXED"))),
    )))(input)?;
    Ok((input, ty))
}

fn aggregate_kind(input: &str) -> IResult<&str, AggregateKind> {
    alt((
        value(AggregateKind::Array, keyword("ARRAY")),
        value(AggregateKind::List, keyword("LIST")),
        value(AggregateKind::Set, keyword("SET")),
        value(AggregateKind::Bag, keyword("BAG")),
    ))(input)
}

fn bounds(input: &str) -> IResult<&str, String> {
    map(
        delimited(ws(pchar('[')), take_while(|c: char| c != ']'), pchar(']')),
        |b: &str| b.split_whitespace().collect::<Vec<_>>().join(""),
    )(input)
}

fn collection_type(input: &str) -> IResult<&str, CollectionType> {
    let (input, kind) = aggregate_kind(input)?;
    let (input, bounds) = opt(bounds)(input)?;
    let (input, _) = ws(keyword("OF"))(input)?;
    let (input, optional_elements) = map(opt(ws(keyword("OPTIONAL"))), |o| o.is_some())(input)?;
    let (input, unique) = map(opt(ws(keyword("UNIQUE"))), |o| o.is_some())(input)?;
    let (input, element) = ws(element_type)(input)?;
    Ok((
        input,
        CollectionType {
            kind,
            bounds,
            optional_elements,
            unique,
            element: Box::new(element),
        },
    ))
}

fn element_type(input: &str) -> IResult<&str, ElementType> {
    alt((
        map(collection_type, |ty| ElementType::Collection { ty }),
        map(simple_type, |ty| ElementType::Simple { ty }),
        map(generic_type, |label| ElementType::Generic { label }),
        map(parse_ident, |name: &str| ElementType::Named {
            name: name.to_string(),
        }),
    ))(input)
}

fn generic_type(input: &str) -> IResult<&str, Option<Name>> {
    preceded(
        keyword("GENERIC"),
        opt(preceded(
            ws(pchar(':')),
            map(ws(parse_ident), |s: &str| s.to_string()),
        )),
    )(input)
}

fn param_type(input: &str) -> IResult<&str, ParamType> {
    alt((
        aggregate_param,
        collection_param,
        map(simple_type, |ty| ParamType::Simple { ty }),
        map(generic_type, |label| ParamType::Generic { label }),
        map(parse_ident, |name: &str| ParamType::Named {
            name: name.to_string(),
        }),
    ))(input)
}

fn aggregate_param(input: &str) -> IResult<&str, ParamType> {
    let (input, _) = keyword("AGGREGATE")(input)?;
    let (input, label) = opt(preceded(
        ws(pchar(':')),
        map(ws(parse_ident), |s: &str| s.to_string()),
    ))(input)?;
    let (input, _) = ws(keyword("OF"))(input)?;
    let (input, element) = ws(param_type)(input)?;
    Ok((
        input,
        ParamType::Aggregate {
            label,
            element: Box::new(element),
        },
    ))
}

fn collection_param(input: &str) -> IResult<&str, ParamType> {
    let (input, kind) = aggregate_kind(input)?;
    let (input, bounds) = opt(bounds)(input)?;
    let (input, _) = ws(keyword("OF"))(input)?;
    let (input, _) = opt(ws(keyword("OPTIONAL")))(input)?;
    let (input, _) = opt(ws(keyword("UNIQUE")))(input)?;
    let (input, element) = ws(param_type)(input)?;
    Ok((
        input,
        ParamType::Collection {
            kind,
            bounds,
            element: Box::new(element),
        },
    ))
}

fn formal_param(input: &str) -> IResult<&str, FormalParam> {
    let (input, names) =
        separated_list1(ws(pchar(',')), map(ws(parse_ident), |s: &str| s.to_string()))(input)?;
    let (input, _) = ws(pchar(':'))(input)?;
    let (input, ty) = ws(param_type)(input)?;
    Ok((input, FormalParam { names, ty }))
}

// ----------------------------------------------------------------------------
// Entity grammar
// ----------------------------------------------------------------------------

fn supertype_decl(input: &str) -> IResult<&str, SupertypeDecl> {
    let (input, is_abstract) = map(opt(keyword("ABSTRACT")), |a| a.is_some())(input)?;
    let (input, supertype) = opt(ws(keyword("SUPERTYPE")))(input)?;
    if !is_abstract && supertype.is_none() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    let (input, expr) = opt(preceded(ws(keyword("OF")), ws(balanced_parens)))(input)?;
    let expr_text = expr.map(|e| e.split_whitespace().collect::<Vec<_>>().join(" "));
    let choice = expr.and_then(oneof_choice);
    Ok((
        input,
        SupertypeDecl {
            is_abstract,
            choice,
            expr_text,
        },
    ))
}

/// The leading `ONEOF (…)` factor of a supertype expression, if any.
fn oneof_choice(expr: &str) -> Option<Vec<Name>> {
    preceded(ws(keyword("ONEOF")), name_list)(expr)
        .ok()
        .map(|(_, names)| names)
}

fn subtype_decl(input: &str) -> IResult<&str, Vec<Name>> {
    let (input, _) = keyword("SUBTYPE")(input)?;
    let (input, _) = ws(keyword("OF"))(input)?;
    name_list(input)
}

fn attr_name(input: &str) -> IResult<&str, AttrName> {
    alt((
        map(
            tuple((
                keyword("SELF"),
                ws(pchar('\\')),
                ws(parse_ident),
                ws(pchar('.')),
                ws(parse_ident),
            )),
            |(_, _, entity, _, attribute)| AttrName::Qualified {
                entity: entity.to_string(),
                attribute: attribute.to_string(),
            },
        ),
        map(parse_ident, |name: &str| AttrName::simple(name)),
    ))(input)
}

fn explicit_attr(input: &str) -> IResult<&str, ExplicitAttr> {
    let (input, names) = separated_list1(ws(pchar(',')), ws(attr_name))(input)?;
    let (input, _) = ws(pchar(':'))(input)?;
    let (input, optional) = map(opt(ws(keyword("OPTIONAL"))), |o| o.is_some())(input)?;
    let (input, ty) = ws(element_type)(input)?;
    let (input, _) = ws(pchar(';'))(input)?;
    Ok((
        input,
        ExplicitAttr {
            names,
            optional,
            ty,
        },
    ))
}

fn derived_attr(input: &str) -> IResult<&str, DerivedAttr> {
    let (input, name) = attr_name(input)?;
    let (input, _) = ws(pchar(':'))(input)?;
    let (input, ty) = ws(element_type)(input)?;
    let (input, _) = ws(tag(":="))(input)?;
    let (input, expr) = ws(expression_text)(input)?;
    let (input, _) = pchar(';')(input)?;
    Ok((
        input,
        DerivedAttr {
            name,
            ty,
            expr: expr.to_string(),
        },
    ))
}

fn inverse_attr(input: &str) -> IResult<&str, InverseAttr> {
    let (input, name) = attr_name(input)?;
    let (input, _) = ws(pchar(':'))(input)?;
    let (input, aggregate) = opt(ws(inverse_aggregate))(input)?;
    let (input, entity) = ws(parse_ident)(input)?;
    let (input, _) = ws(keyword("FOR"))(input)?;
    // `FOR Entity.attr` qualifies the attribute with its declaring entity.
    let (input, _) = opt(terminated(ws(parse_ident), ws(pchar('.'))))(input)?;
    let (input, for_attribute) = ws(parse_ident)(input)?;
    let (input, _) = ws(pchar(';'))(input)?;
    Ok((
        input,
        InverseAttr {
            name,
            aggregate,
            entity: entity.to_string(),
            for_attribute: for_attribute.to_string(),
        },
    ))
}

fn inverse_aggregate(input: &str) -> IResult<&str, InverseAggregate> {
    let (input, kind) = alt((
        value(AggregateKind::Set, keyword("SET")),
        value(AggregateKind::Bag, keyword("BAG")),
    ))(input)?;
    let (input, bounds) = opt(bounds)(input)?;
    let (input, _) = ws(keyword("OF"))(input)?;
    Ok((input, InverseAggregate { kind, bounds }))
}

// ----------------------------------------------------------------------------
// Lexical helpers
// ----------------------------------------------------------------------------

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(multispace0, inner)
}

/// Case-insensitive keyword that is not the prefix of a longer identifier.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_continue)))
}

fn name_list(input: &str) -> IResult<&str, Vec<Name>> {
    delimited(
        ws(pchar('(')),
        separated_list1(ws(pchar(',')), map(ws(parse_ident), |s: &str| s.to_string())),
        ws(pchar(')')),
    )(input)
}

fn balanced_parens(input: &str) -> IResult<&str, &str> {
    let mut depth = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[idx + 1..], &input[1..idx]));
                }
            }
            _ if depth == 0 => break,
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// Expression text up to the terminating `;` (outside strings and brackets).
fn expression_text(input: &str) -> IResult<&str, &str> {
    let mut depth = 0i32;
    let mut in_string = false;
    for (idx, ch) in input.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            _ if in_string => {}
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ';' if depth <= 0 => return Ok((&input[idx..], input[..idx].trim_end())),
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    )))(input)
}

/// Replace `(* … *)` remarks (which nest) and `-- …` tail remarks with
/// whitespace, keeping newlines so line numbers stay correct.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut in_tail_remark = false;

    while let Some(c) = chars.next() {
        if in_tail_remark {
            if c == '\n' {
                in_tail_remark = false;
                out.push('\n');
            }
            continue;
        }
        if depth > 0 {
            if c == '(' && chars.peek() == Some(&'*') {
                chars.next();
                depth += 1;
            } else if c == '*' && chars.peek() == Some(&')') {
                chars.next();
                depth -= 1;
            } else if c == '\n' {
                out.push('\n');
            }
            continue;
        }
        if in_string {
            if c == '\'' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                out.push(c);
            }
            '(' if chars.peek() == Some(&'*') => {
                chars.next();
                depth = 1;
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                in_tail_remark = true;
            }
            _ => out.push(c),
        }
    }

    out
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    text[from.min(text.len())..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(idx, _)| from + idx)
}

fn leading_word(text: &str) -> &str {
    let end = text
        .find(|c: char| !is_ident_continue(c))
        .unwrap_or(text.len());
    &text[..end]
}

fn line_at(text: &str, pos: usize) -> usize {
    text.as_bytes()[..pos].iter().filter(|b| **b == b'\n').count() + 1
}

/// Byte offset of the next `;` outside string literals.
fn find_statement_end(text: &str, from: usize) -> Option<usize> {
    let mut in_string = false;
    for (idx, ch) in text[from..].char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            ';' if !in_string => return Some(from + idx),
            _ => {}
        }
    }
    None
}

/// Locate `<end_keyword> ;` at a word boundary. Returns the offset where the
/// keyword starts and the offset just past its `;`.
fn find_block_end(upper: &str, from: usize, end_keyword: &str) -> Option<(usize, usize)> {
    let mut search = from;
    while let Some(rel) = upper[search..].find(end_keyword) {
        let at = search + rel;
        let end = at + end_keyword.len();
        let before_ok = upper[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_continue(c));
        let after_ok = upper[end..]
            .chars()
            .next()
            .map_or(true, |c| !is_ident_continue(c));
        if before_ok && after_ok {
            let semi = find_statement_end(upper, end)?;
            return Some((at, semi + 1));
        }
        search = end;
    }
    None
}

fn declared_name(block: &str) -> &str {
    block
        .split_whitespace()
        .nth(1)
        .map(leading_word)
        .filter(|s| !s.is_empty())
        .unwrap_or("?")
}
