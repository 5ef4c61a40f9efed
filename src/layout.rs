//! Layout Engine: byte offsets and size expressions for ordered fields.
//!
//! Walking fields in wire order, the engine keeps a running constant offset and a
//! list of symbolic terms for the variable-size fields already passed. Each field's
//! offset is `constant + Σ terms` at the moment it is reached, so it only ever
//! mentions fields placed before it.
//!
//! | Field kind | Own size | Effect on later offsets |
//! |------------|----------|-------------------------|
//! | integer, uuid, address | fixed | constant += size |
//! | string | prefix + decoded length | constant += prefix, term `len(field)` |
//! | array of fixed elements | `count × element` | term `element × count` |
//! | struct (all members fixed) | fixed | constant += size |
//! | struct (variable), string array, inline struct array | decoded | term `size(field)` |
//! | indirect struct array | `count × slot` | term `slot × count`; elements laid out apart |
//!
//! A prerequisite-gated field is laid out as if present. Because it may be absent
//! at run time, every later offset also carries an `AbsentCorrection` term for the
//! gated field's fixed bytes, and variable terms owned by an absent field count
//! as zero.

use crate::error::SchemaError;
use crate::format::{Format, IntFormat, REF_SLOT_SIZE};
use crate::model::{Field, Linkage, Prerequisite, Schema, StructUsage};
use crate::resolve::resolve_order;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One symbolic component of an offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffsetTerm {
    /// Payload bytes of the length-prefixed string `field`.
    StringLength { field: String },
    /// `element_size × decoded(count_field)` bytes of the array `field`.
    Elements {
        field: String,
        element_size: usize,
        count_field: String,
    },
    /// Bytes consumed while decoding the variable-size `field`.
    Consumed { field: String },
    /// Subtract `bytes` when the gated `field` is absent.
    AbsentCorrection { field: String, bytes: usize },
}

impl OffsetTerm {
    /// The field whose bytes this term accounts for.
    pub fn owner(&self) -> &str {
        match self {
            OffsetTerm::StringLength { field }
            | OffsetTerm::Elements { field, .. }
            | OffsetTerm::Consumed { field }
            | OffsetTerm::AbsentCorrection { field, .. } => field,
        }
    }

    /// Fields whose decoded values this term reads.
    pub fn references(&self) -> Vec<&str> {
        match self {
            OffsetTerm::Elements {
                field, count_field, ..
            } => vec![field, count_field],
            other => vec![other.owner()],
        }
    }
}

impl fmt::Display for OffsetTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetTerm::StringLength { field } => write!(f, "len({})", field),
            OffsetTerm::Elements {
                element_size,
                count_field,
                ..
            } => write!(f, "{} * {}", element_size, count_field),
            OffsetTerm::Consumed { field } => write!(f, "size({})", field),
            OffsetTerm::AbsentCorrection { field, bytes } => {
                write!(f, "({} if {} absent)", bytes, field)
            }
        }
    }
}

/// Decoded facts an offset needs to become a number.
pub trait LayoutEnv {
    fn is_present(&self, field: &str) -> bool;
    fn count(&self, field: &str) -> Option<u64>;
    fn string_length(&self, field: &str) -> Option<usize>;
    fn consumed(&self, field: &str) -> Option<usize>;
}

/// `constant + Σ terms`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Offset {
    pub constant: usize,
    pub terms: Vec<OffsetTerm>,
}

impl Offset {
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Concrete offset, or `None` when the environment lacks a needed value.
    pub fn evaluate(&self, env: &impl LayoutEnv) -> Option<usize> {
        let mut total = self.constant as i128;
        for term in &self.terms {
            let present = env.is_present(term.owner());
            total += match term {
                OffsetTerm::AbsentCorrection { bytes, .. } => {
                    if present {
                        0
                    } else {
                        -(*bytes as i128)
                    }
                }
                _ if !present => 0,
                OffsetTerm::StringLength { field } => env.string_length(field)? as i128,
                OffsetTerm::Elements {
                    element_size,
                    count_field,
                    ..
                } => (*element_size as i128).checked_mul(env.count(count_field)? as i128)?,
                OffsetTerm::Consumed { field } => env.consumed(field)? as i128,
            };
        }
        usize::try_from(total).ok()
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constant)?;
        for term in &self.terms {
            match term {
                OffsetTerm::AbsentCorrection { .. } => write!(f, " - {}", term)?,
                _ => write!(f, " + {}", term)?,
            }
        }
        Ok(())
    }
}

/// Wire size of one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SizeExpr {
    Fixed(usize),
    /// `prefix` length bytes, then the decoded length.
    LengthPrefixed { prefix: usize },
    /// `decoded(count_field)` elements of `element`.
    Repeated {
        count_field: String,
        element: Box<SizeExpr>,
    },
    /// Sum of the members of a struct with variable-size members.
    Composite { struct_type: String },
}

impl SizeExpr {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            SizeExpr::Fixed(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for SizeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeExpr::Fixed(n) => write!(f, "{}", n),
            SizeExpr::LengthPrefixed { prefix } => write!(f, "{} + len", prefix),
            SizeExpr::Repeated {
                count_field,
                element,
            } => write!(f, "{} x ({})", count_field, element),
            SizeExpr::Composite { struct_type } => write!(f, "sizeof({})", struct_type),
        }
    }
}

/// Layout of one field: identity, format, linkage, offset and size.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub tag: Option<u8>,
    pub mandatory: bool,
    pub format: Format,
    pub linkage: Linkage,
    pub prerequisites: Vec<Prerequisite>,
    pub origin: Option<String>,
    pub length_prefix: Option<IntFormat>,
    /// Header bytes (TLV type and length) immediately before `offset`.
    pub header: usize,
    /// Offset of the field's value from the container (or struct) start.
    pub offset: Offset,
    pub size: SizeExpr,
}

impl FieldLayout {
    pub fn is_conditional(&self) -> bool {
        !self.prerequisites.is_empty()
    }

    /// Element pointees are laid out apart from the container.
    pub fn is_indirect(&self) -> bool {
        self.format == Format::RefStructArray
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub name: String,
    pub members: Vec<FieldLayout>,
    /// Offset just past the last member.
    pub end: Offset,
    pub size: SizeExpr,
    pub usage: StructUsage,
}

/// Lays out containers and structs of one schema, caching struct layouts.
pub struct LayoutEngine<'a> {
    schema: &'a Schema,
    structs: HashMap<String, StructLayout>,
    in_progress: Vec<String>,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        LayoutEngine {
            schema,
            structs: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Layout of a declared struct, computing it on first use.
    pub fn struct_layout(&mut self, name: &str) -> Result<&StructLayout, SchemaError> {
        self.struct_size(name, name)?;
        self.structs
            .get(name)
            .ok_or_else(|| SchemaError::RecursiveStruct { name: name.to_string() })
    }

    /// Consume the engine, returning struct layouts in declaration order.
    pub fn into_structs(mut self) -> Vec<StructLayout> {
        self.schema
            .structs
            .iter()
            .filter_map(|s| self.structs.remove(&s.name))
            .collect()
    }

    /// Lay out fields already in wire order. `header` bytes precede every value.
    pub fn layout_fields(
        &mut self,
        ordered: &[Field],
        header: usize,
        context: &str,
    ) -> Result<(Vec<FieldLayout>, Offset), SchemaError> {
        let mut constant = 0usize;
        let mut terms: Vec<OffsetTerm> = Vec::new();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(ordered.len());

        for f in ordered {
            constant += header;
            let offset = Offset {
                constant,
                terms: terms.clone(),
            };
            let size = self.size_of(f, &placed, context)?;

            let fixed_part = match &size {
                SizeExpr::Fixed(n) => {
                    constant += n;
                    *n
                }
                SizeExpr::LengthPrefixed { prefix } => {
                    constant += prefix;
                    terms.push(OffsetTerm::StringLength {
                        field: f.name.clone(),
                    });
                    *prefix
                }
                SizeExpr::Repeated {
                    count_field,
                    element,
                } if element.fixed().is_some() => {
                    terms.push(OffsetTerm::Elements {
                        field: f.name.clone(),
                        element_size: element.fixed().unwrap_or_default(),
                        count_field: count_field.clone(),
                    });
                    0
                }
                _ => {
                    terms.push(OffsetTerm::Consumed {
                        field: f.name.clone(),
                    });
                    0
                }
            };
            if f.is_conditional() && header + fixed_part > 0 {
                terms.push(OffsetTerm::AbsentCorrection {
                    field: f.name.clone(),
                    bytes: header + fixed_part,
                });
            }
            trace!("{}: '{}' at {} size {}", context, f.name, offset, size);

            placed.insert(f.name.as_str());
            out.push(FieldLayout {
                name: f.name.clone(),
                tag: f.tag,
                mandatory: f.mandatory,
                format: f.format,
                linkage: f.linkage.clone(),
                prerequisites: f.prerequisites.clone(),
                origin: f.origin.clone(),
                length_prefix: f.length_prefix,
                header,
                offset,
                size,
            });
        }
        Ok((out, Offset { constant, terms }))
    }

    fn size_of(
        &mut self,
        f: &Field,
        placed: &HashSet<&str>,
        context: &str,
    ) -> Result<SizeExpr, SchemaError> {
        let prefix = f.length_prefix.unwrap_or(IntFormat::U32).size();
        let size = match (&f.format, &f.linkage) {
            (Format::String, _) => SizeExpr::LengthPrefixed { prefix },
            (Format::Array(element), Linkage::ArraySize { size_field }) => {
                check_placed(f, size_field, placed, context)?;
                let element = match element.size() {
                    Some(n) => SizeExpr::Fixed(n),
                    None => SizeExpr::LengthPrefixed { prefix },
                };
                SizeExpr::Repeated {
                    count_field: size_field.clone(),
                    element: Box::new(element),
                }
            }
            (Format::Struct | Format::RefStruct, Linkage::Struct { struct_type }) => {
                self.struct_size(struct_type, &f.name)?
            }
            (
                Format::StructArray,
                Linkage::StructArray {
                    struct_type,
                    size_field,
                },
            ) => {
                check_placed(f, size_field, placed, context)?;
                SizeExpr::Repeated {
                    count_field: size_field.clone(),
                    element: Box::new(self.struct_size(struct_type, &f.name)?),
                }
            }
            (
                Format::RefStructArray,
                Linkage::StructArray {
                    struct_type,
                    size_field,
                },
            ) => {
                check_placed(f, size_field, placed, context)?;
                self.struct_size(struct_type, &f.name)?;
                SizeExpr::Repeated {
                    count_field: size_field.clone(),
                    element: Box::new(SizeExpr::Fixed(REF_SLOT_SIZE)),
                }
            }
            (format, Linkage::None) if format.fixed_size() > 0 => {
                SizeExpr::Fixed(format.fixed_size())
            }
            (format, linkage) if format.is_array() => {
                return Err(SchemaError::MissingArraySizeField {
                    field: f.name.clone(),
                    size_field: linkage.size_field().map(str::to_string),
                    context: context.to_string(),
                })
            }
            (_, linkage) => {
                return Err(SchemaError::MissingStructType {
                    field: f.name.clone(),
                    struct_type: linkage.struct_type().map(str::to_string),
                    context: context.to_string(),
                })
            }
        };
        Ok(size)
    }

    fn struct_size(&mut self, name: &str, user: &str) -> Result<SizeExpr, SchemaError> {
        if let Some(layout) = self.structs.get(name) {
            return Ok(layout.size.clone());
        }
        if self.in_progress.iter().any(|n| n == name) {
            return Err(SchemaError::RecursiveStruct {
                name: name.to_string(),
            });
        }
        let schema = self.schema;
        let s = schema
            .get_struct(name)
            .ok_or_else(|| SchemaError::MissingStructType {
                field: user.to_string(),
                struct_type: Some(name.to_string()),
                context: format!("service '{}'", schema.service),
            })?;

        self.in_progress.push(name.to_string());
        let context = format!("struct '{}'", name);
        let ordered = resolve_order(&s.members, &context)?;
        let (members, end) = self.layout_fields(&ordered, 0, &context)?;
        self.in_progress.pop();

        let size = if end.is_constant() {
            SizeExpr::Fixed(end.constant)
        } else {
            SizeExpr::Composite {
                struct_type: name.to_string(),
            }
        };
        debug!("struct '{}' laid out: size {}", name, size);
        self.structs.insert(
            name.to_string(),
            StructLayout {
                name: name.to_string(),
                members,
                end,
                size: size.clone(),
                usage: s.usage,
            },
        );
        Ok(size)
    }
}

/// The resolver orders size fields first; a miss here is a broken invariant.
fn check_placed(
    f: &Field,
    size_field: &str,
    placed: &HashSet<&str>,
    context: &str,
) -> Result<(), SchemaError> {
    if placed.contains(size_field) {
        Ok(())
    } else {
        Err(SchemaError::UnresolvedSizeReference {
            field: f.name.clone(),
            size_field: size_field.to_string(),
            context: context.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Element;

    struct Env {
        absent: Vec<&'static str>,
        counts: HashMap<&'static str, u64>,
        lengths: HashMap<&'static str, usize>,
    }

    impl LayoutEnv for Env {
        fn is_present(&self, field: &str) -> bool {
            !self.absent.contains(&field)
        }
        fn count(&self, field: &str) -> Option<u64> {
            self.counts.get(field).copied()
        }
        fn string_length(&self, field: &str) -> Option<usize> {
            self.lengths.get(field).copied()
        }
        fn consumed(&self, _field: &str) -> Option<usize> {
            None
        }
    }

    fn field(name: &str, format: Format, linkage: Linkage) -> Field {
        Field {
            name: name.to_string(),
            tag: None,
            mandatory: true,
            format,
            linkage,
            prerequisites: Vec::new(),
            origin: None,
            length_prefix: matches!(format, Format::String | Format::Array(Element::String))
                .then_some(IntFormat::U32),
        }
    }

    fn empty_schema() -> Schema {
        let expanded = crate::common::ExpandedSchema {
            service: Some("Test".into()),
            ..Default::default()
        };
        crate::model::build(&expanded, &crate::config::Options::default()).unwrap()
    }

    #[test]
    fn offset_evaluation() {
        let offset = Offset {
            constant: 10,
            terms: vec![
                OffsetTerm::Elements {
                    field: "items".into(),
                    element_size: 4,
                    count_field: "n".into(),
                },
                OffsetTerm::StringLength { field: "s".into() },
                OffsetTerm::AbsentCorrection {
                    field: "g".into(),
                    bytes: 2,
                },
            ],
        };
        let mut env = Env {
            absent: vec![],
            counts: HashMap::from([("n", 3)]),
            lengths: HashMap::from([("s", 5)]),
        };
        assert_eq!(offset.evaluate(&env), Some(10 + 12 + 5));
        env.absent = vec!["g", "s"];
        assert_eq!(offset.evaluate(&env), Some(10 + 12 - 2));
        env.counts.clear();
        assert_eq!(offset.evaluate(&env), None);
        assert_eq!(offset.to_string(), "10 + 4 * n + len(s) - (2 if g absent)");
    }

    #[test]
    fn fixed_fields_accumulate_constant() {
        let schema = empty_schema();
        let mut engine = LayoutEngine::new(&schema);
        let fields = vec![
            field("a", Format::Int(IntFormat::U8), Linkage::None),
            field("b", Format::Uuid, Linkage::None),
            field("c", Format::Ipv6, Linkage::None),
        ];
        let (layouts, end) = engine.layout_fields(&fields, 0, "t").unwrap();
        let constants: Vec<_> = layouts.iter().map(|l| l.offset.constant).collect();
        assert_eq!(constants, vec![0, 1, 17]);
        assert_eq!(end, Offset { constant: 33, terms: vec![] });
    }

    #[test]
    fn tlv_headers_precede_values() {
        let schema = empty_schema();
        let mut engine = LayoutEngine::new(&schema);
        let fields = vec![
            field("a", Format::Int(IntFormat::U16), Linkage::None),
            field("b", Format::Int(IntFormat::U32), Linkage::None),
        ];
        let (layouts, end) = engine.layout_fields(&fields, 3, "t").unwrap();
        assert_eq!(layouts[0].offset.constant, 3);
        assert_eq!(layouts[1].offset.constant, 8);
        assert_eq!(end.constant, 12);
    }

    #[test]
    fn array_before_size_field_is_unresolved() {
        let schema = empty_schema();
        let mut engine = LayoutEngine::new(&schema);
        let fields = vec![
            field(
                "items",
                Format::Array(Element::Int(IntFormat::U32)),
                Linkage::ArraySize { size_field: "n".into() },
            ),
            field("n", Format::Int(IntFormat::U32), Linkage::None),
        ];
        assert!(matches!(
            engine.layout_fields(&fields, 0, "t"),
            Err(SchemaError::UnresolvedSizeReference { .. })
        ));
    }

    #[test]
    fn string_array_term_is_consumed_size() {
        let schema = empty_schema();
        let mut engine = LayoutEngine::new(&schema);
        let fields = vec![
            field("n", Format::Int(IntFormat::U8), Linkage::None),
            field(
                "names",
                Format::Array(Element::String),
                Linkage::ArraySize { size_field: "n".into() },
            ),
            field("tail", Format::Int(IntFormat::U8), Linkage::None),
        ];
        let (layouts, _) = engine.layout_fields(&fields, 0, "t").unwrap();
        assert_eq!(
            layouts[1].size,
            SizeExpr::Repeated {
                count_field: "n".into(),
                element: Box::new(SizeExpr::LengthPrefixed { prefix: 4 }),
            }
        );
        assert_eq!(
            layouts[2].offset.terms,
            vec![OffsetTerm::Consumed { field: "names".into() }]
        );
    }

    #[test]
    fn missing_struct_is_reported() {
        let schema = empty_schema();
        let mut engine = LayoutEngine::new(&schema);
        let fields = vec![field(
            "s",
            Format::Struct,
            Linkage::Struct { struct_type: "Ghost".into() },
        )];
        assert!(matches!(
            engine.layout_fields(&fields, 0, "t"),
            Err(SchemaError::MissingStructType { .. })
        ));
    }
}
