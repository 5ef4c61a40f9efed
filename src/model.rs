//! Field & Struct Model Builder: typed fields, structs and containers.
//!
//! Validates that every array names an integer sibling as its size field, every
//! struct-shaped field names a declared struct, and every prerequisite reads a
//! sibling. Also records how each struct is used (embedded or as array element).

use crate::ast::{ContainerKind, ExpandedField, PrerequisiteDecl};
use crate::common::{ExpandedMessage, ExpandedSchema};
use crate::config::{Options, ProtocolVariant};
use crate::error::SchemaError;
use crate::format::{prefix_format, Element, Format, IntFormat};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

pub type Prerequisite = PrerequisiteDecl;

/// Typed schema for one service, ready for ordering and layout.
#[derive(Debug, Clone)]
pub struct Schema {
    pub service: String,
    pub variant: ProtocolVariant,
    pub client: Option<String>,
    pub message_id_enum: Option<String>,
    pub messages: Vec<Message>,
    pub structs: Vec<Struct>,
    structs_by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn get_struct(&self, name: &str) -> Option<&Struct> {
        self.structs_by_name.get(name).map(|&i| &self.structs[i])
    }

    pub fn get_message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    pub service: String,
    pub id: u32,
    pub containers: Vec<Container>,
}

impl Message {
    pub fn container(&self, kind: ContainerKind) -> Option<&Container> {
        self.containers.iter().find(|c| c.kind == kind)
    }
}

/// Fields of one direction of one message, in declaration order.
#[derive(Debug, Clone)]
pub struct Container {
    pub kind: ContainerKind,
    pub fields: Vec<Field>,
}

/// How a field points at other schema entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    None,
    /// Plain array; `size_field` is a sibling holding the element count.
    ArraySize { size_field: String },
    Struct { struct_type: String },
    StructArray {
        struct_type: String,
        size_field: String,
    },
}

impl Linkage {
    pub fn size_field(&self) -> Option<&str> {
        match self {
            Linkage::ArraySize { size_field } | Linkage::StructArray { size_field, .. } => {
                Some(size_field)
            }
            _ => None,
        }
    }

    pub fn struct_type(&self) -> Option<&str> {
        match self {
            Linkage::Struct { struct_type } | Linkage::StructArray { struct_type, .. } => {
                Some(struct_type)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub tag: Option<u8>,
    pub mandatory: bool,
    pub format: Format,
    pub linkage: Linkage,
    pub prerequisites: Vec<Prerequisite>,
    pub origin: Option<String>,
    /// Length prefix of strings and string-array elements.
    pub length_prefix: Option<IntFormat>,
}

impl Field {
    pub fn is_conditional(&self) -> bool {
        !self.prerequisites.is_empty()
    }

    /// Sibling fields this field needs decoded before it.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.linkage
            .size_field()
            .into_iter()
            .chain(self.prerequisites.iter().map(|p| p.sibling()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructUsage {
    /// Used as a single (inline or boxed) member somewhere.
    pub embedded: bool,
    /// Used as the element type of a struct array.
    pub array_member: bool,
}

impl StructUsage {
    pub fn is_unused(&self) -> bool {
        !self.embedded && !self.array_member
    }
}

#[derive(Debug, Clone)]
pub struct Struct {
    pub name: String,
    pub members: Vec<Field>,
    pub usage: StructUsage,
}

/// Build the typed schema from expanded declarations.
pub fn build(expanded: &ExpandedSchema, options: &Options) -> Result<Schema, SchemaError> {
    let variant = options.variant;
    if let Some(prefix) = options.string_prefix {
        if !prefix.is_length_prefix() {
            return Err(SchemaError::UnknownFormat {
                format: prefix.tag().to_string(),
                context: "string prefix option".to_string(),
            });
        }
    }
    let service = check_sections(expanded, variant)?;

    let mut structs_by_name = HashMap::new();
    for (i, s) in expanded.structs.iter().enumerate() {
        if structs_by_name.insert(s.name.clone(), i).is_some() {
            return Err(SchemaError::DuplicateDeclaration {
                kind: "struct",
                name: s.name.clone(),
                context: format!("service '{}'", service),
            });
        }
    }

    let builder = FieldBuilder {
        structs_by_name: &structs_by_name,
        options,
    };

    let mut structs = expanded
        .structs
        .iter()
        .map(|s| {
            let context = format!("struct '{}'", s.name);
            let members = builder.build_fields(&s.members, &context, Scope::Struct)?;
            Ok(Struct {
                name: s.name.clone(),
                members,
                usage: StructUsage::default(),
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let mut seen_messages = HashSet::new();
    let mut messages = Vec::with_capacity(expanded.messages.len());
    for m in &expanded.messages {
        if !seen_messages.insert(m.name.as_str()) {
            return Err(SchemaError::DuplicateDeclaration {
                kind: "message",
                name: m.name.clone(),
                context: format!("service '{}'", service),
            });
        }
        messages.push(build_message(m, &service, &builder)?);
    }

    mark_usage(&mut structs, &structs_by_name, &messages);
    debug!(
        "built schema for service '{}': {} messages, {} structs",
        service,
        messages.len(),
        structs.len()
    );

    Ok(Schema {
        service,
        variant,
        client: expanded.client.clone(),
        message_id_enum: expanded.message_id_enum.clone(),
        messages,
        structs,
        structs_by_name,
    })
}

fn check_sections(expanded: &ExpandedSchema, variant: ProtocolVariant) -> Result<String, SchemaError> {
    for section in variant.required_sections() {
        let present = match *section {
            "Service" => expanded.service.is_some(),
            "Client" => expanded.client.is_some(),
            "Message-ID-Enum" => expanded.message_id_enum.is_some(),
            _ => true,
        };
        if !present {
            return Err(SchemaError::MissingRequiredSchemaSection {
                section: section.to_string(),
                context: format!("{} protocol schema", variant),
            });
        }
    }
    Ok(expanded.service.clone().unwrap_or_default())
}

fn build_message(
    m: &ExpandedMessage,
    service: &str,
    builder: &FieldBuilder<'_>,
) -> Result<Message, SchemaError> {
    let context = format!("message '{}'", m.name);
    if m.containers.is_empty() {
        return Err(SchemaError::MissingRequiredSchemaSection {
            section: "container (request, set, response or notification)".to_string(),
            context,
        });
    }
    let containers = m
        .containers
        .iter()
        .map(|(kind, fields)| {
            let context = format!("{} {}", context, kind);
            Ok(Container {
                kind: *kind,
                fields: builder.build_fields(fields, &context, Scope::Container)?,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;
    Ok(Message {
        name: m.name.clone(),
        service: m.service.clone().unwrap_or_else(|| service.to_string()),
        id: m.id,
        containers,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Container,
    Struct,
}

struct FieldBuilder<'a> {
    structs_by_name: &'a HashMap<String, usize>,
    options: &'a Options,
}

impl FieldBuilder<'_> {
    fn build_fields(
        &self,
        decls: &[ExpandedField],
        context: &str,
        scope: Scope,
    ) -> Result<Vec<Field>, SchemaError> {
        let mut names = HashSet::new();
        let mut tags = HashSet::new();
        let tagged = scope == Scope::Container && self.options.variant == ProtocolVariant::Tlv;
        for d in decls {
            if !names.insert(d.name.as_str()) {
                return Err(SchemaError::DuplicateDeclaration {
                    kind: "field",
                    name: d.name.clone(),
                    context: context.to_string(),
                });
            }
            if tagged {
                let tag = d.tag.ok_or_else(|| SchemaError::InvalidRecord {
                    context: format!("{} / field '{}'", context, d.name),
                    reason: "TLV field without 'id' tag".to_string(),
                })?;
                if !tags.insert(tag) {
                    return Err(SchemaError::DuplicateDeclaration {
                        kind: "TLV tag",
                        name: format!("0x{:02x}", tag),
                        context: context.to_string(),
                    });
                }
            }
        }
        decls
            .iter()
            .map(|d| self.build_field(d, decls, context, scope))
            .collect()
    }

    fn build_field(
        &self,
        decl: &ExpandedField,
        siblings: &[ExpandedField],
        context: &str,
        scope: Scope,
    ) -> Result<Field, SchemaError> {
        let field_ctx = format!("{} / field '{}'", context, decl.name);
        let format = Format::lookup(&decl.format).map_err(|e| SchemaError::UnknownFormat {
            format: e.0,
            context: field_ctx.clone(),
        })?;

        if format == Format::RefStructArray && self.options.variant == ProtocolVariant::Tlv {
            return Err(SchemaError::InvalidRecord {
                context: field_ctx,
                reason: "ref-struct-array needs the fixed protocol variant".to_string(),
            });
        }

        if scope == Scope::Struct && !decl.prerequisites.is_empty() {
            return Err(SchemaError::InvalidRecord {
                context: field_ctx,
                reason: "struct members cannot carry prerequisites".to_string(),
            });
        }

        let size_field = if format.is_array() {
            Some(self.size_field(decl, siblings, context)?)
        } else {
            if let Some(name) = &decl.array_size_field {
                warn!("{}: 'array-size-field' ({}) ignored on {} field", field_ctx, name, format);
            }
            None
        };

        let struct_type = if format.is_struct_shaped() {
            match &decl.struct_type {
                Some(name) if self.structs_by_name.contains_key(name) => Some(name.clone()),
                other => {
                    return Err(SchemaError::MissingStructType {
                        field: decl.name.clone(),
                        struct_type: other.clone(),
                        context: context.to_string(),
                    })
                }
            }
        } else {
            None
        };

        let linkage = match (size_field, struct_type) {
            (Some(size_field), Some(struct_type)) => Linkage::StructArray {
                struct_type,
                size_field,
            },
            (Some(size_field), None) => Linkage::ArraySize { size_field },
            (None, Some(struct_type)) => Linkage::Struct { struct_type },
            (None, None) => Linkage::None,
        };

        for p in &decl.prerequisites {
            if !siblings.iter().any(|s| s.name == p.sibling()) {
                return Err(SchemaError::UnknownPrerequisiteField {
                    field: decl.name.clone(),
                    prerequisite: p.field.clone(),
                    context: context.to_string(),
                });
            }
        }

        let length_prefix = if matches!(format, Format::String | Format::Array(Element::String)) {
            Some(match &decl.size_prefix {
                Some(tag) => prefix_format(tag).map_err(|e| SchemaError::UnknownFormat {
                    format: e.0,
                    context: format!("{} / size-prefix-format", field_ctx),
                })?,
                None => self.options.string_prefix(),
            })
        } else {
            None
        };

        Ok(Field {
            name: decl.name.clone(),
            tag: decl.tag,
            mandatory: decl.mandatory,
            format,
            linkage,
            prerequisites: decl.prerequisites.clone(),
            origin: decl.origin.clone(),
            length_prefix,
        })
    }

    /// Struct arrays look for their size field in the enclosing container, like
    /// plain arrays; the struct's own members are never consulted.
    fn size_field(
        &self,
        decl: &ExpandedField,
        siblings: &[ExpandedField],
        context: &str,
    ) -> Result<String, SchemaError> {
        let missing = |size_field: Option<String>| SchemaError::MissingArraySizeField {
            field: decl.name.clone(),
            size_field,
            context: context.to_string(),
        };
        let name = decl.array_size_field.as_ref().ok_or_else(|| missing(None))?;
        let sibling = siblings
            .iter()
            .find(|s| &s.name == name && s.name != decl.name)
            .ok_or_else(|| missing(Some(name.clone())))?;
        match Format::lookup(&sibling.format) {
            Ok(f) if f.can_count() => Ok(name.clone()),
            _ => Err(missing(Some(name.clone()))),
        }
    }
}

fn mark_usage(structs: &mut [Struct], by_name: &HashMap<String, usize>, messages: &[Message]) {
    let mut marks: Vec<(usize, bool)> = Vec::new();
    let mut visit = |field: &Field| {
        if let Some(name) = field.linkage.struct_type() {
            if let Some(&i) = by_name.get(name) {
                marks.push((i, field.format.is_array()));
            }
        }
    };
    for m in messages {
        for c in &m.containers {
            c.fields.iter().for_each(&mut visit);
        }
    }
    for s in structs.iter() {
        s.members.iter().for_each(&mut visit);
    }
    for (i, as_array) in marks {
        if as_array {
            structs[i].usage.array_member = true;
        } else {
            structs[i].usage.embedded = true;
        }
    }
    for s in structs.iter().filter(|s| s.usage.is_unused()) {
        debug!("struct '{}' is not used by any field", s.name);
    }
}
