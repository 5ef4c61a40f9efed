//! Parse schema data files into raw declarations.
//!
//! Two steps: the PEST grammar blanks out comments and trailing commas, then
//! `serde_json` reads the records (`Service`, `Message`, `Struct`, ...) and the
//! `build_*` functions turn them into a [`SchemaDecl`].

use crate::ast::*;
use crate::error::SchemaError;
use pest::Parser;
use pest_derive::Parser as PestParser;
use serde::Deserialize;
use serde_json::Value as Json;

#[derive(PestParser)]
#[grammar = "schema.pest"]
struct SchemaParser;

/// Parse schema source into declarations.
pub fn parse(source: &str) -> Result<SchemaDecl, SchemaError> {
    let json = strip_extensions(source)?;
    if json.trim().is_empty() {
        return Ok(SchemaDecl::default());
    }
    let records: Vec<Json> =
        serde_json::from_str(&json).map_err(|e| SchemaError::Parse(e.to_string()))?;
    build_schema(&records)
}

/// Replace comments and trailing commas with blanks, keeping line breaks so
/// positions in later errors still match the source.
pub fn strip_extensions(source: &str) -> Result<String, SchemaError> {
    let mut pairs = SchemaParser::parse(Rule::source, source)
        .map_err(|e| SchemaError::Parse(e.to_string()))?;
    let root = pairs
        .next()
        .ok_or_else(|| SchemaError::Parse("empty parse".to_string()))?;

    let mut json = String::with_capacity(source.len());
    for token in root.into_inner() {
        match token.as_rule() {
            Rule::string | Rule::text => json.push_str(token.as_str()),
            Rule::comment | Rule::trailing_comma => json.extend(
                token
                    .as_str()
                    .chars()
                    .map(|c| if c == '\n' { '\n' } else { ' ' }),
            ),
            _ => {}
        }
    }
    Ok(json)
}

// ==================== Records ====================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Record {
    Service(NamedRecord),
    Client(NamedRecord),
    #[serde(rename = "Message-ID-Enum")]
    MessageIdEnum(NamedRecord),
    Message(MessageRecord),
    Struct(StructRecord),
    #[serde(rename = "CommonFragment-TLV")]
    CommonField(FieldRecord),
    #[serde(rename = "CommonFragment-Prerequisite")]
    CommonPrerequisite(PrerequisiteRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct NamedRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    name: String,
    service: Option<String>,
    id: Option<Number>,
    #[serde(alias = "query", alias = "input")]
    request: Option<Vec<FieldRecord>>,
    set: Option<Vec<FieldRecord>>,
    #[serde(alias = "output")]
    response: Option<Vec<FieldRecord>>,
    #[serde(alias = "indication")]
    notification: Option<Vec<FieldRecord>>,
}

#[derive(Debug, Deserialize)]
struct StructRecord {
    name: String,
    contents: Vec<FieldRecord>,
}

/// A field, a `common-ref` use of a field fragment, or a fragment template.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FieldRecord {
    name: Option<String>,
    id: Option<Number>,
    mandatory: Option<Flag>,
    format: Option<String>,
    array_size_field: Option<String>,
    struct_type: Option<String>,
    size_prefix_format: Option<String>,
    prerequisites: Option<Vec<PrerequisiteRecord>>,
    common_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PrerequisiteRecord {
    field: Option<String>,
    operation: Option<String>,
    value: Option<Scalar>,
    common_ref: Option<String>,
}

/// Ids are written as JSON numbers or as decimal/hex strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u64),
    Text(String),
}

impl Number {
    fn value(&self, key: &str, context: &str) -> Result<u64, SchemaError> {
        let text = match self {
            Number::Int(n) => return Ok(*n),
            Number::Text(t) => t.trim(),
        };
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse::<u64>(),
        };
        parsed.map_err(|_| invalid(context, format!("'{}' is not a number: '{}'", key, text)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Text(String),
}

fn build_schema(records: &[Json]) -> Result<SchemaDecl, SchemaError> {
    let mut schema = SchemaDecl::default();
    for (i, json) in records.iter().enumerate() {
        let context = format!("record #{}", i + 1);
        let record = Record::deserialize(json).map_err(|e| invalid(&context, e.to_string()))?;
        match record {
            Record::Service(r) => set_once(&mut schema.service, r, "Service", &context)?,
            Record::Client(r) => set_once(&mut schema.client, r, "Client", &context)?,
            Record::MessageIdEnum(r) => {
                set_once(&mut schema.message_id_enum, r, "Message-ID-Enum", &context)?
            }
            Record::Message(r) => schema.messages.push(build_message(r)?),
            Record::Struct(r) => schema.structs.push(build_struct(r)?),
            Record::CommonField(r) => {
                let common_ref = r
                    .common_ref
                    .clone()
                    .ok_or_else(|| invalid(&context, "missing 'common-ref'"))?;
                let context = format!("common fragment '{}'", common_ref);
                let field = build_field(r, &context)?;
                schema.common_fields.push(CommonFieldDecl { common_ref, field });
            }
            Record::CommonPrerequisite(r) => {
                let common_ref = r
                    .common_ref
                    .clone()
                    .ok_or_else(|| invalid(&context, "missing 'common-ref'"))?;
                let context = format!("common prerequisite '{}'", common_ref);
                let prerequisite = build_prerequisite(r, &context)?;
                schema
                    .common_prerequisites
                    .push(CommonPrerequisiteDecl { common_ref, prerequisite });
            }
            Record::Unknown => {
                let kind = json.get("type").and_then(Json::as_str).unwrap_or_default();
                return Err(invalid(&context, format!("unknown record type '{}'", kind)));
            }
        }
    }
    Ok(schema)
}

fn set_once(
    slot: &mut Option<String>,
    record: NamedRecord,
    kind: &'static str,
    context: &str,
) -> Result<(), SchemaError> {
    if slot.is_some() {
        return Err(SchemaError::DuplicateDeclaration {
            kind,
            name: record.name,
            context: context.to_string(),
        });
    }
    *slot = Some(record.name);
    Ok(())
}

fn build_message(record: MessageRecord) -> Result<MessageDecl, SchemaError> {
    let context = format!("message '{}'", record.name);
    let id = match &record.id {
        Some(n) => n.value("id", &context)?,
        None => return Err(invalid(&context, "missing 'id'")),
    };
    let id = u32::try_from(id).map_err(|_| invalid(&context, format!("id {} out of range", id)))?;

    let lists = [
        (ContainerKind::Request, record.request),
        (ContainerKind::Set, record.set),
        (ContainerKind::Response, record.response),
        (ContainerKind::Notification, record.notification),
    ];
    let mut containers = Vec::new();
    for (kind, list) in lists {
        let Some(list) = list else { continue };
        let ctx = format!("{} {}", context, kind);
        let entries = list
            .into_iter()
            .map(|r| build_field_entry(r, &ctx))
            .collect::<Result<Vec<_>, _>>()?;
        containers.push((kind, entries));
    }
    Ok(MessageDecl {
        name: record.name,
        service: record.service,
        id,
        containers,
    })
}

fn build_struct(record: StructRecord) -> Result<StructDecl, SchemaError> {
    let context = format!("struct '{}'", record.name);
    let members = record
        .contents
        .into_iter()
        .map(|r| build_field_entry(r, &context))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StructDecl {
        name: record.name,
        members,
    })
}

fn build_field_entry(record: FieldRecord, context: &str) -> Result<FieldEntry, SchemaError> {
    // A bare `common-ref` (no format of its own) is a reference, not a template.
    if record.format.is_none() {
        if let Some(name) = record.common_ref {
            let prerequisites = match record.prerequisites {
                Some(list) => Some(build_prerequisite_list(list, context)?),
                None => None,
            };
            return Ok(FieldEntry::CommonRef { name, prerequisites });
        }
    }
    Ok(FieldEntry::Inline(build_field(record, context)?))
}

fn build_field(record: FieldRecord, context: &str) -> Result<FieldDecl, SchemaError> {
    let name = record
        .name
        .ok_or_else(|| invalid(context, "missing 'name'"))?;
    let field_ctx = format!("{} / field '{}'", context, name);
    let format = record
        .format
        .ok_or_else(|| invalid(&field_ctx, "missing 'format'"))?;
    let tag = match &record.id {
        Some(n) => {
            let v = n.value("id", &field_ctx)?;
            Some(u8::try_from(v).map_err(|_| invalid(&field_ctx, format!("tag {} out of range", v)))?)
        }
        None => None,
    };
    let mandatory = match &record.mandatory {
        None => false,
        Some(Flag::Bool(b)) => *b,
        Some(Flag::Text(t)) => match t.as_str() {
            "yes" | "true" => true,
            "no" | "false" => false,
            _ => return Err(invalid(&field_ctx, "'mandatory' must be yes/no")),
        },
    };
    let prerequisites = match record.prerequisites {
        Some(list) => build_prerequisite_list(list, &field_ctx)?,
        None => Vec::new(),
    };
    Ok(FieldDecl {
        name,
        tag,
        mandatory,
        format,
        array_size_field: record.array_size_field,
        struct_type: record.struct_type,
        size_prefix: record.size_prefix_format,
        prerequisites,
        origin: None,
    })
}

fn build_prerequisite_list(
    list: Vec<PrerequisiteRecord>,
    context: &str,
) -> Result<Vec<PrerequisiteEntry>, SchemaError> {
    list.into_iter()
        .map(|r| match (&r.field, &r.common_ref) {
            (None, Some(name)) => Ok(PrerequisiteEntry::CommonRef(name.clone())),
            _ => build_prerequisite(r, context).map(PrerequisiteEntry::Inline),
        })
        .collect()
}

fn build_prerequisite(record: PrerequisiteRecord, context: &str) -> Result<PrerequisiteDecl, SchemaError> {
    let field = record
        .field
        .ok_or_else(|| invalid(context, "missing 'field'"))?;
    let op = record
        .operation
        .ok_or_else(|| invalid(context, "missing 'operation'"))?;
    let operation = Operator::parse(&op)
        .ok_or_else(|| invalid(context, format!("unknown operation '{}'", op)))?;
    let value = match record.value {
        Some(Scalar::Bool(b)) => Literal::Bool(b),
        Some(Scalar::Int(i)) => Literal::Int(i),
        Some(Scalar::Text(t)) => Literal::parse(&t),
        None => return Err(invalid(context, "prerequisite without 'value'")),
    };
    Ok(PrerequisiteDecl {
        field,
        operation,
        value,
    })
}

fn invalid(context: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidRecord {
        context: context.to_string(),
        reason: reason.into(),
    }
}
