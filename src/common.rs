//! Common-Fragment Resolver: splices shared field and prerequisite fragments into
//! every place that references them.
//!
//! Each use gets an independent copy. A reference that carries its own prerequisite
//! list replaces the template's list instead of merging with it.

use crate::ast::*;
use crate::error::SchemaError;
use crate::format::Format;
use log::{debug, trace};
use std::collections::HashMap;

/// Declarations with every `common-ref` substituted.
#[derive(Debug, Clone, Default)]
pub struct ExpandedSchema {
    pub service: Option<String>,
    pub client: Option<String>,
    pub message_id_enum: Option<String>,
    pub messages: Vec<ExpandedMessage>,
    pub structs: Vec<ExpandedStruct>,
}

#[derive(Debug, Clone)]
pub struct ExpandedMessage {
    pub name: String,
    pub service: Option<String>,
    pub id: u32,
    pub containers: Vec<(ContainerKind, Vec<ExpandedField>)>,
}

#[derive(Debug, Clone)]
pub struct ExpandedStruct {
    pub name: String,
    pub members: Vec<ExpandedField>,
}

/// Schema-wide table of named fragments.
struct CommonTable<'a> {
    fields: HashMap<&'a str, &'a FieldDecl>,
    prerequisites: HashMap<&'a str, &'a PrerequisiteDecl>,
}

impl<'a> CommonTable<'a> {
    fn build(schema: &'a SchemaDecl) -> Result<Self, SchemaError> {
        let mut fields = HashMap::new();
        for c in &schema.common_fields {
            let context = format!("common fragment '{}'", c.common_ref);
            Format::lookup(&c.field.format).map_err(|e| SchemaError::UnknownFormat {
                format: e.0,
                context: context.clone(),
            })?;
            if fields.insert(c.common_ref.as_str(), &c.field).is_some() {
                return Err(SchemaError::DuplicateDeclaration {
                    kind: "common fragment",
                    name: c.common_ref.clone(),
                    context,
                });
            }
        }
        let mut prerequisites = HashMap::new();
        for c in &schema.common_prerequisites {
            if prerequisites
                .insert(c.common_ref.as_str(), &c.prerequisite)
                .is_some()
            {
                return Err(SchemaError::DuplicateDeclaration {
                    kind: "common prerequisite",
                    name: c.common_ref.clone(),
                    context: "schema".to_string(),
                });
            }
        }
        Ok(CommonTable {
            fields,
            prerequisites,
        })
    }

    fn expand_fields(
        &self,
        entries: &[FieldEntry],
        context: &str,
    ) -> Result<Vec<ExpandedField>, SchemaError> {
        entries.iter().map(|e| self.expand_field(e, context)).collect()
    }

    fn expand_field(&self, entry: &FieldEntry, context: &str) -> Result<ExpandedField, SchemaError> {
        match entry {
            FieldEntry::Inline(decl) => {
                let ctx = format!("{} / field '{}'", context, decl.name);
                let prerequisites = self.expand_prerequisites(&decl.prerequisites, &ctx)?;
                Ok(with_prerequisites(decl, prerequisites, decl.origin.clone()))
            }
            FieldEntry::CommonRef {
                name,
                prerequisites,
            } => {
                let template = self.fields.get(name.as_str()).ok_or_else(|| {
                    SchemaError::CommonRefNotFound {
                        name: name.clone(),
                        context: context.to_string(),
                    }
                })?;
                let ctx = format!("{} / common '{}'", context, name);
                let source = prerequisites.as_ref().unwrap_or(&template.prerequisites);
                let expanded = self.expand_prerequisites(source, &ctx)?;
                debug!(
                    "{}: expanded common fragment '{}' as field '{}'{}",
                    context,
                    name,
                    template.name,
                    if prerequisites.is_some() { " (prerequisites overridden)" } else { "" }
                );
                Ok(with_prerequisites(template, expanded, Some(name.clone())))
            }
        }
    }

    fn expand_prerequisites(
        &self,
        entries: &[PrerequisiteEntry],
        context: &str,
    ) -> Result<Vec<PrerequisiteDecl>, SchemaError> {
        entries
            .iter()
            .map(|entry| match entry {
                PrerequisiteEntry::Inline(p) => Ok(p.clone()),
                PrerequisiteEntry::CommonRef(name) => {
                    trace!("{}: expanded common prerequisite '{}'", context, name);
                    self.prerequisites
                        .get(name.as_str())
                        .map(|p| (*p).clone())
                        .ok_or_else(|| SchemaError::CommonRefNotFound {
                            name: name.clone(),
                            context: context.to_string(),
                        })
                }
            })
            .collect()
    }
}

fn with_prerequisites(
    decl: &FieldDecl,
    prerequisites: Vec<PrerequisiteDecl>,
    origin: Option<String>,
) -> ExpandedField {
    FieldDecl {
        name: decl.name.clone(),
        tag: decl.tag,
        mandatory: decl.mandatory,
        format: decl.format.clone(),
        array_size_field: decl.array_size_field.clone(),
        struct_type: decl.struct_type.clone(),
        size_prefix: decl.size_prefix.clone(),
        prerequisites,
        origin,
    }
}

/// Substitute every common reference in the schema.
pub fn expand(schema: &SchemaDecl) -> Result<ExpandedSchema, SchemaError> {
    let table = CommonTable::build(schema)?;

    let structs = schema
        .structs
        .iter()
        .map(|s| {
            let context = format!("struct '{}'", s.name);
            Ok(ExpandedStruct {
                name: s.name.clone(),
                members: table.expand_fields(&s.members, &context)?,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let messages = schema
        .messages
        .iter()
        .map(|m| {
            let containers = m
                .containers
                .iter()
                .map(|(kind, entries)| {
                    let context = format!("message '{}' {}", m.name, kind);
                    Ok((*kind, table.expand_fields(entries, &context)?))
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            Ok(ExpandedMessage {
                name: m.name.clone(),
                service: m.service.clone(),
                id: m.id,
                containers,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    Ok(ExpandedSchema {
        service: schema.service.clone(),
        client: schema.client.clone(),
        message_id_enum: schema.message_id_enum.clone(),
        messages,
        structs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const SCHEMA: &str = r#"[
      { "type": "CommonFragment-Prerequisite", "common-ref": "Success",
        "field": "status", "operation": "==", "value": "0" },
      { "type": "CommonFragment-TLV", "common-ref": "Result", "name": "result",
        "id": "0x02", "format": "guint16",
        "prerequisites": [ { "common-ref": "Success" } ] },
      { "type": "Message", "name": "M", "id": 1,
        "response": [
          { "name": "status", "format": "guint8" },
          { "common-ref": "Result" },
          { "name": "tail", "format": "guint8" },
          { "common-ref": "Result",
            "prerequisites": [ { "field": "status", "operation": "!=", "value": "0" } ] }
        ] }
    ]"#;

    fn response(schema: &ExpandedSchema) -> &[ExpandedField] {
        &schema.messages[0].containers[0].1
    }

    #[test]
    fn splices_in_place() {
        let expanded = expand(&parse(SCHEMA).unwrap()).unwrap();
        let names: Vec<_> = response(&expanded).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["status", "result", "tail", "result"]);
        assert_eq!(response(&expanded)[1].origin.as_deref(), Some("Result"));
        assert_eq!(response(&expanded)[1].tag, Some(2));
        assert_eq!(response(&expanded)[2].origin, None);
    }

    #[test]
    fn template_prerequisites_are_expanded() {
        let expanded = expand(&parse(SCHEMA).unwrap()).unwrap();
        let p = &response(&expanded)[1].prerequisites;
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].to_string(), "status == 0");
    }

    #[test]
    fn override_replaces_not_merges() {
        let expanded = expand(&parse(SCHEMA).unwrap()).unwrap();
        let p = &response(&expanded)[3].prerequisites;
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].to_string(), "status != 0");
        // The earlier use keeps the template list.
        assert_eq!(response(&expanded)[1].prerequisites[0].to_string(), "status == 0");
    }

    #[test]
    fn missing_field_fragment() {
        let src = r#"[ { "type": "Message", "name": "M", "id": 1,
            "request": [ { "common-ref": "Nope" } ] } ]"#;
        match expand(&parse(src).unwrap()) {
            Err(SchemaError::CommonRefNotFound { name, context }) => {
                assert_eq!(name, "Nope");
                assert_eq!(context, "message 'M' request");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_prerequisite_fragment() {
        let src = r#"[ { "type": "Message", "name": "M", "id": 1,
            "request": [ { "name": "a", "format": "guint8",
                           "prerequisites": [ { "common-ref": "Nope" } ] } ] } ]"#;
        assert!(matches!(
            expand(&parse(src).unwrap()),
            Err(SchemaError::CommonRefNotFound { .. })
        ));
    }

    #[test]
    fn template_format_is_validated() {
        let src = r#"[ { "type": "CommonFragment-TLV", "common-ref": "X",
            "name": "x", "format": "guint12" } ]"#;
        assert!(matches!(
            expand(&parse(src).unwrap()),
            Err(SchemaError::UnknownFormat { .. })
        ));
    }

    #[test]
    fn duplicate_fragment_names() {
        let src = r#"[
          { "type": "CommonFragment-TLV", "common-ref": "X", "name": "x", "format": "guint8" },
          { "type": "CommonFragment-TLV", "common-ref": "X", "name": "y", "format": "guint8" }
        ]"#;
        assert!(matches!(
            expand(&parse(src).unwrap()),
            Err(SchemaError::DuplicateDeclaration { .. })
        ));
    }
}
