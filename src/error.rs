//! Error taxonomy for schema loading, resolution and layout.
//!
//! Every variant is fatal to the generation step that raised it. Errors carry a
//! `context` string locating the schema bug (message, container, field).

/// Failure of a generation run.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid record ({context}): {reason}")]
    InvalidRecord { context: String, reason: String },

    #[error("Unknown format '{format}' ({context})")]
    UnknownFormat { format: String, context: String },

    #[error("Common reference '{name}' not found ({context})")]
    CommonRefNotFound { name: String, context: String },

    #[error("Missing array size field for '{field}' ({context}){}", size_field_suffix(.size_field))]
    MissingArraySizeField {
        field: String,
        size_field: Option<String>,
        context: String,
    },

    #[error("Size field '{size_field}' of '{field}' has no layout yet ({context})")]
    UnresolvedSizeReference {
        field: String,
        size_field: String,
        context: String,
    },

    #[error("Missing struct type for '{field}' ({context}){}", struct_type_suffix(.struct_type))]
    MissingStructType {
        field: String,
        struct_type: Option<String>,
        context: String,
    },

    #[error("Prerequisite of '{field}' refers to unknown field '{prerequisite}' ({context})")]
    UnknownPrerequisiteField {
        field: String,
        prerequisite: String,
        context: String,
    },

    #[error("Cyclic field dependency {} ({context})", join_cycle(.cycle))]
    CyclicFieldDependency { cycle: Vec<String>, context: String },

    #[error("Struct '{name}' embeds itself")]
    RecursiveStruct { name: String },

    #[error("Missing required schema section: {section} ({context})")]
    MissingRequiredSchemaSection { section: String, context: String },

    #[error("Duplicate {kind} '{name}' ({context})")]
    DuplicateDeclaration {
        kind: &'static str,
        name: String,
        context: String,
    },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

fn join_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

fn size_field_suffix(size_field: &Option<String>) -> String {
    match size_field {
        Some(name) => format!(": '{}' is not an integer sibling", name),
        None => String::new(),
    }
}

fn struct_type_suffix(struct_type: &Option<String>) -> String {
    match struct_type {
        Some(name) => format!(": '{}' is not declared", name),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let e = SchemaError::CyclicFieldDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
            context: "message 'M' request".into(),
        };
        assert_eq!(
            e.to_string(),
            "Cyclic field dependency a -> b -> a (message 'M' request)"
        );
    }

    #[test]
    fn missing_size_field_mentions_bad_name() {
        let e = SchemaError::MissingArraySizeField {
            field: "items".into(),
            size_field: Some("n".into()),
            context: "struct 'S'".into(),
        };
        assert!(e.to_string().contains("'n' is not an integer sibling"));
    }
}
