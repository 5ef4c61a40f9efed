//! Plan Emission Interface: the finished layout plan and the backend contract.
//!
//! A [`LayoutPlan`] is built once per schema and never mutated afterwards.
//! Backends receive it through [`emit`], which walks structs then messages in
//! declaration order and passes along a run-scoped [`EmittedRegistry`].

use crate::ast::ContainerKind;
use crate::config::ProtocolVariant;
use crate::error::SchemaError;
use crate::layout::{FieldLayout, LayoutEngine, Offset, StructLayout};
use crate::model::Schema;
use crate::resolve::resolve_order;
use log::debug;
use std::collections::HashSet;

/// Laid-out fields of one container, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerPlan {
    pub kind: ContainerKind,
    pub fields: Vec<FieldLayout>,
    /// Offset just past the last inline byte.
    pub end: Offset,
}

impl ContainerPlan {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every offset is a plain constant (no strings, arrays or gated fields).
    pub fn is_fixed(&self) -> bool {
        self.end.is_constant()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePlan {
    pub name: String,
    pub service: String,
    pub id: u32,
    pub containers: Vec<ContainerPlan>,
}

impl MessagePlan {
    pub fn container(&self, kind: ContainerKind) -> Option<&ContainerPlan> {
        self.containers.iter().find(|c| c.kind == kind)
    }
}

/// Output of one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPlan {
    pub service: String,
    pub variant: ProtocolVariant,
    pub client: Option<String>,
    pub message_id_enum: Option<String>,
    pub messages: Vec<MessagePlan>,
    /// Resolved struct table, in declaration order.
    pub structs: Vec<StructLayout>,
}

impl LayoutPlan {
    pub fn get_message(&self, name: &str) -> Option<&MessagePlan> {
        self.messages.iter().find(|m| m.name == name)
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructLayout> {
        self.structs.iter().find(|s| s.name == name)
    }
}

/// Order and lay out every container and struct of a built schema.
pub fn build_plan(schema: &Schema) -> Result<LayoutPlan, SchemaError> {
    let mut engine = LayoutEngine::new(schema);
    for s in &schema.structs {
        engine.struct_layout(&s.name)?;
    }

    let header = schema.variant.field_header_size();
    let mut messages = Vec::with_capacity(schema.messages.len());
    for m in &schema.messages {
        let mut containers = Vec::with_capacity(m.containers.len());
        for c in &m.containers {
            let context = format!("message '{}' {}", m.name, c.kind);
            let ordered = resolve_order(&c.fields, &context)?;
            let (fields, end) = engine.layout_fields(&ordered, header, &context)?;
            debug!("{}: {} fields, end {}", context, fields.len(), end);
            containers.push(ContainerPlan {
                kind: c.kind,
                fields,
                end,
            });
        }
        messages.push(MessagePlan {
            name: m.name.clone(),
            service: m.service.clone(),
            id: m.id,
            containers,
        });
    }

    Ok(LayoutPlan {
        service: schema.service.clone(),
        variant: schema.variant,
        client: schema.client.clone(),
        message_id_enum: schema.message_id_enum.clone(),
        messages,
        structs: engine.into_structs(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmittedKind {
    Struct,
    Message,
    /// Shared helper or documentation block, keyed by common-fragment name.
    Fragment,
}

/// What a backend has already produced during one run.
#[derive(Debug, Default)]
pub struct EmittedRegistry {
    seen: HashSet<(EmittedKind, String)>,
}

impl EmittedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time `(kind, name)` is claimed in this run.
    pub fn claim(&mut self, kind: EmittedKind, name: &str) -> bool {
        self.seen.insert((kind, name.to_string()))
    }

    pub fn contains(&self, kind: EmittedKind, name: &str) -> bool {
        self.seen.contains(&(kind, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Consumer of a finished plan. All rendering lives behind this trait.
pub trait Backend {
    type Error;

    fn begin(&mut self, _plan: &LayoutPlan) -> Result<(), Self::Error> {
        Ok(())
    }

    fn emit_struct(
        &mut self,
        layout: &StructLayout,
        registry: &mut EmittedRegistry,
    ) -> Result<(), Self::Error>;

    fn emit_message(
        &mut self,
        message: &MessagePlan,
        registry: &mut EmittedRegistry,
    ) -> Result<(), Self::Error>;

    fn finish(&mut self, _plan: &LayoutPlan) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Hand a plan to a backend: structs once each, then messages.
pub fn emit<B: Backend>(plan: &LayoutPlan, backend: &mut B) -> Result<EmittedRegistry, B::Error> {
    let mut registry = EmittedRegistry::new();
    backend.begin(plan)?;
    for s in &plan.structs {
        if registry.claim(EmittedKind::Struct, &s.name) {
            backend.emit_struct(s, &mut registry)?;
        }
    }
    for m in &plan.messages {
        if registry.claim(EmittedKind::Message, &m.name) {
            backend.emit_message(m, &mut registry)?;
        }
    }
    backend.finish(plan)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    const SCHEMA: &str = r#"[
      { "type": "Service", "name": "Basic" },
      { "type": "Struct", "name": "Pair", "contents": [
          { "name": "a", "format": "guint16" }, { "name": "b", "format": "guint16" } ] },
      { "type": "Message", "name": "One", "id": 1,
        "response": [ { "name": "p", "format": "struct", "struct-type": "Pair" } ] },
      { "type": "Message", "name": "Two", "id": 2,
        "query": [ { "name": "x", "format": "guint8" } ],
        "response": [ { "name": "n", "format": "guint8" },
                      { "name": "ps", "format": "struct-array", "struct-type": "Pair",
                        "array-size-field": "n" } ] }
    ]"#;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Backend for Recorder {
        type Error = std::convert::Infallible;

        fn emit_struct(&mut self, s: &StructLayout, _: &mut EmittedRegistry) -> Result<(), Self::Error> {
            self.events.push(format!("struct {}", s.name));
            Ok(())
        }

        fn emit_message(&mut self, m: &MessagePlan, r: &mut EmittedRegistry) -> Result<(), Self::Error> {
            for c in &m.containers {
                for f in &c.fields {
                    if let Some(t) = f.linkage.struct_type() {
                        if r.claim(EmittedKind::Fragment, t) {
                            self.events.push(format!("helper {}", t));
                        }
                    }
                }
            }
            self.events.push(format!("message {}", m.name));
            Ok(())
        }
    }

    #[test]
    fn structs_emitted_once_before_messages() {
        let plan = crate::generate(SCHEMA, &Options::default()).unwrap();
        let mut backend = Recorder::default();
        let registry = emit(&plan, &mut backend).unwrap();
        assert_eq!(
            backend.events,
            vec!["struct Pair", "helper Pair", "message One", "message Two"]
        );
        assert!(registry.contains(EmittedKind::Struct, "Pair"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn registry_is_per_run() {
        let plan = crate::generate(SCHEMA, &Options::default()).unwrap();
        for _ in 0..2 {
            let mut backend = Recorder::default();
            emit(&plan, &mut backend).unwrap();
            assert_eq!(backend.events.len(), 4);
        }
    }

    #[test]
    fn containers_keep_declaration_order() {
        let plan = crate::generate(SCHEMA, &Options::default()).unwrap();
        let two = plan.get_message("Two").unwrap();
        let kinds: Vec<_> = two.containers.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ContainerKind::Request, ContainerKind::Response]);
        let response = two.container(ContainerKind::Response).unwrap();
        assert_eq!(response.field("ps").unwrap().offset.constant, 1);
        assert!(!response.is_fixed());
        assert!(two.container(ContainerKind::Request).unwrap().is_fixed());
        assert_eq!(plan.get_struct("Pair").unwrap().size.fixed(), Some(4));
    }
}
