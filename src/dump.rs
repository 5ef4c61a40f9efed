//! Text backend: renders a layout plan as a readable listing.

use crate::layout::{FieldLayout, StructLayout};
use crate::model::Linkage;
use crate::plan::{Backend, EmittedKind, EmittedRegistry, LayoutPlan, MessagePlan};
use std::fmt::Write;

/// Collects the listing in memory; `into_string` hands it over.
#[derive(Debug, Default)]
pub struct TextBackend {
    out: String,
    /// Also list fragment origins and struct usage.
    pub verbose: bool,
}

impl TextBackend {
    pub fn new(verbose: bool) -> Self {
        TextBackend {
            out: String::new(),
            verbose,
        }
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn field_line(&mut self, f: &FieldLayout, indent: &str) -> std::fmt::Result {
        write!(self.out, "{}@{}  {}: {}", indent, f.offset, f.name, f.format)?;
        if let Some(tag) = f.tag {
            write!(self.out, " [0x{:02x}]", tag)?;
        }
        match &f.linkage {
            Linkage::None => {}
            Linkage::ArraySize { size_field } => write!(self.out, " x {}", size_field)?,
            Linkage::Struct { struct_type } => write!(self.out, " <{}>", struct_type)?,
            Linkage::StructArray {
                struct_type,
                size_field,
            } => write!(self.out, " <{}> x {}", struct_type, size_field)?,
        }
        write!(self.out, "  size {}", f.size)?;
        if f.mandatory {
            self.out.push_str("  mandatory");
        }
        if f.is_conditional() {
            let conditions: Vec<String> = f.prerequisites.iter().map(|p| p.to_string()).collect();
            write!(self.out, "  if {}", conditions.join(" && "))?;
        }
        if self.verbose {
            if let Some(origin) = &f.origin {
                write!(self.out, "  (from {})", origin)?;
            }
        }
        self.out.push('\n');
        Ok(())
    }
}

impl Backend for TextBackend {
    type Error = std::fmt::Error;

    fn begin(&mut self, plan: &LayoutPlan) -> Result<(), Self::Error> {
        write!(self.out, "service {} ({})", plan.service, plan.variant)?;
        if let Some(client) = &plan.client {
            write!(self.out, " client {}", client)?;
        }
        if let Some(ids) = &plan.message_id_enum {
            write!(self.out, " ids {}", ids)?;
        }
        self.out.push('\n');
        Ok(())
    }

    fn emit_struct(
        &mut self,
        layout: &StructLayout,
        _registry: &mut EmittedRegistry,
    ) -> Result<(), Self::Error> {
        write!(self.out, "\nstruct {}  size {}", layout.name, layout.size)?;
        if self.verbose {
            let usage = match (layout.usage.embedded, layout.usage.array_member) {
                (true, true) => "embedded, array member",
                (true, false) => "embedded",
                (false, true) => "array member",
                (false, false) => "unused",
            };
            write!(self.out, "  ({})", usage)?;
        }
        self.out.push('\n');
        for m in &layout.members {
            self.field_line(m, "  ")?;
        }
        Ok(())
    }

    fn emit_message(
        &mut self,
        message: &MessagePlan,
        registry: &mut EmittedRegistry,
    ) -> Result<(), Self::Error> {
        writeln!(
            self.out,
            "\nmessage {} (0x{:04x}) service {}",
            message.name, message.id, message.service
        )?;
        for c in &message.containers {
            writeln!(self.out, "  {}  end {}", c.kind, c.end)?;
            for f in &c.fields {
                self.field_line(f, "    ")?;
                if let Some(origin) = &f.origin {
                    registry.claim(EmittedKind::Fragment, origin);
                }
            }
        }
        Ok(())
    }
}

/// Render a whole plan.
pub fn render(plan: &LayoutPlan, verbose: bool) -> Result<String, std::fmt::Error> {
    let mut backend = TextBackend::new(verbose);
    crate::plan::emit(plan, &mut backend)?;
    Ok(backend.into_string())
}
