//! # modemgen: schema resolution and wire layout for modem control protocols
//!
//! Reads JSON schema files describing the messages of a TLV-based (QMI-style) or
//! fixed-buffer (MBIM-style) cellular modem control protocol and turns them into
//! a [`LayoutPlan`]: every container's fields in wire order, each with a byte
//! offset, a size expression, prerequisites and array/struct linkage.
//! Code generators consume the plan through the [`Backend`] trait.
//!
//! ## Pipeline
//!
//! 1. [`parser`]: PEST blanks comments and trailing commas, serde reads the JSON records.
//! 2. [`common`]: splices `common-ref` fragments in place.
//! 3. [`model`]: typed fields and structs, linkage validation.
//! 4. [`resolve`]: stable topological wire order, cycle detection.
//! 5. [`layout`]: constant offsets plus symbolic terms.
//! 6. [`plan`]: the finished plan and the backend contract.
//!
//! ## Example schema
//!
//! ```text
//! [
//!   { "type": "Service", "name": "Basic Connect" },
//!   { "type": "Message", "name": "Device Caps", "id": 1,
//!     "query": [],
//!     "response": [
//!       { "name": "count", "format": "guint32" },
//!       { "name": "ids", "format": "guint32-array", "array-size-field": "count" },
//!       { "name": "label", "format": "string" } ] }
//! ]
//! ```
//!
//! ## Usage
//!
//! See `tests/integration.rs` and the `dump_plan` binary.

pub mod ast;
pub mod codec;
pub mod common;
pub mod config;
pub mod dump;
pub mod error;
pub mod format;
pub mod layout;
pub mod model;
pub mod parser;
pub mod plan;
pub mod resolve;
pub mod value;

pub use codec::{CodecError, Endianness, PlanCodec};
pub use config::{Options, ProtocolVariant};
pub use error::SchemaError;
pub use format::{Element, Format, IntFormat};
pub use layout::{FieldLayout, LayoutEnv, Offset, OffsetTerm, SizeExpr, StructLayout};
pub use parser::parse;
pub use plan::{emit, Backend, ContainerPlan, EmittedKind, EmittedRegistry, LayoutPlan, MessagePlan};
pub use value::{Fields, Value};

use log::info;
use std::path::Path;

/// Run the whole pipeline over schema source text.
pub fn generate(source: &str, options: &Options) -> Result<LayoutPlan, SchemaError> {
    let decl = parser::parse(source)?;
    let expanded = common::expand(&decl)?;
    let schema = model::build(&expanded, options)?;
    let plan = plan::build_plan(&schema)?;
    info!(
        "service '{}': {} messages, {} structs laid out",
        plan.service,
        plan.messages.len(),
        plan.structs.len()
    );
    Ok(plan)
}

/// Load a schema file and generate its plan.
pub fn generate_file(path: impl AsRef<Path>, options: &Options) -> Result<LayoutPlan, SchemaError> {
    let source = std::fs::read_to_string(path.as_ref())?;
    generate(&source, options)
}
