//! Plan-driven reference encoder/decoder.
//!
//! The encoder writes a container field by field in plan order and checks that
//! every value lands at the offset the plan predicts. The decoder does the
//! opposite walk: it evaluates each field's offset from what it has decoded so
//! far and reads the value there. Both report the bytes they cover, so a plan
//! can be checked for encoder/decoder size agreement.
//!
//! Indirect struct arrays write one `u32` slot per element; the elements are
//! appended after the container's inline bytes and the slots hold their offsets
//! from the container start.

use crate::format::{Element, Format, IntFormat, REF_SLOT_SIZE, UUID_SIZE};
use crate::layout::{FieldLayout, LayoutEnv, Offset, StructLayout};
use crate::model::Prerequisite;
use crate::plan::{ContainerPlan, LayoutPlan};
use crate::value::{Fields, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing value for field '{0}'")]
    MissingValue(String),
    #[error("Field '{field}' expects {expected}")]
    TypeMismatch { field: String, expected: String },
    #[error("Length/count mismatch: {0}")]
    LengthMismatch(String),
    #[error("Field '{field}' at byte {actual}, layout says {expected:?}")]
    LayoutMismatch {
        field: String,
        expected: Option<usize>,
        actual: usize,
    },
    #[error("TLV tag 0x{found:02x} where '{field}' (0x{expected:02x}) was expected")]
    TagMismatch { field: String, expected: u8, found: u8 },
    #[error("Unknown struct: {0}")]
    UnknownStruct(String),
    #[error("Cannot evaluate prerequisite '{0}'")]
    Prerequisite(String),
}

/// Decoded facts offsets are evaluated against.
#[derive(Debug, Default)]
struct Facts {
    absent: HashSet<String>,
    counts: HashMap<String, u64>,
    lengths: HashMap<String, usize>,
    consumed: HashMap<String, usize>,
}

impl Facts {
    /// `consumed` covers the value bytes, so a string's length is whatever the
    /// wire held after its prefix, not the length of the decoded text.
    fn record(&mut self, field: &FieldLayout, value: &Value, consumed: usize) {
        if let Some(n) = value.as_u64() {
            self.counts.insert(field.name.clone(), n);
        }
        if field.format == Format::String {
            let prefix = field.length_prefix.unwrap_or(IntFormat::U32).size();
            self.lengths
                .insert(field.name.clone(), consumed.saturating_sub(prefix));
        }
        self.consumed.insert(field.name.clone(), consumed);
    }
}

impl LayoutEnv for Facts {
    fn is_present(&self, field: &str) -> bool {
        !self.absent.contains(field)
    }

    fn count(&self, field: &str) -> Option<u64> {
        self.counts.get(field).copied()
    }

    fn string_length(&self, field: &str) -> Option<usize> {
        self.lengths.get(field).copied()
    }

    fn consumed(&self, field: &str) -> Option<usize> {
        self.consumed.get(field).copied()
    }
}

/// Scalar shape of a non-compound format.
fn scalar(format: Format) -> Option<Element> {
    match format {
        Format::Int(i) => Some(Element::Int(i)),
        Format::Uuid => Some(Element::Uuid),
        Format::String => Some(Element::String),
        Format::Ipv4 | Format::RefIpv4 => Some(Element::Ipv4),
        Format::Ipv6 | Format::RefIpv6 => Some(Element::Ipv6),
        _ => None,
    }
}

/// Whether a gated field is on the wire, given the siblings decoded before it.
pub fn prerequisites_hold(prerequisites: &[Prerequisite], values: &Fields) -> Result<bool, CodecError> {
    for p in prerequisites {
        let mut path = p.field.split('.');
        let mut current = path.next().and_then(|name| values.get(name));
        for member in path {
            current = current.and_then(Value::as_struct).and_then(|m| m.get(member));
        }
        let Some(lhs) = current else {
            return Ok(false);
        };
        let lhs = lhs
            .as_i128()
            .ok_or_else(|| CodecError::Prerequisite(p.to_string()))?;
        let rhs = p
            .value
            .as_i128()
            .ok_or_else(|| CodecError::Prerequisite(p.to_string()))?;
        if !p.operation.holds(lhs, rhs) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug)]
pub struct PlanCodec<'a> {
    plan: &'a LayoutPlan,
    pub endianness: Endianness,
}

impl<'a> PlanCodec<'a> {
    pub fn new(plan: &'a LayoutPlan, endianness: Endianness) -> Self {
        PlanCodec { plan, endianness }
    }

    /// Encode one container. Gated fields whose prerequisites fail are skipped.
    pub fn encode_container(
        &self,
        container: &ContainerPlan,
        values: &Fields,
    ) -> Result<Vec<u8>, CodecError> {
        let mut enc = Encoder {
            codec: self,
            out: Vec::new(),
            pending: VecDeque::new(),
        };
        enc.encode_fields(&container.fields, &container.end, values, 0)?;
        while let Some(p) = enc.pending.pop_front() {
            let offset = u32::try_from(enc.out.len()).map_err(|_| {
                CodecError::LengthMismatch("indirect element offset exceeds u32".to_string())
            })?;
            self.patch_u32(&mut enc.out[p.slot..p.slot + REF_SLOT_SIZE], offset);
            let base = enc.out.len();
            enc.encode_fields(&p.layout.members, &p.layout.end, p.values, base)?;
        }
        Ok(enc.out)
    }

    /// Decode one container; returns the values and the bytes covered.
    pub fn decode_container(
        &self,
        container: &ContainerPlan,
        bytes: &[u8],
    ) -> Result<(Fields, usize), CodecError> {
        let mut dec = Decoder {
            codec: self,
            cursor: Cursor::new(bytes),
            extent: 0,
        };
        let (values, end) = dec.decode_fields(&container.fields, &container.end, 0)?;
        Ok((values, dec.extent.max(end)))
    }

    fn struct_layout(&self, field: &FieldLayout) -> Result<&'a StructLayout, CodecError> {
        let name = field
            .linkage
            .struct_type()
            .ok_or_else(|| CodecError::UnknownStruct(field.name.clone()))?;
        self.plan
            .get_struct(name)
            .ok_or_else(|| CodecError::UnknownStruct(name.to_string()))
    }

    fn patch_u32(&self, buf: &mut [u8], v: u32) {
        match self.endianness {
            Endianness::Big => BigEndian::write_u32(buf, v),
            Endianness::Little => LittleEndian::write_u32(buf, v),
        }
    }

    fn patch_u16(&self, buf: &mut [u8], v: u16) {
        match self.endianness {
            Endianness::Big => BigEndian::write_u16(buf, v),
            Endianness::Little => LittleEndian::write_u16(buf, v),
        }
    }

    fn read_uint(&self, r: &mut Cursor<&[u8]>, width: IntFormat) -> Result<u64, CodecError> {
        Ok(match (width.size(), self.endianness) {
            (1, _) => r.read_u8()? as u64,
            (2, Endianness::Big) => r.read_u16::<BigEndian>()? as u64,
            (2, Endianness::Little) => r.read_u16::<LittleEndian>()? as u64,
            (4, Endianness::Big) => r.read_u32::<BigEndian>()? as u64,
            (4, Endianness::Little) => r.read_u32::<LittleEndian>()? as u64,
            (_, Endianness::Big) => r.read_u64::<BigEndian>()?,
            (_, Endianness::Little) => r.read_u64::<LittleEndian>()?,
        })
    }

    fn write_uint(&self, w: &mut Vec<u8>, width: IntFormat, v: u64) -> Result<(), CodecError> {
        match (width.size(), self.endianness) {
            (1, _) => w.write_u8(v as u8)?,
            (2, Endianness::Big) => w.write_u16::<BigEndian>(v as u16)?,
            (2, Endianness::Little) => w.write_u16::<LittleEndian>(v as u16)?,
            (4, Endianness::Big) => w.write_u32::<BigEndian>(v as u32)?,
            (4, Endianness::Little) => w.write_u32::<LittleEndian>(v as u32)?,
            (_, Endianness::Big) => w.write_u64::<BigEndian>(v)?,
            (_, Endianness::Little) => w.write_u64::<LittleEndian>(v)?,
        }
        Ok(())
    }

    fn read_element(
        &self,
        r: &mut Cursor<&[u8]>,
        element: Element,
        prefix: IntFormat,
    ) -> Result<Value, CodecError> {
        Ok(match element {
            Element::Int(i) => {
                let raw = self.read_uint(r, i)?;
                match i {
                    IntFormat::I8 => Value::I8(raw as u8 as i8),
                    IntFormat::I16 => Value::I16(raw as u16 as i16),
                    IntFormat::I32 => Value::I32(raw as u32 as i32),
                    IntFormat::I64 => Value::I64(raw as i64),
                    unsigned => Value::int(unsigned, raw),
                }
            }
            Element::Uuid => {
                let mut b = [0u8; UUID_SIZE];
                r.read_exact(&mut b)?;
                Value::Uuid(b)
            }
            Element::Ipv4 => {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                Value::Ipv4(b)
            }
            Element::Ipv6 => {
                let mut b = [0u8; 16];
                r.read_exact(&mut b)?;
                Value::Ipv6(b)
            }
            Element::String => {
                let len = self.read_uint(r, prefix)? as usize;
                let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
                if len > remaining {
                    return Err(CodecError::LengthMismatch(format!(
                        "string of {} bytes with {} left",
                        len, remaining
                    )));
                }
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)?;
                Value::String(String::from_utf8_lossy(&buf).into_owned())
            }
        })
    }

    fn write_element(
        &self,
        w: &mut Vec<u8>,
        field: &str,
        element: Element,
        prefix: IntFormat,
        v: &Value,
    ) -> Result<(), CodecError> {
        let mismatch = |expected: &str| CodecError::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
        };
        match (element, v) {
            (Element::Int(IntFormat::U8), Value::U8(x)) => w.write_u8(*x)?,
            (Element::Int(IntFormat::U16), Value::U16(x)) => self.write_uint(w, IntFormat::U16, *x as u64)?,
            (Element::Int(IntFormat::U32), Value::U32(x)) => self.write_uint(w, IntFormat::U32, *x as u64)?,
            (Element::Int(IntFormat::U64), Value::U64(x)) => self.write_uint(w, IntFormat::U64, *x)?,
            (Element::Int(IntFormat::I8), Value::I8(x)) => w.write_i8(*x)?,
            (Element::Int(IntFormat::I16), Value::I16(x)) => {
                self.write_uint(w, IntFormat::U16, *x as u16 as u64)?
            }
            (Element::Int(IntFormat::I32), Value::I32(x)) => {
                self.write_uint(w, IntFormat::U32, *x as u32 as u64)?
            }
            (Element::Int(IntFormat::I64), Value::I64(x)) => self.write_uint(w, IntFormat::U64, *x as u64)?,
            (Element::Int(i), _) => return Err(mismatch(i.tag())),
            (Element::Uuid, Value::Uuid(b)) => w.write_all(b)?,
            (Element::Ipv4, Value::Ipv4(b)) => w.write_all(b)?,
            (Element::Ipv6, Value::Ipv6(b)) => w.write_all(b)?,
            (Element::String, Value::String(s)) => {
                if s.len() as u64 > prefix.max_unsigned() {
                    return Err(CodecError::LengthMismatch(format!(
                        "'{}' holds {} bytes, {} prefix allows {}",
                        field,
                        s.len(),
                        prefix.tag(),
                        prefix.max_unsigned()
                    )));
                }
                self.write_uint(w, prefix, s.len() as u64)?;
                w.write_all(s.as_bytes())?;
            }
            (Element::Uuid, _) => return Err(mismatch("uuid")),
            (Element::Ipv4, _) => return Err(mismatch("ipv4")),
            (Element::Ipv6, _) => return Err(mismatch("ipv6")),
            (Element::String, _) => return Err(mismatch("string")),
        }
        Ok(())
    }
}

struct Pending<'a, 'v> {
    slot: usize,
    layout: &'a StructLayout,
    values: &'v Fields,
}

struct Encoder<'c, 'a, 'v> {
    codec: &'c PlanCodec<'a>,
    out: Vec<u8>,
    pending: VecDeque<Pending<'a, 'v>>,
}

impl<'c, 'a, 'v> Encoder<'c, 'a, 'v> {
    fn encode_fields(
        &mut self,
        fields: &[FieldLayout],
        end: &Offset,
        values: &'v Fields,
        base: usize,
    ) -> Result<(), CodecError> {
        let mut facts = Facts::default();
        for f in fields {
            if !prerequisites_hold(&f.prerequisites, values)? {
                facts.absent.insert(f.name.clone());
                continue;
            }
            let value = values
                .get(&f.name)
                .ok_or_else(|| CodecError::MissingValue(f.name.clone()))?;

            if f.header > 0 {
                self.out.write_u8(f.tag.unwrap_or_default())?;
                self.out.write_all(&[0, 0])?;
            }
            let start = self.out.len();
            let expected = f.offset.evaluate(&facts).map(|o| base + o);
            if expected != Some(start) {
                return Err(CodecError::LayoutMismatch {
                    field: f.name.clone(),
                    expected,
                    actual: start,
                });
            }

            self.encode_value(f, value, values)?;
            let written = self.out.len() - start;
            if f.header > 0 {
                let len = u16::try_from(written).map_err(|_| {
                    CodecError::LengthMismatch(format!("TLV '{}' value of {} bytes", f.name, written))
                })?;
                self.codec.patch_u16(&mut self.out[start - 2..start], len);
            }
            facts.record(f, value, written);
        }

        let expected = end.evaluate(&facts).map(|o| base + o);
        if expected != Some(self.out.len()) {
            return Err(CodecError::LayoutMismatch {
                field: "<end>".to_string(),
                expected,
                actual: self.out.len(),
            });
        }
        Ok(())
    }

    fn encode_value(
        &mut self,
        f: &FieldLayout,
        value: &'v Value,
        siblings: &Fields,
    ) -> Result<(), CodecError> {
        let prefix = f.length_prefix.unwrap_or(IntFormat::U32);
        if let Some(element) = scalar(f.format) {
            return self
                .codec
                .write_element(&mut self.out, &f.name, element, prefix, value);
        }

        let mismatch = |expected: &str| CodecError::TypeMismatch {
            field: f.name.clone(),
            expected: expected.to_string(),
        };
        match f.format {
            Format::Struct | Format::RefStruct => {
                let m = value.as_struct().ok_or_else(|| mismatch("a struct"))?;
                let layout = self.codec.struct_layout(f)?;
                let base = self.out.len();
                self.encode_fields(&layout.members, &layout.end, m, base)
            }
            _ => {
                let items = value.as_array().ok_or_else(|| mismatch("an array"))?;
                check_count(f, items.len(), siblings)?;
                match f.format {
                    Format::Array(element) => {
                        for item in items {
                            self.codec
                                .write_element(&mut self.out, &f.name, element, prefix, item)?;
                        }
                    }
                    Format::StructArray => {
                        let layout = self.codec.struct_layout(f)?;
                        for item in items {
                            let m = item.as_struct().ok_or_else(|| mismatch("struct elements"))?;
                            let base = self.out.len();
                            self.encode_fields(&layout.members, &layout.end, m, base)?;
                        }
                    }
                    _ => {
                        let layout = self.codec.struct_layout(f)?;
                        for item in items {
                            let m = item.as_struct().ok_or_else(|| mismatch("struct elements"))?;
                            self.pending.push_back(Pending {
                                slot: self.out.len(),
                                layout,
                                values: m,
                            });
                            self.out.write_all(&[0; REF_SLOT_SIZE])?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_count(f: &FieldLayout, len: usize, siblings: &Fields) -> Result<(), CodecError> {
    let size_field = f.linkage.size_field().unwrap_or_default();
    let count = siblings
        .get(size_field)
        .and_then(Value::as_u64)
        .ok_or_else(|| CodecError::MissingValue(size_field.to_string()))?;
    if count != len as u64 {
        return Err(CodecError::LengthMismatch(format!(
            "'{}' has {} elements, '{}' says {}",
            f.name, len, size_field, count
        )));
    }
    Ok(())
}

struct Decoder<'c, 'a, 'b> {
    codec: &'c PlanCodec<'a>,
    cursor: Cursor<&'b [u8]>,
    /// Furthest byte read, including indirect elements.
    extent: usize,
}

impl Decoder<'_, '_, '_> {
    fn seek(&mut self, pos: usize) {
        self.cursor.set_position(pos as u64);
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn decode_fields(
        &mut self,
        fields: &[FieldLayout],
        end: &Offset,
        base: usize,
    ) -> Result<(Fields, usize), CodecError> {
        let mut values = Fields::new();
        let mut facts = Facts::default();
        for f in fields {
            if !prerequisites_hold(&f.prerequisites, &values)? {
                facts.absent.insert(f.name.clone());
                continue;
            }
            let offset = f
                .offset
                .evaluate(&facts)
                .ok_or_else(|| CodecError::LayoutMismatch {
                    field: f.name.clone(),
                    expected: None,
                    actual: self.position(),
                })?;
            let pos = base + offset;

            let tlv_len = if f.header > 0 {
                self.seek(pos.checked_sub(f.header).unwrap_or_default());
                let found = self.cursor.read_u8()?;
                let expected = f.tag.unwrap_or_default();
                if found != expected {
                    return Err(CodecError::TagMismatch {
                        field: f.name.clone(),
                        expected,
                        found,
                    });
                }
                Some(self.codec.read_uint(&mut self.cursor, IntFormat::U16)? as usize)
            } else {
                None
            };

            self.seek(pos);
            let value = self.decode_value(f, &values)?;
            let consumed = self.position() - pos;
            self.extent = self.extent.max(self.position());
            if let Some(len) = tlv_len {
                if len != consumed {
                    return Err(CodecError::LengthMismatch(format!(
                        "TLV '{}' declares {} bytes, value took {}",
                        f.name, len, consumed
                    )));
                }
            }
            facts.record(f, &value, consumed);
            values.insert(f.name.clone(), value);
        }

        let end = end.evaluate(&facts).ok_or_else(|| CodecError::LayoutMismatch {
            field: "<end>".to_string(),
            expected: None,
            actual: self.position(),
        })?;
        self.extent = self.extent.max(base + end);
        Ok((values, end))
    }

    /// Reads the value at the cursor and leaves the cursor just past its inline bytes.
    fn decode_value(&mut self, f: &FieldLayout, siblings: &Fields) -> Result<Value, CodecError> {
        let prefix = f.length_prefix.unwrap_or(IntFormat::U32);
        if let Some(element) = scalar(f.format) {
            return self.codec.read_element(&mut self.cursor, element, prefix);
        }
        if matches!(f.format, Format::Struct | Format::RefStruct) {
            let layout = self.codec.struct_layout(f)?;
            let start = self.position();
            let (m, size) = self.decode_fields(&layout.members, &layout.end, start)?;
            self.seek(start + size);
            return Ok(Value::Struct(m));
        }

        let size_field = f.linkage.size_field().unwrap_or_default();
        let count = siblings
            .get(size_field)
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::MissingValue(size_field.to_string()))?;
        let mut items = Vec::new();
        match f.format {
            Format::Array(element) => {
                for _ in 0..count {
                    items.push(self.codec.read_element(&mut self.cursor, element, prefix)?);
                }
            }
            Format::StructArray => {
                let layout = self.codec.struct_layout(f)?;
                for _ in 0..count {
                    let start = self.position();
                    let (m, size) = self.decode_fields(&layout.members, &layout.end, start)?;
                    self.seek(start + size);
                    items.push(Value::Struct(m));
                }
            }
            _ => {
                let layout = self.codec.struct_layout(f)?;
                let mut slots = Vec::new();
                for _ in 0..count {
                    slots.push(self.codec.read_uint(&mut self.cursor, IntFormat::U32)? as usize);
                }
                let resume = self.position();
                for slot in slots {
                    let (m, _) = self.decode_fields(&layout.members, &layout.end, slot)?;
                    items.push(Value::Struct(m));
                }
                self.seek(resume);
            }
        }
        Ok(Value::Array(items))
    }
}

/// Deterministic values for every field: array lengths vary with `seed`, and each
/// size field holds the length of the arrays that name it.
pub fn sample_instance(plan: &LayoutPlan, fields: &[FieldLayout], seed: u64) -> Fields {
    let mut lengths: HashMap<&str, u64> = HashMap::new();
    for (i, f) in fields.iter().enumerate() {
        if let Some(size_field) = f.linkage.size_field() {
            lengths
                .entry(size_field)
                .or_insert(1 + (seed + i as u64) % 3);
        }
    }

    let mut values = Fields::new();
    for (i, f) in fields.iter().enumerate() {
        let n = seed.wrapping_mul(31).wrapping_add(i as u64);
        let count = f
            .linkage
            .size_field()
            .and_then(|s| lengths.get(s))
            .copied()
            .unwrap_or_default();
        let value = match f.format {
            Format::Int(width) => match lengths.get(f.name.as_str()) {
                Some(len) => Value::int(width, *len),
                None => Value::int(width, n),
            },
            Format::Array(element) => Value::Array(
                (0..count)
                    .map(|k| sample_element(element, &f.name, n + k))
                    .collect(),
            ),
            Format::Struct | Format::RefStruct => sample_struct(plan, f, n),
            Format::StructArray | Format::RefStructArray => Value::Array(
                (0..count).map(|k| sample_struct(plan, f, n + k)).collect(),
            ),
            other => match scalar(other) {
                Some(element) => sample_element(element, &f.name, n),
                None => continue,
            },
        };
        values.insert(f.name.clone(), value);
    }
    values
}

fn sample_struct(plan: &LayoutPlan, f: &FieldLayout, seed: u64) -> Value {
    let members = f
        .linkage
        .struct_type()
        .and_then(|name| plan.get_struct(name))
        .map(|s| sample_instance(plan, &s.members, seed))
        .unwrap_or_default();
    Value::Struct(members)
}

fn sample_element(element: Element, name: &str, n: u64) -> Value {
    let byte = n as u8;
    match element {
        Element::Int(i) => Value::int(i, n),
        Element::Uuid => Value::Uuid([byte; UUID_SIZE]),
        Element::Ipv4 => Value::Ipv4([10, 0, byte, 1]),
        Element::Ipv6 => Value::Ipv6([byte; 16]),
        Element::String => Value::String(format!("{}-{}", name, n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ContainerKind;
    use crate::config::{Options, ProtocolVariant};

    fn plan(src: &str, variant: ProtocolVariant) -> LayoutPlan {
        crate::generate(src, &Options::new(variant)).unwrap()
    }

    const FIXED: &str = r#"[
      { "type": "Service", "name": "Basic" },
      { "type": "Struct", "name": "Entry", "contents": [
          { "name": "id", "format": "guint32" },
          { "name": "label", "format": "string" } ] },
      { "type": "Message", "name": "List", "id": 7,
        "response": [
          { "name": "count", "format": "guint32" },
          { "name": "entries", "format": "ref-struct-array", "struct-type": "Entry",
            "array-size-field": "count" },
          { "name": "status", "format": "guint8" },
          { "name": "extra", "format": "string",
            "prerequisites": [ { "field": "status", "operation": "==", "value": "1" } ] },
          { "name": "tail", "format": "guint16" } ] }
    ]"#;

    #[test]
    fn fixed_round_trip_with_indirect_elements() {
        let plan = plan(FIXED, ProtocolVariant::Fixed);
        let response = plan.messages[0].container(ContainerKind::Response).unwrap();
        let codec = PlanCodec::new(&plan, Endianness::Little);
        for seed in 0..4 {
            let values = sample_instance(&plan, &response.fields, seed);
            let bytes = codec.encode_container(response, &values).unwrap();
            let (decoded, consumed) = codec.decode_container(response, &bytes).unwrap();
            assert_eq!(consumed, bytes.len(), "seed {}", seed);
            let expected: Fields = values
                .into_iter()
                .filter(|(k, _)| decoded.contains_key(k))
                .collect();
            assert_eq!(decoded, expected, "seed {}", seed);
        }
    }

    #[test]
    fn gated_field_absent_shifts_later_fields() {
        let plan = plan(FIXED, ProtocolVariant::Fixed);
        let response = plan.messages[0].container(ContainerKind::Response).unwrap();
        let codec = PlanCodec::new(&plan, Endianness::Big);
        let mut values = Fields::new();
        values.insert("count".into(), Value::U32(0));
        values.insert("entries".into(), Value::Array(vec![]));
        values.insert("status".into(), Value::U8(0));
        values.insert("extra".into(), Value::String("ignored".into()));
        values.insert("tail".into(), Value::U16(0xbeef));
        let bytes = codec.encode_container(response, &values).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0xbe, 0xef]);
        let (decoded, consumed) = codec.decode_container(response, &bytes).unwrap();
        assert_eq!(consumed, 7);
        assert!(!decoded.contains_key("extra"));
        assert_eq!(decoded["tail"], Value::U16(0xbeef));

        values.insert("status".into(), Value::U8(1));
        let bytes = codec.encode_container(response, &values).unwrap();
        assert_eq!(bytes.len(), 7 + 4 + "ignored".len());
        let (decoded, _) = codec.decode_container(response, &bytes).unwrap();
        assert_eq!(decoded["extra"], Value::String("ignored".into()));
    }

    #[test]
    fn count_mismatch_rejected() {
        let plan = plan(FIXED, ProtocolVariant::Fixed);
        let response = plan.messages[0].container(ContainerKind::Response).unwrap();
        let codec = PlanCodec::new(&plan, Endianness::Little);
        let mut values = sample_instance(&plan, &response.fields, 0);
        values.insert("count".into(), Value::U32(9));
        assert!(matches!(
            codec.encode_container(response, &values),
            Err(CodecError::LengthMismatch(_))
        ));
    }

    #[test]
    fn tlv_headers_and_tags() {
        let src = r#"[
          { "type": "Service", "name": "DMS" }, { "type": "Client", "name": "DMS" },
          { "type": "Message-ID-Enum", "name": "DMS Message" },
          { "type": "Message", "name": "Get Ids", "id": "0x0025",
            "output": [
              { "name": "esn", "id": "0x10", "format": "string" },
              { "name": "code", "id": "0x02", "format": "guint16" } ] }
        ]"#;
        let plan = plan(src, ProtocolVariant::Tlv);
        let out = plan.messages[0].container(ContainerKind::Response).unwrap();
        let codec = PlanCodec::new(&plan, Endianness::Little);
        let mut values = Fields::new();
        values.insert("esn".into(), Value::String("ab".into()));
        values.insert("code".into(), Value::U16(0x0102));
        let bytes = codec.encode_container(out, &values).unwrap();
        assert_eq!(
            bytes,
            vec![0x10, 3, 0, 2, b'a', b'b', 0x02, 2, 0, 0x02, 0x01]
        );
        let (decoded, consumed) = codec.decode_container(out, &bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, values);

        let mut corrupt = bytes.clone();
        corrupt[6] = 0x03;
        assert!(matches!(
            codec.decode_container(out, &corrupt),
            Err(CodecError::TagMismatch { expected: 0x02, found: 0x03, .. })
        ));
    }

    #[test]
    fn string_length_comes_from_the_wire() {
        let src = r#"[
          { "type": "Service", "name": "Basic" },
          { "type": "Message", "name": "Label", "id": 3,
            "response": [
              { "name": "s", "format": "string" },
              { "name": "tail", "format": "guint16" } ] }
        ]"#;
        let plan = plan(src, ProtocolVariant::Fixed);
        let response = plan.messages[0].container(ContainerKind::Response).unwrap();
        let codec = PlanCodec::new(&plan, Endianness::Little);
        // One byte of invalid UTF-8 decodes to a three-byte replacement char.
        let bytes = [1, 0, 0, 0, 0xff, 0x34, 0x12];
        let (decoded, consumed) = codec.decode_container(response, &bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded["s"], Value::String("\u{fffd}".into()));
        assert_eq!(decoded["tail"], Value::U16(0x1234));
    }

    #[test]
    fn truncated_input() {
        let plan = plan(FIXED, ProtocolVariant::Fixed);
        let response = plan.messages[0].container(ContainerKind::Response).unwrap();
        let codec = PlanCodec::new(&plan, Endianness::Little);
        let values = sample_instance(&plan, &response.fields, 2);
        let bytes = codec.encode_container(response, &values).unwrap();
        assert!(codec.decode_container(response, &bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn symbolic_prerequisite_cannot_be_evaluated() {
        let p = Prerequisite {
            field: "mode".into(),
            operation: crate::ast::Operator::Eq,
            value: crate::ast::Literal::Name("MODE_ONLINE".into()),
        };
        let mut values = Fields::new();
        values.insert("mode".into(), Value::U8(1));
        assert!(matches!(
            prerequisites_hold(&[p], &values),
            Err(CodecError::Prerequisite(_))
        ));
    }
}
