//! Format Registry: the closed set of field formats and their wire-size rules.
//!
//! Pure lookup; every other stage asks this module how many bytes a format takes,
//! whether it is array- or struct-shaped, and whether decoding needs a length or
//! count first.

use std::fmt;
use std::str::FromStr;

/// Size of one indirect struct-array slot (a `u32` offset from the container start).
pub const REF_SLOT_SIZE: usize = 4;

/// Size of an opaque identifier (`uuid`).
pub const UUID_SIZE: usize = 16;

/// Fixed-width integer formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntFormat {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl IntFormat {
    pub fn size(self) -> usize {
        match self {
            IntFormat::U8 | IntFormat::I8 => 1,
            IntFormat::U16 | IntFormat::I16 => 2,
            IntFormat::U32 | IntFormat::I32 => 4,
            IntFormat::U64 | IntFormat::I64 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntFormat::I8 | IntFormat::I16 | IntFormat::I32 | IntFormat::I64
        )
    }

    pub fn tag(self) -> &'static str {
        match self {
            IntFormat::U8 => "guint8",
            IntFormat::U16 => "guint16",
            IntFormat::U32 => "guint32",
            IntFormat::U64 => "guint64",
            IntFormat::I8 => "gint8",
            IntFormat::I16 => "gint16",
            IntFormat::I32 => "gint32",
            IntFormat::I64 => "gint64",
        }
    }

    fn from_tag(tag: &str) -> Option<IntFormat> {
        Some(match tag {
            "guint8" => IntFormat::U8,
            "guint16" => IntFormat::U16,
            "guint32" => IntFormat::U32,
            "guint64" => IntFormat::U64,
            "gint8" => IntFormat::I8,
            "gint16" => IntFormat::I16,
            "gint32" => IntFormat::I32,
            "gint64" => IntFormat::I64,
            _ => return None,
        })
    }

    /// Widths a string length prefix may use.
    pub fn is_length_prefix(self) -> bool {
        !self.is_signed() && self.size() <= 4
    }

    /// Largest value representable; used to bound length prefixes and counts.
    pub fn max_unsigned(self) -> u64 {
        match self.size() {
            8 => u64::MAX,
            n => (1u64 << (n * 8 - usize::from(self.is_signed()))) - 1,
        }
    }
}

/// Element formats allowed inside a plain (non-struct) array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    Int(IntFormat),
    Uuid,
    String,
    Ipv4,
    Ipv6,
}

impl Element {
    /// Wire size of one element, or `None` for length-prefixed strings.
    pub fn size(self) -> Option<usize> {
        match self {
            Element::Int(i) => Some(i.size()),
            Element::Uuid => Some(UUID_SIZE),
            Element::Ipv4 => Some(4),
            Element::Ipv6 => Some(16),
            Element::String => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Element::Int(i) => i.tag(),
            Element::Uuid => "uuid",
            Element::String => "string",
            Element::Ipv4 => "ipv4",
            Element::Ipv6 => "ipv6",
        }
    }

    fn from_tag(tag: &str) -> Option<Element> {
        match tag {
            "uuid" => Some(Element::Uuid),
            "string" => Some(Element::String),
            "ipv4" => Some(Element::Ipv4),
            "ipv6" => Some(Element::Ipv6),
            "byte" => Some(Element::Int(IntFormat::U8)),
            other => IntFormat::from_tag(other).map(Element::Int),
        }
    }
}

/// A field format, keyed by its schema tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Int(IntFormat),
    Uuid,
    String,
    Ipv4,
    Ipv6,
    /// Boxed/optional IPv4 address: same wire bytes, boxed in generated code.
    RefIpv4,
    RefIpv6,
    Array(Element),
    Struct,
    /// Boxed struct: same wire bytes as `Struct`.
    RefStruct,
    /// Struct elements stored back-to-back.
    StructArray,
    /// One offset slot per element; elements laid out out-of-line.
    RefStructArray,
}

/// Lookup of a tag the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown format '{0}'")]
pub struct UnknownFormat(pub String);

impl Format {
    pub fn lookup(tag: &str) -> Result<Format, UnknownFormat> {
        tag.parse()
    }

    /// Fixed wire size in bytes, or 0 when the size is only known after decoding.
    pub fn fixed_size(&self) -> usize {
        match self {
            Format::Int(i) => i.size(),
            Format::Uuid => UUID_SIZE,
            Format::Ipv4 | Format::RefIpv4 => 4,
            Format::Ipv6 | Format::RefIpv6 => 16,
            Format::String
            | Format::Array(_)
            | Format::Struct
            | Format::RefStruct
            | Format::StructArray
            | Format::RefStructArray => 0,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Format::Array(_) | Format::StructArray | Format::RefStructArray
        )
    }

    pub fn is_struct_shaped(&self) -> bool {
        matches!(
            self,
            Format::Struct | Format::RefStruct | Format::StructArray | Format::RefStructArray
        )
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self, Format::RefIpv4 | Format::RefIpv6 | Format::RefStruct)
    }

    /// Size of one in-container array element, when it is fixed.
    ///
    /// Struct arrays are resolved by the layout engine (the element is a struct
    /// layout); indirect struct arrays store fixed offset slots.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            Format::Array(e) => e.size(),
            Format::RefStructArray => Some(REF_SLOT_SIZE),
            _ => None,
        }
    }

    /// Whether decoding this format first requires a length or element count.
    pub fn needs_length(&self) -> bool {
        matches!(self, Format::String) || self.is_array()
    }

    /// Usable as the `array-size-field` of an array. Signed widths are refused:
    /// a negative element count has no wire meaning.
    pub fn can_count(&self) -> bool {
        matches!(self, Format::Int(i) if !i.is_signed())
    }

    pub fn as_int(&self) -> Option<IntFormat> {
        match self {
            Format::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn tag(&self) -> String {
        match self {
            Format::Int(i) => i.tag().to_string(),
            Format::Uuid => "uuid".to_string(),
            Format::String => "string".to_string(),
            Format::Ipv4 => "ipv4".to_string(),
            Format::Ipv6 => "ipv6".to_string(),
            Format::RefIpv4 => "ref-ipv4".to_string(),
            Format::RefIpv6 => "ref-ipv6".to_string(),
            Format::Array(e) => format!("{}-array", e.tag()),
            Format::Struct => "struct".to_string(),
            Format::RefStruct => "ref-struct".to_string(),
            Format::StructArray => "struct-array".to_string(),
            Format::RefStructArray => "ref-struct-array".to_string(),
        }
    }
}

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let format = match tag {
            "uuid" => Format::Uuid,
            "string" => Format::String,
            "ipv4" => Format::Ipv4,
            "ipv6" => Format::Ipv6,
            "ref-ipv4" => Format::RefIpv4,
            "ref-ipv6" => Format::RefIpv6,
            "struct" => Format::Struct,
            "ref-struct" => Format::RefStruct,
            "struct-array" => Format::StructArray,
            "ref-struct-array" => Format::RefStructArray,
            other => {
                if let Some(i) = IntFormat::from_tag(other) {
                    Format::Int(i)
                } else if let Some(e) = other.strip_suffix("-array").and_then(Element::from_tag) {
                    Format::Array(e)
                } else {
                    return Err(UnknownFormat(other.to_string()));
                }
            }
        };
        Ok(format)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Parse a `size-prefix-format` value.
pub fn prefix_format(tag: &str) -> Result<IntFormat, UnknownFormat> {
    match IntFormat::from_tag(tag) {
        Some(i) if i.is_length_prefix() => Ok(i),
        _ => Err(UnknownFormat(tag.to_string())),
    }
}
