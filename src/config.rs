//! Generation options: protocol variant and wire conventions.

use crate::format::IntFormat;
use std::fmt;
use std::str::FromStr;

/// Which of the two modem control protocol families a schema describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVariant {
    /// Every container field travels as its own tagged TLV (1-byte tag, 2-byte length).
    Tlv,
    /// Containers are contiguous information buffers without per-field headers.
    Fixed,
}

impl ProtocolVariant {
    /// Bytes preceding each container field's value on the wire.
    pub fn field_header_size(self) -> usize {
        match self {
            ProtocolVariant::Tlv => 3,
            ProtocolVariant::Fixed => 0,
        }
    }

    /// Metadata record kinds a schema of this variant must declare.
    pub fn required_sections(self) -> &'static [&'static str] {
        match self {
            ProtocolVariant::Tlv => &["Service", "Client", "Message-ID-Enum"],
            ProtocolVariant::Fixed => &["Service"],
        }
    }

    pub fn default_string_prefix(self) -> IntFormat {
        match self {
            ProtocolVariant::Tlv => IntFormat::U8,
            ProtocolVariant::Fixed => IntFormat::U32,
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVariant::Tlv => write!(f, "tlv"),
            ProtocolVariant::Fixed => write!(f, "fixed"),
        }
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tlv" => Ok(ProtocolVariant::Tlv),
            "fixed" => Ok(ProtocolVariant::Fixed),
            other => Err(format!("unknown protocol variant '{}' (expected tlv or fixed)", other)),
        }
    }
}

/// Options for one generation run.
#[derive(Debug, Clone)]
pub struct Options {
    pub variant: ProtocolVariant,
    /// Length prefix width for strings without `size-prefix-format`; variant default when `None`.
    pub string_prefix: Option<IntFormat>,
}

impl Options {
    pub fn new(variant: ProtocolVariant) -> Self {
        Options {
            variant,
            string_prefix: None,
        }
    }

    pub fn with_string_prefix(mut self, prefix: IntFormat) -> Self {
        self.string_prefix = Some(prefix);
        self
    }

    pub fn string_prefix(&self) -> IntFormat {
        self.string_prefix
            .unwrap_or_else(|| self.variant.default_string_prefix())
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new(ProtocolVariant::Fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_from_str() {
        assert_eq!("TLV".parse::<ProtocolVariant>(), Ok(ProtocolVariant::Tlv));
        assert_eq!("fixed".parse::<ProtocolVariant>(), Ok(ProtocolVariant::Fixed));
        assert!("mbim".parse::<ProtocolVariant>().is_err());
    }

    #[test]
    fn string_prefix_defaults_follow_variant() {
        assert_eq!(Options::new(ProtocolVariant::Tlv).string_prefix(), IntFormat::U8);
        assert_eq!(Options::default().string_prefix(), IntFormat::U32);
        let o = Options::new(ProtocolVariant::Tlv).with_string_prefix(IntFormat::U16);
        assert_eq!(o.string_prefix(), IntFormat::U16);
    }
}
