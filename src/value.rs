//! Runtime values for the reference codec.

use crate::format::IntFormat;
use std::collections::BTreeMap;
use std::fmt;

/// Field name to value, ordered for stable comparison and printing.
pub type Fields = BTreeMap<String, Value>;

/// A single decoded value (field or compound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Uuid([u8; 16]),
    String(String),
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
    Array(Vec<Value>),
    Struct(Fields),
}

impl Value {
    /// Integer value of the given width from a generic number, wrapping on overflow.
    pub fn int(format: IntFormat, n: u64) -> Value {
        match format {
            IntFormat::U8 => Value::U8(n as u8),
            IntFormat::U16 => Value::U16(n as u16),
            IntFormat::U32 => Value::U32(n as u32),
            IntFormat::U64 => Value::U64(n),
            IntFormat::I8 => Value::I8(n as i8),
            IntFormat::I16 => Value::I16(n as i16),
            IntFormat::I32 => Value::I32(n as i32),
            IntFormat::I64 => Value::I64(n as i64),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(x) => Some(*x as u64),
            Value::U16(x) => Some(*x as u64),
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::I8(x) => Some(*x as i128),
            Value::I16(x) => Some(*x as i128),
            Value::I32(x) => Some(*x as i128),
            Value::I64(x) => Some(*x as i128),
            other => other.as_u64().map(i128::from),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Fields> {
        match self {
            Value::Struct(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(x) => write!(f, "{}", x),
            Value::U16(x) => write!(f, "{}", x),
            Value::U32(x) => write!(f, "{}", x),
            Value::U64(x) => write!(f, "{}", x),
            Value::I8(x) => write!(f, "{}", x),
            Value::I16(x) => write!(f, "{}", x),
            Value::I32(x) => write!(f, "{}", x),
            Value::I64(x) => write!(f, "{}", x),
            Value::Uuid(b) => {
                for (i, x) in b.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        f.write_str("-")?;
                    }
                    write!(f, "{:02x}", x)?;
                }
                Ok(())
            }
            Value::String(s) => write!(f, "{:?}", s),
            Value::Ipv4(b) => write!(f, "{}", std::net::Ipv4Addr::from(*b)),
            Value::Ipv6(b) => write!(f, "{}", std::net::Ipv6Addr::from(*b)),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Value::Struct(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_widths() {
        assert_eq!(Value::int(IntFormat::U8, 300), Value::U8(44));
        assert_eq!(Value::int(IntFormat::I16, 7).as_i128(), Some(7));
        assert_eq!(Value::U32(9).as_u64(), Some(9));
        assert_eq!(Value::I32(-1).as_u64(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Value::Ipv4([10, 0, 0, 1]).to_string(), "10.0.0.1");
        let mut m = Fields::new();
        m.insert("b".into(), Value::String("x".into()));
        m.insert("a".into(), Value::Array(vec![Value::U8(1), Value::U8(2)]));
        assert_eq!(Value::Struct(m).to_string(), r#"{a: [1, 2], b: "x"}"#);
        let id = Value::Uuid([0xab; 16]).to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(&id[8..9], "-");
    }
}
