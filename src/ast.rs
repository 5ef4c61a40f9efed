//! Raw schema declarations, as read from the data file and before common-fragment
//! expansion. Formats are still tag strings here; the model builder types them.

use std::fmt;

/// Root of one service's declarations.
#[derive(Debug, Clone, Default)]
pub struct SchemaDecl {
    pub service: Option<String>,
    pub client: Option<String>,
    pub message_id_enum: Option<String>,
    pub messages: Vec<MessageDecl>,
    pub structs: Vec<StructDecl>,
    pub common_fields: Vec<CommonFieldDecl>,
    pub common_prerequisites: Vec<CommonPrerequisiteDecl>,
}

/// Direction of a container within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerKind {
    Request,
    Set,
    Response,
    Notification,
}

impl ContainerKind {
    /// Input containers are built by the caller; output containers are parsed.
    pub fn is_input(self) -> bool {
        matches!(self, ContainerKind::Request | ContainerKind::Set)
    }

    /// Canonical record key of this container.
    pub fn name(self) -> &'static str {
        match self {
            ContainerKind::Request => "request",
            ContainerKind::Set => "set",
            ContainerKind::Response => "response",
            ContainerKind::Notification => "notification",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct MessageDecl {
    pub name: String,
    pub service: Option<String>,
    pub id: u32,
    pub containers: Vec<(ContainerKind, Vec<FieldEntry>)>,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<FieldEntry>,
}

/// One entry of a field list: an explicit field or a reference to a common fragment.
#[derive(Debug, Clone)]
pub enum FieldEntry {
    Inline(FieldDecl),
    CommonRef {
        name: String,
        /// Replaces the template's prerequisites when present.
        prerequisites: Option<Vec<PrerequisiteEntry>>,
    },
}

/// A field declaration. `P` is the prerequisite representation: raw entries
/// before expansion, plain [`PrerequisiteDecl`]s after.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl<P = PrerequisiteEntry> {
    pub name: String,
    pub tag: Option<u8>,
    pub mandatory: bool,
    pub format: String,
    pub array_size_field: Option<String>,
    pub struct_type: Option<String>,
    pub size_prefix: Option<String>,
    pub prerequisites: Vec<P>,
    /// Common fragment this field was copied from.
    pub origin: Option<String>,
}

pub type ExpandedField = FieldDecl<PrerequisiteDecl>;

#[derive(Debug, Clone, PartialEq)]
pub enum PrerequisiteEntry {
    Inline(PrerequisiteDecl),
    CommonRef(String),
}

/// `field operation value`; a list of these is conjunctive.
#[derive(Debug, Clone, PartialEq)]
pub struct PrerequisiteDecl {
    pub field: String,
    pub operation: Operator,
    pub value: Literal,
}

impl PrerequisiteDecl {
    /// Sibling field the condition reads (first segment of a dotted path).
    pub fn sibling(&self) -> &str {
        self.field.split('.').next().unwrap_or(&self.field)
    }
}

impl fmt::Display for PrerequisiteDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operation, self.value)
    }
}

#[derive(Debug, Clone)]
pub struct CommonFieldDecl {
    pub common_ref: String,
    pub field: FieldDecl,
}

#[derive(Debug, Clone)]
pub struct CommonPrerequisiteDecl {
    pub common_ref: String,
    pub prerequisite: PrerequisiteDecl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Operator> {
        Some(match s.trim() {
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            _ => return None,
        })
    }

    pub fn holds(self, lhs: i128, rhs: i128) -> bool {
        match self {
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        })
    }
}

/// Prerequisite operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Hex(u64),
    /// Symbolic value (an enum member name), compared by the backend.
    Name(String),
}

impl Literal {
    pub fn parse(s: &str) -> Literal {
        let s = s.trim();
        if s == "true" || s == "TRUE" {
            return Literal::Bool(true);
        }
        if s == "false" || s == "FALSE" {
            return Literal::Bool(false);
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            if let Ok(n) = u64::from_str_radix(hex, 16) {
                return Literal::Hex(n);
            }
        }
        if let Ok(n) = s.parse::<i64>() {
            return Literal::Int(n);
        }
        Literal::Name(s.to_string())
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Literal::Int(i) => Some(*i as i128),
            Literal::Hex(h) => Some(*h as i128),
            Literal::Bool(b) => Some(i128::from(*b)),
            Literal::Name(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Hex(h) => write!(f, "0x{:x}", h),
            Literal::Name(n) => f.write_str(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_parse() {
        assert_eq!(Literal::parse("1"), Literal::Int(1));
        assert_eq!(Literal::parse("-3"), Literal::Int(-3));
        assert_eq!(Literal::parse("0x1F"), Literal::Hex(31));
        assert_eq!(Literal::parse("TRUE"), Literal::Bool(true));
        assert_eq!(
            Literal::parse("QMI_PROTOCOL_ERROR_NONE"),
            Literal::Name("QMI_PROTOCOL_ERROR_NONE".into())
        );
    }

    #[test]
    fn prerequisite_sibling_is_first_path_segment() {
        let p = PrerequisiteDecl {
            field: "result.status".into(),
            operation: Operator::Eq,
            value: Literal::Int(0),
        };
        assert_eq!(p.sibling(), "result");
        assert_eq!(p.to_string(), "result.status == 0");
    }

    #[test]
    fn operators() {
        assert!(Operator::parse(">=").unwrap().holds(3, 3));
        assert!(!Operator::parse("!=").unwrap().holds(3, 3));
        assert!(Operator::parse("=>").is_none());
    }
}
