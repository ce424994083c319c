//! Type mapper - declared field types, storage types and classification
//!
//! Every declared field type maps to one SQLite storage type and one
//! classification. The classification decides the column-name prefix and
//! whether the value is stored verbatim, as a reference token, or as JSON.

use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use std::fmt;
use std::str::FromStr;

/// Declared semantic type of a record field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    /// Embedded record of the named definition
    Record(String),
    /// Homogeneous ordered collection
    List(Box<FieldType>),
    /// String-keyed mapping
    Map(Box<FieldType>),
    /// Fixed-arity heterogeneous sequence
    Tuple(Vec<FieldType>),
    Set(Box<FieldType>),
    /// Arbitrary JSON-shaped value
    Json,
    /// Unrecognized scalar; stored as TEXT
    Other(String),
}

/// SQLite column storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Text,
    Integer,
    Real,
}

/// How a field's value is laid out in its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Raw value in its own column
    Scalar,
    /// Reference token pointing at a row of another table
    Reference,
    /// JSON array
    List,
    /// JSON object
    Mapping,
    /// Any other JSON-encoded container
    Structured,
}

impl StorageType {
    /// Storage type for a declared field type
    pub fn of(ty: &FieldType) -> Self {
        match ty {
            FieldType::Integer | FieldType::Boolean => StorageType::Integer,
            FieldType::Float => StorageType::Real,
            _ => StorageType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Text => "TEXT",
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
        }
    }

    /// Zero value written into new columns and omitted fields
    pub fn default_value(&self) -> SqlValue {
        match self {
            StorageType::Text => SqlValue::Text(String::new()),
            StorageType::Integer => SqlValue::Integer(0),
            StorageType::Real => SqlValue::Real(0.0),
        }
    }

    /// Interpret a declared column type as reported by `PRAGMA table_info`
    pub fn from_declared(decl: &str) -> Option<Self> {
        match decl.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(StorageType::Text),
            "INTEGER" => Some(StorageType::Integer),
            "REAL" => Some(StorageType::Real),
            _ => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Classification {
    /// Classify a declared field type
    pub fn of(ty: &FieldType) -> Self {
        match ty {
            FieldType::Record(_) => Classification::Reference,
            FieldType::List(_) => Classification::List,
            FieldType::Map(_) => Classification::Mapping,
            FieldType::Tuple(_) | FieldType::Set(_) | FieldType::Json => {
                Classification::Structured
            }
            _ => Classification::Scalar,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Scalar => "scalar",
            Classification::Reference => "reference",
            Classification::List => "list",
            Classification::Mapping => "mapping",
            Classification::Structured => "structured",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Classification::Scalar)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FieldType {
    pub fn storage_type(&self) -> StorageType {
        match Classification::of(self) {
            Classification::Scalar => StorageType::of(self),
            _ => StorageType::Text,
        }
    }

    pub fn classification(&self) -> Classification {
        Classification::of(self)
    }

    /// Parse a type expression such as `list[str]` or `dict[str, User]`.
    ///
    /// Bare identifiers for which `is_record` returns true become record
    /// references; any other unknown identifier is an opaque scalar.
    pub fn parse_with(expr: &str, is_record: &dyn Fn(&str) -> bool) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::InvalidDefinition("empty type expression".to_string()));
        }

        if let Some(open) = expr.find('[') {
            let inner = expr[open + 1..].strip_suffix(']').ok_or_else(|| {
                Error::InvalidDefinition(format!("unbalanced brackets in type: {}", expr))
            })?;
            let head = expr[..open].trim();
            let args = split_type_args(inner)?
                .into_iter()
                .map(|arg| Self::parse_with(arg, is_record))
                .collect::<Result<Vec<_>>>()?;

            return match (head, args.as_slice()) {
                ("list", [item]) => Ok(FieldType::List(Box::new(item.clone()))),
                ("set", [item]) => Ok(FieldType::Set(Box::new(item.clone()))),
                ("dict", [FieldType::Text, value]) => Ok(FieldType::Map(Box::new(value.clone()))),
                ("dict", _) => Err(Error::InvalidDefinition(format!(
                    "mappings must be dict[str, T]: {}",
                    expr
                ))),
                ("tuple", items) if !items.is_empty() => Ok(FieldType::Tuple(items.to_vec())),
                _ => Err(Error::InvalidDefinition(format!("unsupported type: {}", expr))),
            };
        }

        let ty = match expr {
            "str" | "string" | "text" => FieldType::Text,
            "int" | "integer" => FieldType::Integer,
            "float" | "real" => FieldType::Float,
            "bool" | "boolean" => FieldType::Boolean,
            // Unparameterized containers hold arbitrary JSON
            "list" => FieldType::List(Box::new(FieldType::Json)),
            "dict" => FieldType::Map(Box::new(FieldType::Json)),
            "set" => FieldType::Set(Box::new(FieldType::Json)),
            "json" | "tuple" => FieldType::Json,
            name if is_record(name) => FieldType::Record(name.to_string()),
            name => FieldType::Other(name.to_string()),
        };
        Ok(ty)
    }
}

/// Split the arguments of a generic type on top-level commas
fn split_type_args(inner: &str) -> Result<Vec<&str>> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::InvalidDefinition(format!("unbalanced brackets in type: {}", inner))
                })?
            }
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    if depth != 0 || args.iter().any(|a| a.is_empty()) {
        return Err(Error::InvalidDefinition(format!("malformed type arguments: {}", inner)));
    }
    Ok(args)
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with(s, &|_| false)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => write!(f, "str"),
            FieldType::Integer => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
            FieldType::Boolean => write!(f, "bool"),
            FieldType::Record(name) | FieldType::Other(name) => write!(f, "{}", name),
            FieldType::List(item) => write!(f, "list[{}]", item),
            FieldType::Map(value) => write!(f, "dict[str, {}]", value),
            FieldType::Set(item) => write!(f, "set[{}]", item),
            FieldType::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "tuple[{}]", parts.join(", "))
            }
            FieldType::Json => write!(f, "json"),
        }
    }
}
