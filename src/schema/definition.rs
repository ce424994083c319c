//! Record definitions - the static schema descriptor of one table

use super::types::{Classification, FieldType, StorageType};
use crate::codec::{self, IDENTITY_COLUMN};
use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn identifier_re() -> &'static Regex {
    IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Whether a name may be used as a table or column identifier
pub fn is_identifier(name: &str) -> bool {
    identifier_re().is_match(name)
}

/// How a table's `id` column is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentityKind {
    /// `INTEGER PRIMARY KEY AUTOINCREMENT`, assigned by the store
    #[default]
    Auto,
    /// Caller-supplied integer key
    Integer,
    /// Caller-supplied text key
    Text,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Auto => "auto",
            IdentityKind::Integer => "int",
            IdentityKind::Text => "str",
        }
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            IdentityKind::Auto | IdentityKind::Integer => StorageType::Integer,
            IdentityKind::Text => StorageType::Text,
        }
    }

    /// Column definition used when creating the table
    pub fn column_sql(&self) -> String {
        match self {
            IdentityKind::Auto => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", IDENTITY_COLUMN),
            IdentityKind::Integer => format!("{} INTEGER PRIMARY KEY", IDENTITY_COLUMN),
            IdentityKind::Text => format!("{} TEXT PRIMARY KEY", IDENTITY_COLUMN),
        }
    }
}

impl FromStr for IdentityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" | "autoincrement" => Ok(IdentityKind::Auto),
            "int" | "integer" => Ok(IdentityKind::Integer),
            "str" | "text" | "string" => Ok(IdentityKind::Text),
            _ => Err(Error::InvalidDefinition(format!("Unknown identity kind: {}", s))),
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One declared field with its precomputed column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub classification: Classification,
    pub storage: StorageType,
    /// Stored (prefixed) column name
    pub column: String,
}

impl FieldDef {
    fn new(name: String, ty: FieldType) -> Self {
        let classification = ty.classification();
        let column = codec::column_name(&name, classification);
        Self {
            storage: ty.storage_type(),
            classification,
            column,
            name,
            ty,
        }
    }
}

/// Schema of one record type. The name doubles as the table name.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDefinition {
    name: String,
    identity: IdentityKind,
    fields: Vec<FieldDef>,
}

impl RecordDefinition {
    pub fn builder(name: impl Into<String>) -> RecordDefinitionBuilder {
        RecordDefinitionBuilder {
            name: name.into(),
            identity: IdentityKind::Auto,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> IdentityKind {
        self.identity
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field stored in `column`. SQLite column names are case-insensitive.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column.eq_ignore_ascii_case(column))
    }

    /// Expected non-identity columns as (name, storage type)
    pub fn expected_columns(&self) -> impl Iterator<Item = (&str, StorageType)> {
        self.fields.iter().map(|f| (f.column.as_str(), f.storage))
    }

    /// Names of record types this definition references directly or inside
    /// collections
    pub fn referenced_types(&self) -> Vec<&str> {
        fn collect<'a>(ty: &'a FieldType, out: &mut Vec<&'a str>) {
            match ty {
                FieldType::Record(name) => out.push(name),
                FieldType::List(inner) | FieldType::Map(inner) | FieldType::Set(inner) => {
                    collect(inner, out)
                }
                FieldType::Tuple(items) => items.iter().for_each(|t| collect(t, out)),
                _ => {}
            }
        }

        let mut out = Vec::new();
        for field in &self.fields {
            collect(&field.ty, &mut out);
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Builder validating names once, at registration time.
#[derive(Debug, Clone)]
pub struct RecordDefinitionBuilder {
    name: String,
    identity: IdentityKind,
    fields: Vec<(String, FieldType)>,
}

impl RecordDefinitionBuilder {
    pub fn identity(mut self, identity: IdentityKind) -> Self {
        self.identity = identity;
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    pub fn build(self) -> Result<RecordDefinition> {
        if !is_identifier(&self.name) {
            return Err(Error::InvalidDefinition(format!(
                "record name is not an identifier: {:?}",
                self.name
            )));
        }
        if self.name.starts_with("sqlite_") {
            return Err(Error::InvalidDefinition(format!(
                "record name uses the reserved sqlite_ prefix: {}",
                self.name
            )));
        }

        let mut fields: Vec<FieldDef> = Vec::with_capacity(self.fields.len());
        for (name, ty) in self.fields {
            if !is_identifier(&name) {
                return Err(Error::InvalidDefinition(format!(
                    "{}: field name is not an identifier: {:?}",
                    self.name, name
                )));
            }
            if name.eq_ignore_ascii_case(IDENTITY_COLUMN) {
                return Err(Error::InvalidDefinition(format!(
                    "{}: `id` is the identity column; declare it with .identity()",
                    self.name
                )));
            }
            if let Some(prefix) = codec::reserved_prefix_of(&name) {
                return Err(Error::InvalidDefinition(format!(
                    "{}: field {} starts with reserved prefix {}",
                    self.name, name, prefix
                )));
            }
            let field = FieldDef::new(name, ty);
            if let Some(other) = fields
                .iter()
                .find(|f| f.column.eq_ignore_ascii_case(&field.column))
            {
                return Err(Error::InvalidDefinition(format!(
                    "{}: fields {} and {} both map to column {}",
                    self.name, other.name, field.name, other.column
                )));
            }
            fields.push(field);
        }

        Ok(RecordDefinition {
            name: self.name,
            identity: self.identity,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> RecordDefinition {
        RecordDefinition::builder("User")
            .field("name", FieldType::Text)
            .field("tags", FieldType::List(Box::new(FieldType::Text)))
            .field("owner", FieldType::Record("Org".into()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_columns_are_prefixed() {
        let def = user();
        let columns: Vec<_> = def.expected_columns().collect();
        assert_eq!(
            columns,
            vec![
                ("name", StorageType::Text),
                ("LISTtags", StorageType::Text),
                ("FOREIGNIDowner", StorageType::Text),
            ]
        );
        assert_eq!(def.field_by_column("LISTtags").unwrap().name, "tags");
        assert_eq!(def.identity(), IdentityKind::Auto);
    }

    #[test]
    fn test_rejects_reserved_prefix() {
        let err = RecordDefinition::builder("User")
            .field("LISTthing", FieldType::Text)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(_)));

        assert!(RecordDefinition::builder("User")
            .field("FOREIGNIDx", FieldType::Integer)
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(RecordDefinition::builder("bad name").build().is_err());
        assert!(RecordDefinition::builder("sqlite_master").build().is_err());
        assert!(RecordDefinition::builder("User").field("id", FieldType::Integer).build().is_err());
        assert!(RecordDefinition::builder("User").field("a;b", FieldType::Text).build().is_err());
        assert!(RecordDefinition::builder("User")
            .field("name", FieldType::Text)
            .field("name", FieldType::Integer)
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_colliding_columns() {
        let err = RecordDefinition::builder("User")
            .field("tags", FieldType::List(Box::new(FieldType::Text)))
            .field("listtags", FieldType::Text)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(ref m) if m.contains("LISTtags")));

        assert!(RecordDefinition::builder("User")
            .field("owner", FieldType::Record("Org".into()))
            .field("ForeignIDOwner", FieldType::Integer)
            .build()
            .is_err());
        assert!(RecordDefinition::builder("User")
            .field("Name", FieldType::Text)
            .field("name", FieldType::Text)
            .build()
            .is_err());
    }

    #[test]
    fn test_identity_kinds() {
        assert_eq!("auto".parse::<IdentityKind>().unwrap(), IdentityKind::Auto);
        assert_eq!("str".parse::<IdentityKind>().unwrap(), IdentityKind::Text);
        assert_eq!("integer".parse::<IdentityKind>().unwrap(), IdentityKind::Integer);
        assert!("uuid".parse::<IdentityKind>().is_err());
        assert_eq!(IdentityKind::Text.column_sql(), "id TEXT PRIMARY KEY");
    }

    #[test]
    fn test_referenced_types() {
        let def = RecordDefinition::builder("Team")
            .field("lead", FieldType::Record("User".into()))
            .field(
                "members",
                FieldType::parse_with("list[User]", &|name| name == "User").unwrap(),
            )
            .field("org", FieldType::Record("Org".into()))
            .build()
            .unwrap();
        assert_eq!(def.referenced_types(), vec!["Org", "User"]);
    }
}
