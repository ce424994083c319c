//! Column codec - column-name prefixes and reference tokens
//!
//! Column names carry their field's classification as a prefix:
//!
//! | Classification | Column           | Stored value                 |
//! |----------------|------------------|------------------------------|
//! | scalar         | `<field>`        | raw value                    |
//! | reference      | `FOREIGNID<field>` | `$ID:<Type>:<identity>`    |
//! | list           | `LIST<field>`    | JSON array (`""` when empty) |
//! | mapping        | `DICT<field>`    | JSON object (`""` when empty)|
//! | structured     | `JSON<field>`    | JSON text                    |
//!
//! The same prefixes tag keys of JSON objects nested inside collections.

use crate::record::Identity;
use crate::schema::{Classification, IdentityKind};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

pub const FOREIGN_ID_PREFIX: &str = "FOREIGNID";
pub const LIST_PREFIX: &str = "LIST";
pub const DICT_PREFIX: &str = "DICT";
pub const JSON_PREFIX: &str = "JSON";

/// Prefix marking a string value as a reference token
pub const TOKEN_PREFIX: &str = "$ID:";

/// Prefixes no field name or map key may start with
pub const RESERVED_PREFIXES: &[&str] = &[FOREIGN_ID_PREFIX, LIST_PREFIX, DICT_PREFIX, JSON_PREFIX];

/// Name of the identity column in every table
pub const IDENTITY_COLUMN: &str = "id";

/// Column-name prefix for a classification (`None` for scalars)
pub fn prefix_for(classification: Classification) -> Option<&'static str> {
    match classification {
        Classification::Scalar => None,
        Classification::Reference => Some(FOREIGN_ID_PREFIX),
        Classification::List => Some(LIST_PREFIX),
        Classification::Mapping => Some(DICT_PREFIX),
        Classification::Structured => Some(JSON_PREFIX),
    }
}

/// Stored column name for a field
pub fn column_name(field: &str, classification: Classification) -> String {
    match prefix_for(classification) {
        Some(prefix) => format!("{}{}", prefix, field),
        None => field.to_string(),
    }
}

/// Split a stored column name (or prefixed map key) into its classification
/// and the bare field name
pub fn split_column(column: &str) -> (Classification, &str) {
    if let Some(field) = column.strip_prefix(FOREIGN_ID_PREFIX) {
        (Classification::Reference, field)
    } else if let Some(field) = column.strip_prefix(LIST_PREFIX) {
        (Classification::List, field)
    } else if let Some(field) = column.strip_prefix(DICT_PREFIX) {
        (Classification::Mapping, field)
    } else if let Some(field) = column.strip_prefix(JSON_PREFIX) {
        (Classification::Structured, field)
    } else {
        (Classification::Scalar, column)
    }
}

/// The reserved prefix a name starts with, if any
pub fn reserved_prefix_of(name: &str) -> Option<&'static str> {
    RESERVED_PREFIXES.iter().copied().find(|p| name.starts_with(p))
}

/// Whether a string value would be read back as a reference token
pub fn is_token(value: &str) -> bool {
    value.starts_with(TOKEN_PREFIX)
}

/// Cross-table pointer: `$ID:<RecordTypeName>:<IdentityValue>`.
///
/// The identity is kept in its wire form; [`ReferenceToken::identity_as`]
/// converts it once the referenced definition's identity kind is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceToken {
    pub type_name: String,
    pub identity: String,
}

impl ReferenceToken {
    pub fn new(type_name: impl Into<String>, identity: &Identity) -> Self {
        Self {
            type_name: type_name.into(),
            identity: identity.to_string(),
        }
    }

    /// Parse a token string
    ///
    /// The identity is everything after the second colon, so text keys may
    /// themselves contain colons.
    pub fn parse(token: &str) -> Result<Self> {
        let rest = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| Error::InvalidToken(format!("missing {} prefix: {}", TOKEN_PREFIX, token)))?;

        let (type_name, identity) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidToken(format!("missing identity: {}", token)))?;

        if type_name.is_empty() || identity.is_empty() {
            return Err(Error::InvalidToken(token.to_string()));
        }

        Ok(Self {
            type_name: type_name.to_string(),
            identity: identity.to_string(),
        })
    }

    pub fn to_token_string(&self) -> String {
        format!("{}{}:{}", TOKEN_PREFIX, self.type_name, self.identity)
    }

    /// Typed identity according to the referenced table's identity kind
    pub fn identity_as(&self, kind: IdentityKind) -> Result<Identity> {
        match kind {
            IdentityKind::Text => Ok(Identity::Text(self.identity.clone())),
            IdentityKind::Auto | IdentityKind::Integer => self
                .identity
                .parse::<i64>()
                .map(Identity::Integer)
                .map_err(|_| {
                    Error::InvalidToken(format!(
                        "non-integer identity for {}: {}",
                        self.type_name, self.identity
                    ))
                }),
        }
    }
}

impl fmt::Display for ReferenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_token_string())
    }
}

impl FromStr for ReferenceToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names() {
        assert_eq!(column_name("name", Classification::Scalar), "name");
        assert_eq!(column_name("owner", Classification::Reference), "FOREIGNIDowner");
        assert_eq!(column_name("tags", Classification::List), "LISTtags");
        assert_eq!(column_name("meta", Classification::Mapping), "DICTmeta");
        assert_eq!(column_name("pair", Classification::Structured), "JSONpair");
    }

    #[test]
    fn test_split_column() {
        assert_eq!(split_column("FOREIGNIDowner"), (Classification::Reference, "owner"));
        assert_eq!(split_column("LISTtags"), (Classification::List, "tags"));
        assert_eq!(split_column("DICTmeta"), (Classification::Mapping, "meta"));
        assert_eq!(split_column("JSONpair"), (Classification::Structured, "pair"));
        assert_eq!(split_column("name"), (Classification::Scalar, "name"));
    }

    #[test]
    fn test_token_format() {
        let token = ReferenceToken::new("User", &Identity::Integer(3));
        assert_eq!(token.to_token_string(), "$ID:User:3");
        assert_eq!(ReferenceToken::parse("$ID:User:3").unwrap(), token);
    }

    #[test]
    fn test_token_identity_may_contain_colons() {
        let token = ReferenceToken::parse("$ID:Note:2024:01:a").unwrap();
        assert_eq!(token.type_name, "Note");
        assert_eq!(token.identity, "2024:01:a");
        assert_eq!(
            token.identity_as(IdentityKind::Text).unwrap(),
            Identity::Text("2024:01:a".into())
        );
    }

    #[test]
    fn test_token_identity_kinds() {
        let token = ReferenceToken::parse("$ID:Code:007").unwrap();
        assert_eq!(token.identity_as(IdentityKind::Text).unwrap(), Identity::from("007"));
        assert_eq!(token.identity_as(IdentityKind::Auto).unwrap(), Identity::Integer(7));

        let text = ReferenceToken::parse("$ID:User:abc").unwrap();
        assert!(text.identity_as(IdentityKind::Integer).is_err());
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(ReferenceToken::parse("User:3").is_err());
        assert!(ReferenceToken::parse("$ID:User").is_err());
        assert!(ReferenceToken::parse("$ID::3").is_err());
        assert!(ReferenceToken::parse("$ID:User:").is_err());
    }

    #[test]
    fn test_reserved_prefixes() {
        assert_eq!(reserved_prefix_of("LISTx"), Some("LIST"));
        assert_eq!(reserved_prefix_of("JSONblob"), Some("JSON"));
        assert_eq!(reserved_prefix_of("listing"), None);
        assert!(is_token("$ID:User:1"));
        assert!(!is_token("ID:User:1"));
    }
}
