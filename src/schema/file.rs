//! TOML schema files
//!
//! ```toml
//! [[record]]
//! name = "User"
//! identity = "auto"
//!
//! [record.fields]
//! name = "str"
//! tags = "list[str]"
//! team = "Team"
//! ```
//!
//! Bare type names that match another record in the same file become
//! references to that record.

use super::{FieldType, IdentityKind, RecordDefinition};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "record")]
    records: Vec<RecordSpec>,
}

#[derive(Debug, Deserialize)]
struct RecordSpec {
    name: String,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// Parse record definitions from TOML text
pub fn parse_schema(text: &str) -> Result<Vec<RecordDefinition>> {
    let file: SchemaFile = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;

    let names: HashSet<&str> = file.records.iter().map(|r| r.name.as_str()).collect();
    let is_record = |name: &str| names.contains(name);

    let mut definitions = Vec::with_capacity(file.records.len());
    for spec in &file.records {
        let identity = match &spec.identity {
            Some(kind) => kind.parse::<IdentityKind>()?,
            None => IdentityKind::Auto,
        };

        let mut builder = RecordDefinition::builder(spec.name.clone()).identity(identity);
        for (field, expr) in &spec.fields {
            let ty = FieldType::parse_with(expr, &is_record).map_err(|e| {
                Error::InvalidDefinition(format!("{}.{}: {}", spec.name, field, e))
            })?;
            builder = builder.field(field.clone(), ty);
        }
        definitions.push(builder.build()?);
    }

    Ok(definitions)
}

/// Read and parse a schema file
pub fn load_schema(path: &Path) -> Result<Vec<RecordDefinition>> {
    let text = std::fs::read_to_string(path)?;
    parse_schema(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Classification;

    const SCHEMA: &str = r#"
[[record]]
name = "Team"
identity = "str"

[record.fields]
title = "str"

[[record]]
name = "User"

[record.fields]
name = "str"
tags = "list[str]"
team = "Team"
score = "float"
"#;

    #[test]
    fn test_parse_schema() {
        let defs = parse_schema(SCHEMA).unwrap();
        assert_eq!(defs.len(), 2);

        let team = &defs[0];
        assert_eq!(team.identity(), IdentityKind::Text);

        let user = &defs[1];
        assert_eq!(user.identity(), IdentityKind::Auto);
        let team_field = user.field("team").unwrap();
        assert_eq!(team_field.classification, Classification::Reference);
        assert_eq!(team_field.column, "FOREIGNIDteam");
        assert_eq!(user.field("tags").unwrap().column, "LISTtags");
    }

    #[test]
    fn test_parse_schema_errors() {
        let bad_type = "[[record]]\nname = \"A\"\n[record.fields]\nx = \"list[\"\n";
        assert!(matches!(parse_schema(bad_type), Err(Error::InvalidDefinition(_))));

        let bad_toml = "[[record]\nname = 1";
        assert!(matches!(parse_schema(bad_toml), Err(Error::Config(_))));
    }
}
