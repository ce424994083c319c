//! Flattener - encodes records into flat rows
//!
//! Each field is encoded according to its declared classification:
//! - scalars are stored verbatim (booleans as 0/1)
//! - nested records are upserted first and replaced by a reference token
//! - lists, mappings and structured values become JSON text, with nested
//!   records inside them upserted and tokenized the same way
//!
//! Children are always written before their parent row.

use crate::codec::{self, ReferenceToken, IDENTITY_COLUMN};
use crate::migrate::{quote_ident, table_exists};
use crate::record::{Identity, Record};
use crate::schema::{Classification, FieldDef, FieldType, IdentityKind, RecordDefinition, Registry};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

/// Flat row: stored column name and SQL value
pub type Row = Vec<(String, SqlValue)>;

/// Writes records (and, recursively, their nested records) to the store.
///
/// The writer runs on whatever connection or transaction it is handed; the
/// caller decides when to commit.
pub struct Writer<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
}

impl<'a> Writer<'a> {
    pub fn new(conn: &'a Connection, registry: &'a Registry) -> Self {
        Self { conn, registry }
    }

    /// Insert-or-replace one record, returning its identity
    pub fn write(&self, record: &Record) -> Result<Identity> {
        let type_name = record.type_name();
        if !table_exists(self.conn, type_name)? {
            return Err(Error::Schema(format!(
                "table {} does not exist; migrate its definition first",
                type_name
            )));
        }
        let definition = self
            .registry
            .get(type_name)
            .ok_or_else(|| Error::UnknownDefinition(type_name.to_string()))?;

        check_identity(definition, record.id())?;
        let row = self.flatten(definition, record)?;
        self.insert_row(definition, record.id(), row)
    }

    /// Encode a record's fields into a flat row, writing nested records
    pub fn flatten(&self, definition: &RecordDefinition, record: &Record) -> Result<Row> {
        if let Some((name, _)) = record.fields().find(|(name, _)| definition.field(name).is_none()) {
            return Err(Error::type_error(
                definition.name(),
                name,
                "field is not declared by the record definition",
            ));
        }

        let mut row = Row::with_capacity(definition.fields().len());
        for field in definition.fields() {
            let value = match record.get(&field.name) {
                Some(value) => self.encode_column(definition, field, value)?,
                None => field.storage.default_value(),
            };
            row.push((field.column.clone(), value));
        }
        Ok(row)
    }

    fn insert_row(&self, definition: &RecordDefinition, id: Option<&Identity>, row: Row) -> Result<Identity> {
        let table = quote_ident(definition.name());

        let mut columns: Vec<String> = Vec::with_capacity(row.len() + 1);
        let mut values: Vec<SqlValue> = Vec::with_capacity(row.len() + 1);
        if let Some(id) = id {
            columns.push(quote_ident(IDENTITY_COLUMN));
            values.push(match id {
                Identity::Integer(i) => SqlValue::Integer(*i),
                Identity::Text(s) => SqlValue::Text(s.clone()),
            });
        }
        for (column, value) in row {
            columns.push(quote_ident(&column));
            values.push(value);
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        tracing::debug!(target: "liteorm::dml", "{}", sql);
        self.conn.execute(&sql, params_from_iter(values))?;

        Ok(match id {
            Some(id) => id.clone(),
            None => Identity::Integer(self.conn.last_insert_rowid()),
        })
    }

    fn encode_column(&self, definition: &RecordDefinition, field: &FieldDef, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let mismatch = |expected: &str| {
            Error::type_error(
                definition.name(),
                &field.name,
                format!("expected {}, got {}", expected, value.kind_name()),
            )
        };

        match field.classification {
            Classification::Scalar => self.encode_scalar(definition, field, value),
            Classification::Reference => match value {
                Value::Record(nested) => {
                    let token = self.write_nested(definition, &field.name, &field.ty, nested)?;
                    Ok(SqlValue::Text(token))
                }
                _ => Err(mismatch("record")),
            },
            Classification::List => match value {
                Value::List(items) if items.is_empty() => Ok(SqlValue::Text(String::new())),
                Value::List(_) => self.encode_json(definition, field, value),
                _ => Err(mismatch("list")),
            },
            Classification::Mapping => match value {
                Value::Map(entries) if entries.is_empty() => Ok(SqlValue::Text(String::new())),
                Value::Map(_) => self.encode_json(definition, field, value),
                _ => Err(mismatch("map")),
            },
            Classification::Structured => match (&field.ty, value) {
                (FieldType::Tuple(_) | FieldType::Set(_), Value::List(_)) | (FieldType::Json, _) => {
                    self.encode_json(definition, field, value)
                }
                _ => Err(mismatch("list")),
            },
        }
    }

    fn encode_scalar(&self, definition: &RecordDefinition, field: &FieldDef, value: &Value) -> Result<SqlValue> {
        let encoded = match (&field.ty, value) {
            (FieldType::Text | FieldType::Other(_), Value::Text(s)) => {
                check_not_token(definition, &field.name, s)?;
                SqlValue::Text(s.clone())
            }
            (FieldType::Integer | FieldType::Other(_), Value::Integer(i)) => SqlValue::Integer(*i),
            (FieldType::Float, Value::Integer(i)) => SqlValue::Real(*i as f64),
            (FieldType::Float | FieldType::Other(_), Value::Real(f)) => SqlValue::Real(*f),
            (FieldType::Boolean | FieldType::Other(_), Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (ty, value) => {
                return Err(Error::type_error(
                    definition.name(),
                    &field.name,
                    format!("expected {}, got {}", ty, value.kind_name()),
                ))
            }
        };
        Ok(encoded)
    }

    fn encode_json(&self, definition: &RecordDefinition, field: &FieldDef, value: &Value) -> Result<SqlValue> {
        let json = self.encode_element(definition, &field.name, value)?;
        Ok(SqlValue::Text(serde_json::to_string(&json)?))
    }

    /// Encode a value nested inside a collection
    fn encode_element(&self, definition: &RecordDefinition, field: &str, value: &Value) -> Result<JsonValue> {
        let json = match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Real(f) => JsonValue::Number(Number::from_f64(*f).ok_or_else(|| {
                Error::type_error(definition.name(), field, format!("{} cannot be stored as JSON", f))
            })?),
            Value::Text(s) => {
                check_not_token(definition, field, s)?;
                JsonValue::String(s.clone())
            }
            Value::Record(nested) => {
                let declared = FieldType::Record(nested.type_name().to_string());
                JsonValue::String(self.write_nested(definition, field, &declared, nested)?)
            }
            Value::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| self.encode_element(definition, field, item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut object = JsonMap::with_capacity(entries.len());
                for (key, item) in entries {
                    if let Some(prefix) = codec::reserved_prefix_of(key) {
                        return Err(Error::type_error(
                            definition.name(),
                            field,
                            format!("map key {} starts with reserved prefix {}", key, prefix),
                        ));
                    }
                    let stored_key = codec::column_name(key, element_classification(item));
                    object.insert(stored_key, self.encode_element(definition, field, item)?);
                }
                JsonValue::Object(object)
            }
        };
        Ok(json)
    }

    /// Upsert a nested record and return its reference token
    fn write_nested(
        &self,
        parent: &RecordDefinition,
        field: &str,
        declared: &FieldType,
        nested: &Record,
    ) -> Result<String> {
        if let FieldType::Record(expected) = declared {
            if expected != nested.type_name() {
                return Err(Error::type_error(
                    parent.name(),
                    field,
                    format!("expected {} record, got {}", expected, nested.type_name()),
                ));
            }
        }
        let id = self.write(nested)?;
        Ok(ReferenceToken::new(nested.type_name(), &id).to_token_string())
    }
}

/// Classification tag for a value stored under a map key
fn element_classification(value: &Value) -> Classification {
    match value {
        Value::Record(_) => Classification::Reference,
        Value::List(_) => Classification::List,
        Value::Map(_) => Classification::Mapping,
        _ => Classification::Scalar,
    }
}

fn check_not_token(definition: &RecordDefinition, field: &str, text: &str) -> Result<()> {
    if codec::is_token(text) {
        return Err(Error::type_error(
            definition.name(),
            field,
            format!("text values may not start with the reserved {} prefix", codec::TOKEN_PREFIX),
        ));
    }
    Ok(())
}

fn check_identity(definition: &RecordDefinition, id: Option<&Identity>) -> Result<()> {
    match (definition.identity(), id) {
        (IdentityKind::Auto, None) => Ok(()),
        (IdentityKind::Auto | IdentityKind::Integer, Some(Identity::Integer(_))) => Ok(()),
        // An empty key would be written as a token that cannot be parsed back
        (IdentityKind::Text, Some(Identity::Text(key))) if key.is_empty() => {
            Err(Error::MissingIdentity(definition.name().to_string()))
        }
        (IdentityKind::Text, Some(Identity::Text(_))) => Ok(()),
        (IdentityKind::Integer | IdentityKind::Text, None) => {
            Err(Error::MissingIdentity(definition.name().to_string()))
        }
        (kind, Some(id)) => Err(Error::type_error(
            definition.name(),
            IDENTITY_COLUMN,
            format!("identity {:?} does not match identity kind {}", id, kind),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::{migrate, StalePolicy};

    fn setup(definitions: Vec<RecordDefinition>) -> (Connection, Registry) {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &definitions, StalePolicy::Keep).unwrap();
        let mut registry = Registry::new();
        for def in definitions {
            registry.insert(def);
        }
        (conn, registry)
    }

    fn org() -> RecordDefinition {
        RecordDefinition::builder("Org")
            .field("title", FieldType::Text)
            .build()
            .unwrap()
    }

    fn user() -> RecordDefinition {
        RecordDefinition::builder("User")
            .field("name", FieldType::Text)
            .field("active", FieldType::Boolean)
            .field("tags", FieldType::List(Box::new(FieldType::Text)))
            .field("meta", FieldType::Map(Box::new(FieldType::Json)))
            .field("org", FieldType::Record("Org".into()))
            .build()
            .unwrap()
    }

    fn stored<T: rusqlite::types::FromSql>(conn: &Connection, sql: &str) -> T {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_nested_record_written_first() {
        let (conn, registry) = setup(vec![org(), user()]);
        let writer = Writer::new(&conn, &registry);

        let record = Record::new("User")
            .with("name", "a")
            .with("org", Record::new("Org").with("title", "acme"));
        let id = writer.write(&record).unwrap();
        assert_eq!(id, Identity::Integer(1));

        let token: String = stored(&conn, "SELECT FOREIGNIDorg FROM User WHERE id = 1");
        assert_eq!(token, "$ID:Org:1");
        let title: String = stored(&conn, "SELECT title FROM Org WHERE id = 1");
        assert_eq!(title, "acme");
    }

    #[test]
    fn test_collections_encoded_as_json() {
        let (conn, registry) = setup(vec![org(), user()]);
        let writer = Writer::new(&conn, &registry);

        let meta: Value = [
            ("owner", Value::from(Record::new("Org").with("title", "x"))),
            ("n", Value::from(2)),
            ("names", Value::from(vec!["p"])),
        ]
        .into_iter()
        .collect();
        let record = Record::new("User")
            .with("tags", vec!["x", "y"])
            .with("meta", meta)
            .with("active", true);
        writer.write(&record).unwrap();

        let tags: String = stored(&conn, "SELECT LISTtags FROM User");
        assert_eq!(tags, r#"["x","y"]"#);
        let meta: String = stored(&conn, "SELECT DICTmeta FROM User");
        assert_eq!(
            meta,
            r#"{"FOREIGNIDowner":"$ID:Org:1","LISTnames":["p"],"n":2}"#
        );
        let active: i64 = stored(&conn, "SELECT active FROM User");
        assert_eq!(active, 1);
    }

    #[test]
    fn test_empty_collections_and_missing_fields() {
        let (conn, registry) = setup(vec![org(), user()]);
        let writer = Writer::new(&conn, &registry);

        writer
            .write(&Record::new("User").with("tags", Vec::<Value>::new()))
            .unwrap();
        let tags: String = stored(&conn, "SELECT LISTtags FROM User");
        assert_eq!(tags, "");
        let name: String = stored(&conn, "SELECT name FROM User");
        assert_eq!(name, "");
        let active: i64 = stored(&conn, "SELECT active FROM User");
        assert_eq!(active, 0);
    }

    #[test]
    fn test_type_errors() {
        let (conn, registry) = setup(vec![org(), user()]);
        let writer = Writer::new(&conn, &registry);

        let wrong_scalar = Record::new("User").with("name", 5);
        assert!(matches!(writer.write(&wrong_scalar), Err(Error::Type { .. })));

        let wrong_list = Record::new("User").with("tags", "x");
        assert!(matches!(writer.write(&wrong_list), Err(Error::Type { .. })));

        let wrong_nested = Record::new("User").with("org", Record::new("User"));
        assert!(matches!(writer.write(&wrong_nested), Err(Error::Type { .. })));

        let undeclared = Record::new("User").with("nickname", "z");
        assert!(matches!(writer.write(&undeclared), Err(Error::Type { .. })));

        let token_text = Record::new("User").with("name", "$ID:Org:1");
        assert!(matches!(writer.write(&token_text), Err(Error::Type { .. })));

        let reserved_key: Value = [("LISTx", 1)].into_iter().collect();
        let bad_map = Record::new("User").with("meta", reserved_key);
        assert!(matches!(writer.write(&bad_map), Err(Error::Type { .. })));
    }

    #[test]
    fn test_missing_table_is_schema_error() {
        let (conn, registry) = setup(vec![]);
        let writer = Writer::new(&conn, &registry);
        let err = writer.write(&Record::new("User").with("name", "a")).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_natural_key_identity() {
        let tag = RecordDefinition::builder("Tag")
            .identity(IdentityKind::Text)
            .field("label", FieldType::Text)
            .build()
            .unwrap();
        let (conn, registry) = setup(vec![tag]);
        let writer = Writer::new(&conn, &registry);

        assert!(matches!(
            writer.write(&Record::new("Tag").with("label", "x")),
            Err(Error::MissingIdentity(_))
        ));
        assert!(matches!(
            writer.write(&Record::new("Tag").with_id(3)),
            Err(Error::Type { .. })
        ));
        assert!(matches!(
            writer.write(&Record::new("Tag").with_id("").with("label", "x")),
            Err(Error::MissingIdentity(_))
        ));

        let id = writer.write(&Record::new("Tag").with_id("rust").with("label", "Rust")).unwrap();
        assert_eq!(id, Identity::from("rust"));

        writer.write(&Record::new("Tag").with_id("rust").with("label", "Rust 2")).unwrap();
        let count: i64 = stored(&conn, "SELECT COUNT(*) FROM Tag");
        assert_eq!(count, 1);
    }
}
