//! Loader - rebuilds records from flat rows
//!
//! The inverse of [`flatten`](crate::flatten): column prefixes recover each
//! field's classification, JSON columns are parsed and walked, and every
//! reference token is resolved by loading the referenced row.
//!
//! Resolution keeps the chain of `(type, identity)` pairs currently being
//! loaded. Meeting one of them again is a reference cycle; a chain longer
//! than the configured depth is rejected as well.

use crate::codec::{self, ReferenceToken, IDENTITY_COLUMN};
use crate::flatten::Row;
use crate::migrate::{quote_ident, table_exists};
use crate::record::{Identity, Record};
use crate::schema::{Classification, FieldType, RecordDefinition, Registry};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, Params};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Default ceiling on nested reference resolution
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Records on the current resolution path, as (type name, wire identity)
type Trail = Vec<(String, String)>;

/// Run a query and collect its rows as (column, value) pairs
pub(crate) fn fetch_rows<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    tracing::debug!(target: "liteorm::dml", "{}", sql);
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut flat = Row::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            flat.push((name.clone(), row.get::<_, SqlValue>(i)?));
        }
        out.push(flat);
        if limit.is_some_and(|n| out.len() >= n) {
            break;
        }
    }
    Ok(out)
}

/// Decodes rows of one store into records.
pub struct Loader<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
    max_depth: usize,
}

impl<'a> Loader<'a> {
    pub fn new(conn: &'a Connection, registry: &'a Registry, max_depth: usize) -> Self {
        Self {
            conn,
            registry,
            max_depth,
        }
    }

    /// Select rows of `type_name` and load each one
    pub fn query<P: Params>(
        &self,
        type_name: &str,
        condition: Option<&str>,
        params: P,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(type_name));
        if let Some(condition) = condition {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }

        fetch_rows(self.conn, &sql, params, limit)?
            .into_iter()
            .map(|row| self.load(type_name, row))
            .collect()
    }

    /// Load one flat row of `type_name` into a record
    pub fn load(&self, type_name: &str, row: Row) -> Result<Record> {
        let mut trail = Trail::new();
        if let Some((_, id)) = row.iter().find(|(column, _)| column == IDENTITY_COLUMN) {
            if let Some(id) = Identity::from_sql(ValueRef::from(id)) {
                trail.push((type_name.to_string(), id.to_string()));
            }
        }
        self.decode_row(type_name, row, &mut trail)
    }

    fn decode_row(&self, type_name: &str, row: Row, trail: &mut Trail) -> Result<Record> {
        let definition = self.registry.get(type_name);
        let mut record = Record::new(type_name);

        for (column, value) in row {
            if column == IDENTITY_COLUMN {
                record.set_id(Identity::from_sql(ValueRef::from(&value)));
                continue;
            }

            let declared = definition.and_then(|d| d.field_by_column(&column));
            if definition.is_some() && declared.is_none() {
                tracing::debug!(table = type_name, column = %column, "skipping undeclared column");
                continue;
            }

            let (classification, stored) = codec::split_column(&column);
            let field = declared.map_or(stored, |f| f.name.as_str());
            let decoded = match classification {
                Classification::Scalar => decode_scalar(declared.map(|f| &f.ty), value),
                Classification::Reference => self.decode_reference(type_name, field, value, trail)?,
                _ => self.decode_collection(type_name, field, classification, value, trail)?,
            };
            record.set(field, decoded);
        }

        Ok(record)
    }

    fn decode_reference(&self, type_name: &str, field: &str, value: SqlValue, trail: &mut Trail) -> Result<Value> {
        match value {
            SqlValue::Null => Ok(Value::Null),
            SqlValue::Text(token) if token.is_empty() => Ok(Value::Null),
            SqlValue::Text(token) => self.resolve(&token, trail),
            other => Err(Error::type_error(
                type_name,
                field,
                format!("reference column holds {:?}", other.data_type()),
            )),
        }
    }

    fn decode_collection(
        &self,
        type_name: &str,
        field: &str,
        classification: Classification,
        value: SqlValue,
        trail: &mut Trail,
    ) -> Result<Value> {
        let text = match value {
            SqlValue::Null => return Ok(Value::Null),
            SqlValue::Text(text) => text,
            other => {
                return Err(Error::type_error(
                    type_name,
                    field,
                    format!("JSON column holds {:?}", other.data_type()),
                ))
            }
        };

        if text.is_empty() {
            return Ok(match classification {
                Classification::Mapping => Value::Map(BTreeMap::new()),
                _ => Value::List(Vec::new()),
            });
        }

        let json: JsonValue = serde_json::from_str(&text)?;
        self.decode_json(json, trail)
    }

    fn decode_json(&self, json: JsonValue, trail: &mut Trail) -> Result<Value> {
        let value = match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            JsonValue::String(s) if codec::is_token(&s) => self.resolve(&s, trail)?,
            JsonValue::String(s) => Value::Text(s),
            JsonValue::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.decode_json(item, trail))
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, item) in entries {
                    let (classification, bare) = codec::split_column(&key);
                    let decoded = match (classification, item) {
                        (Classification::Reference, JsonValue::String(token)) => self.resolve(&token, trail)?,
                        (Classification::Reference, other) => {
                            return Err(Error::InvalidToken(other.to_string()));
                        }
                        (Classification::Scalar, item) => self.decode_json(item, trail)?,
                        (_, item) => self.decode_json(unwrap_text_collection(item), trail)?,
                    };
                    map.insert(bare.to_string(), decoded);
                }
                Value::Map(map)
            }
        };
        Ok(value)
    }

    /// Load the record a token points at
    fn resolve(&self, raw: &str, trail: &mut Trail) -> Result<Value> {
        let token = ReferenceToken::parse(raw)?;

        if trail
            .iter()
            .any(|(t, id)| *t == token.type_name && *id == token.identity)
        {
            return Err(Error::ReferenceCycle(token.to_token_string()));
        }
        if trail.len() > self.max_depth {
            return Err(Error::DepthExceeded(self.max_depth));
        }

        let definition: Option<&RecordDefinition> = self.registry.get(&token.type_name);
        let identity = match definition {
            Some(def) => token.identity_as(def.identity())?,
            // Unregistered table: bind as text and rely on column affinity
            None => Identity::Text(token.identity.clone()),
        };

        if !table_exists(self.conn, &token.type_name)? {
            return Err(Error::DanglingReference(token.to_token_string()));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(&token.type_name),
            IDENTITY_COLUMN
        );
        let row = fetch_rows(self.conn, &sql, [identity], Some(1))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DanglingReference(token.to_token_string()))?;

        trail.push((token.type_name.clone(), token.identity.clone()));
        let nested = self.decode_row(&token.type_name, row, trail);
        trail.pop();

        Ok(Value::Record(Box::new(nested?)))
    }
}

/// A collection nested as JSON text under a prefixed key, parsed in place.
/// Other values pass through unchanged.
fn unwrap_text_collection(item: JsonValue) -> JsonValue {
    if let JsonValue::String(text) = &item {
        if let Ok(nested @ (JsonValue::Array(_) | JsonValue::Object(_))) = serde_json::from_str::<JsonValue>(text) {
            return nested;
        }
    }
    item
}

/// Copy a scalar column, restoring booleans and reals from their storage form
fn decode_scalar(declared: Option<&FieldType>, value: SqlValue) -> Value {
    match (declared, value) {
        (_, SqlValue::Null) => Value::Null,
        (Some(FieldType::Boolean), SqlValue::Integer(i)) => Value::Bool(i != 0),
        (Some(FieldType::Float), SqlValue::Integer(i)) => Value::Real(i as f64),
        (_, SqlValue::Integer(i)) => Value::Integer(i),
        (_, SqlValue::Real(f)) => Value::Real(f),
        (_, SqlValue::Text(s)) => Value::Text(s),
        (_, SqlValue::Blob(b)) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}
