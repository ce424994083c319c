//! Record instances and identities

use crate::value::Value;
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Primary key value of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Integer(i64),
    Text(String),
}

impl Identity {
    /// Read an identity out of a SQLite column value
    pub fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        match value {
            ValueRef::Integer(i) => Some(Identity::Integer(i)),
            ValueRef::Text(t) => Some(Identity::Text(String::from_utf8_lossy(t).into_owned())),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Identity::Integer(i) => Some(*i),
            Identity::Text(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Integer(i) => write!(f, "{}", i),
            Identity::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Identity {
    fn from(v: i64) -> Self {
        Identity::Integer(v)
    }
}

impl From<i32> for Identity {
    fn from(v: i32) -> Self {
        Identity::Integer(v.into())
    }
}

impl From<&str> for Identity {
    fn from(v: &str) -> Self {
        Identity::Text(v.to_string())
    }
}

impl From<String> for Identity {
    fn from(v: String) -> Self {
        Identity::Text(v)
    }
}

impl ToSql for Identity {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Identity::Integer(i) => i.to_sql(),
            Identity::Text(s) => s.to_sql(),
        }
    }
}

impl Serialize for Identity {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Identity::Integer(i) => serializer.serialize_i64(*i),
            Identity::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// An in-memory instance of a record definition.
///
/// The type name selects the definition (and therefore the table); `id` is
/// `None` until the store assigns one for auto-identity definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    id: Option<Identity>,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style identity setter
    pub fn with_id(mut self, id: impl Into<Identity>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<&Identity> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: Option<Identity>) {
        self.id = id;
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
