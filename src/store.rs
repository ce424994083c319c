//! Record access API - SQLite-backed store
//!
//! `Store` owns one connection and the registry of migrated definitions.
//! Every mutating call commits its own transaction; an upsert and all the
//! nested records it cascades to are written in a single transaction and
//! rolled back together on failure.

use crate::config::StoreConfig;
use crate::flatten::Writer;
use crate::load::Loader;
use crate::migrate::{self, quote_ident, ColumnInfo, MigrationReport, StalePolicy};
use crate::record::{Identity, Record};
use crate::schema::{RecordDefinition, Registry};
use crate::Result;
use rusqlite::{Connection, OpenFlags, Params};
use std::path::Path;
use std::time::Duration;

/// SQLite-backed record store
pub struct Store {
    conn: Connection,
    registry: Registry,
    config: StoreConfig,
}

impl Store {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreConfig::default())
    }

    /// Open a database file with explicit settings, creating the file and
    /// its parent directories when missing
    pub fn open_with(path: &Path, config: StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, config)
    }

    /// Open a database file that must already exist
    pub fn open_existing(path: &Path, config: StoreConfig) -> Result<Self> {
        let flags = OpenFlags::default().difference(OpenFlags::SQLITE_OPEN_CREATE);
        let conn = Connection::open_with_flags(path, flags)?;
        Self::with_connection(conn, config)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, StoreConfig::default())
    }

    /// Wrap a connection the caller already opened
    pub fn with_connection(conn: Connection, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self {
            conn,
            registry: Registry::new(),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Underlying connection, for statements the store does not model
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn definition(&self, type_name: &str) -> Option<&RecordDefinition> {
        self.registry.get(type_name)
    }

    /// Make definitions known without touching the schema (read-only use)
    pub fn register(&mut self, definitions: &[RecordDefinition]) {
        for definition in definitions {
            self.registry.insert(definition.clone());
        }
    }

    // ========== Migration ==========

    /// Create or extend tables for the given definitions.
    ///
    /// Undeclared columns are kept and reported unless the store was
    /// configured with `drop_stale_columns`.
    pub fn migrate(&mut self, definitions: &[RecordDefinition]) -> Result<MigrationReport> {
        let policy = if self.config.drop_stale_columns {
            StalePolicy::Drop
        } else {
            StalePolicy::Keep
        };
        self.run_migration(definitions, policy)
    }

    /// Migrate and drop every column the definitions no longer declare.
    ///
    /// The dropped columns' data is gone for good.
    pub fn migrate_dropping_stale(&mut self, definitions: &[RecordDefinition]) -> Result<MigrationReport> {
        self.run_migration(definitions, StalePolicy::Drop)
    }

    fn run_migration(&mut self, definitions: &[RecordDefinition], policy: StalePolicy) -> Result<MigrationReport> {
        for definition in definitions {
            for referenced in definition.referenced_types() {
                let known = self.registry.contains(referenced)
                    || definitions.iter().any(|d| d.name() == referenced);
                if !known {
                    tracing::warn!(
                        record = definition.name(),
                        referenced,
                        "references a record type that has not been migrated"
                    );
                }
            }
        }

        let tx = self.conn.transaction()?;
        let report = migrate::migrate(&tx, definitions, policy)?;
        tx.commit()?;

        self.register(definitions);
        tracing::debug!(ddl = report.ddl_count(), "migration committed");
        Ok(report)
    }

    // ========== Writes ==========

    /// Insert or replace a record and every record nested in it
    pub fn upsert(&mut self, record: &Record) -> Result<Identity> {
        let mut ids = self.upsert_many(std::slice::from_ref(record))?;
        Ok(ids.remove(0))
    }

    /// Insert or replace several records in one transaction
    pub fn upsert_many(&mut self, records: &[Record]) -> Result<Vec<Identity>> {
        let tx = self.conn.transaction()?;
        let writer = Writer::new(&tx, &self.registry);

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            match writer.write(record) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    tracing::warn!(record = record.type_name(), error = %e, "upsert rolled back");
                    return Err(e);
                }
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Delete matching rows. Records they reference are left in place.
    ///
    /// Returns 0 without touching the database when the table is missing.
    pub fn delete<P: Params>(&self, type_name: &str, condition: &str, params: P) -> Result<usize> {
        if !self.table_exists(type_name)? {
            return Ok(0);
        }
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(type_name), condition);
        tracing::debug!(target: "liteorm::dml", "{}", sql);
        let deleted = self.conn.execute(&sql, params)?;
        Ok(deleted)
    }

    // ========== Queries ==========

    /// First record matching `condition`, or `None` (also when the table
    /// does not exist)
    pub fn first<P: Params>(&self, type_name: &str, condition: &str, params: P) -> Result<Option<Record>> {
        if !self.table_exists(type_name)? {
            return Ok(None);
        }
        let records = self.loader().query(type_name, Some(condition), params, Some(1))?;
        Ok(records.into_iter().next())
    }

    /// Like [`Store::first`], falling back to `default`
    pub fn first_or<P: Params>(
        &self,
        type_name: &str,
        condition: &str,
        params: P,
        default: Record,
    ) -> Result<Record> {
        Ok(self.first(type_name, condition, params)?.unwrap_or(default))
    }

    /// Look a record up by identity
    pub fn get(&self, type_name: &str, id: impl Into<Identity>) -> Result<Option<Record>> {
        self.first(type_name, "id = ?1", [id.into()])
    }

    /// All records matching `condition` (every row when `None`)
    pub fn all<P: Params>(&self, type_name: &str, condition: Option<&str>, params: P) -> Result<Vec<Record>> {
        if !self.table_exists(type_name)? {
            return Ok(Vec::new());
        }
        self.loader().query(type_name, condition, params, None)
    }

    /// Like [`Store::all`], returning `default` when the table is missing or
    /// nothing matches
    pub fn all_or<P: Params>(
        &self,
        type_name: &str,
        condition: Option<&str>,
        params: P,
        default: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let records = self.all(type_name, condition, params)?;
        Ok(if records.is_empty() { default } else { records })
    }

    // ========== Introspection ==========

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        migrate::table_exists(&self.conn, table)
    }

    pub fn tables(&self) -> Result<Vec<String>> {
        migrate::list_tables(&self.conn)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        migrate::table_columns(&self.conn, table)
    }

    /// Count rows of a table (0 when missing)
    pub fn count(&self, table: &str) -> Result<usize> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn loader(&self) -> Loader<'_> {
        Loader::new(&self.conn, &self.registry, self.config.max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::value::Value;
    use crate::Error;

    fn user_def() -> RecordDefinition {
        RecordDefinition::builder("User")
            .field("name", FieldType::Text)
            .field("tags", FieldType::List(Box::new(FieldType::Text)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_end_to_end_user() {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate(&[user_def()]).unwrap();

        let id = store
            .upsert(&Record::new("User").with("name", "a").with("tags", vec!["x", "y"]))
            .unwrap();
        assert_eq!(id, Identity::Integer(1));

        let user = store.first("User", "id = ?", [1]).unwrap().unwrap();
        assert_eq!(user.get("name"), Some(&Value::from("a")));
        assert_eq!(user.get("tags"), Some(&Value::from(vec!["x", "y"])));
    }

    #[test]
    fn test_missing_table_semantics() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.first("Ghost", "id = ?", [1]).unwrap().is_none());
        assert!(store.all("Ghost", None, []).unwrap().is_empty());
        assert_eq!(store.delete("Ghost", "id = ?", [1]).unwrap(), 0);

        let fallback = Record::new("Ghost").with("name", "default");
        let got = store.first_or("Ghost", "id = ?", [1], fallback.clone()).unwrap();
        assert_eq!(got, fallback);
        let all = store.all_or("Ghost", None, [], vec![fallback.clone()]).unwrap();
        assert_eq!(all, vec![fallback]);
    }

    #[test]
    fn test_upsert_without_migration_fails() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.upsert(&Record::new("User").with("name", "a")).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_upsert_replaces_by_identity() {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate(&[user_def()]).unwrap();

        let id = store.upsert(&Record::new("User").with("name", "a")).unwrap();
        store
            .upsert(&Record::new("User").with_id(id.clone()).with("name", "b"))
            .unwrap();

        assert_eq!(store.count("User").unwrap(), 1);
        let user = store.get("User", id).unwrap().unwrap();
        assert_eq!(user.get("name"), Some(&Value::from("b")));
    }

    #[test]
    fn test_upsert_many_returns_each_identity() {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate(&[user_def()]).unwrap();

        let ids = store
            .upsert_many(&[
                Record::new("User").with("name", "a"),
                Record::new("User").with("name", "b"),
            ])
            .unwrap();
        assert_eq!(ids, vec![Identity::Integer(1), Identity::Integer(2)]);

        let names: Vec<_> = store
            .all("User", Some("name != ?1 ORDER BY id"), ["zzz"])
            .unwrap()
            .into_iter()
            .map(|u| u.get("name").cloned())
            .collect();
        assert_eq!(names, vec![Some(Value::from("a")), Some(Value::from("b"))]);
    }

    #[test]
    fn test_delete_by_condition() {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate(&[user_def()]).unwrap();
        store
            .upsert_many(&[
                Record::new("User").with("name", "a"),
                Record::new("User").with("name", "b"),
            ])
            .unwrap();

        assert_eq!(store.delete("User", "name = ?1", ["a"]).unwrap(), 1);
        assert_eq!(store.count("User").unwrap(), 1);
        assert!(store.first("User", "name = ?1", ["a"]).unwrap().is_none());
    }

    #[test]
    fn test_failed_upsert_rolls_back_children() {
        let org = RecordDefinition::builder("Org")
            .field("title", FieldType::Text)
            .build()
            .unwrap();
        let user = RecordDefinition::builder("User")
            .field("org", FieldType::Record("Org".into()))
            .field("age", FieldType::Integer)
            .build()
            .unwrap();
        let mut store = Store::open_in_memory().unwrap();
        store.migrate(&[org, user]).unwrap();

        // `org` is encoded (and written) before `age` fails
        let bad = Record::new("User")
            .with("org", Record::new("Org").with("title", "acme"))
            .with("age", "old");
        assert!(matches!(store.upsert(&bad), Err(Error::Type { .. })));
        assert_eq!(store.count("Org").unwrap(), 0);
        assert_eq!(store.count("User").unwrap(), 0);
    }

    #[test]
    fn test_empty_natural_key_is_rejected() {
        let tag = RecordDefinition::builder("Tag")
            .identity(crate::schema::IdentityKind::Text)
            .field("label", FieldType::Text)
            .build()
            .unwrap();
        let post = RecordDefinition::builder("Post")
            .field("tag", FieldType::Record("Tag".into()))
            .build()
            .unwrap();
        let mut store = Store::open_in_memory().unwrap();
        store.migrate(&[tag, post]).unwrap();

        let post = Record::new("Post").with("tag", Record::new("Tag").with_id("").with("label", "x"));
        assert!(matches!(store.upsert(&post), Err(Error::MissingIdentity(ref t)) if t == "Tag"));
        assert_eq!(store.count("Tag").unwrap(), 0);
        assert!(store.first("Post", "id = ?", [1]).unwrap().is_none());
    }

    #[test]
    fn test_open_existing_requires_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nested").join("typo.db");
        assert!(matches!(
            Store::open_existing(&missing, StoreConfig::default()),
            Err(Error::Storage(_))
        ));
        assert!(!dir.path().join("nested").exists());

        let mut created = Store::open_with(&missing, StoreConfig::default()).unwrap();
        created.migrate(&[user_def()]).unwrap();
        drop(created);

        let reopened = Store::open_existing(&missing, StoreConfig::default()).unwrap();
        assert_eq!(reopened.tables().unwrap(), vec!["User"]);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = StoreConfig {
            max_depth: 0,
            ..Default::default()
        };
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(Store::with_connection(conn, config), Err(Error::Config(_))));
    }

    #[test]
    fn test_migrate_registers_definitions() {
        let mut store = Store::open_in_memory().unwrap();
        let first = store.migrate(&[user_def()]).unwrap();
        assert!(!first.is_noop());
        assert!(store.definition("User").is_some());

        let second = store.migrate(&[user_def()]).unwrap();
        assert!(second.is_noop());
        assert_eq!(store.tables().unwrap(), vec!["User"]);
    }
}
