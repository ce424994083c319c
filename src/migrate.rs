//! Schema migrator
//!
//! Reconciles each table with its record definition: creates missing tables,
//! adds missing columns (backfilling NULLs with the storage zero value) and
//! reports columns the definition no longer declares. Dropping those stale
//! columns destroys their data, so it only happens under
//! [`StalePolicy::Drop`].

use crate::codec::IDENTITY_COLUMN;
use crate::schema::{RecordDefinition, StorageType};
use crate::Result;
use rusqlite::{Connection, OptionalExtension};
use std::fmt;

/// What to do with columns no longer declared by a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Leave the column (and its data) in place and report it
    #[default]
    Keep,
    /// `ALTER TABLE DROP COLUMN` - irreversible
    Drop,
}

/// A column touched or inspected by a migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    pub table: String,
    pub column: String,
}

/// A column whose stored type no longer matches its declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDrift {
    pub table: String,
    pub column: String,
    pub declared: StorageType,
    pub actual: String,
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub created_tables: Vec<String>,
    pub added_columns: Vec<ColumnChange>,
    pub dropped_columns: Vec<ColumnChange>,
    /// Undeclared columns left in place
    pub stale_columns: Vec<ColumnChange>,
    pub type_drift: Vec<TypeDrift>,
}

impl MigrationReport {
    /// True when the run executed no DDL
    pub fn is_noop(&self) -> bool {
        self.ddl_count() == 0
    }

    /// Number of DDL statements executed
    pub fn ddl_count(&self) -> usize {
        self.created_tables.len() + self.added_columns.len() + self.dropped_columns.len()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration Summary:")?;
        writeln!(f, "  Tables created: {}", self.created_tables.len())?;
        writeln!(f, "  Columns added: {}", self.added_columns.len())?;
        writeln!(f, "  Columns dropped: {}", self.dropped_columns.len())?;
        writeln!(f, "  Stale columns kept: {}", self.stale_columns.len())?;
        writeln!(f, "  Type drift: {}", self.type_drift.len())
    }
}

/// Column metadata from `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub primary_key: bool,
}

/// Quote an identifier for interpolation into SQL
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check whether a table exists
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// List user tables, sorted by name
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tables)
}

/// Read a table's columns in declaration order
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| {
            let pk: i64 = row.get(2)?;
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                primary_key: pk > 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn execute_ddl(conn: &Connection, sql: &str) -> Result<()> {
    tracing::debug!(target: "liteorm::ddl", "{}", sql);
    conn.execute(sql, [])?;
    Ok(())
}

/// Migrate every definition on `conn`. The caller owns the transaction and
/// commits once after all definitions are processed.
pub fn migrate(
    conn: &Connection,
    definitions: &[RecordDefinition],
    policy: StalePolicy,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    for definition in definitions {
        migrate_one(conn, definition, policy, &mut report)?;
    }
    Ok(report)
}

fn migrate_one(
    conn: &Connection,
    definition: &RecordDefinition,
    policy: StalePolicy,
    report: &mut MigrationReport,
) -> Result<()> {
    let table = definition.name();
    let quoted = quote_ident(table);

    if !table_exists(conn, table)? {
        execute_ddl(
            conn,
            &format!("CREATE TABLE {} ({})", quoted, definition.identity().column_sql()),
        )?;
        report.created_tables.push(table.to_string());
    }

    let existing = table_columns(conn, table)?;

    if let Some(id) = existing.iter().find(|c| c.name.eq_ignore_ascii_case(IDENTITY_COLUMN)) {
        let declared = definition.identity().storage_type();
        if StorageType::from_declared(&id.decl_type) != Some(declared) {
            tracing::warn!(table, declared = %declared, actual = %id.decl_type, "identity column type drift");
            report.type_drift.push(TypeDrift {
                table: table.to_string(),
                column: IDENTITY_COLUMN.to_string(),
                declared,
                actual: id.decl_type.clone(),
            });
        }
    }

    for (column, storage) in definition.expected_columns() {
        match existing.iter().find(|c| c.name.eq_ignore_ascii_case(column)) {
            Some(current) => {
                if StorageType::from_declared(&current.decl_type) != Some(storage) {
                    tracing::warn!(table, column, declared = %storage, actual = %current.decl_type, "column type drift");
                    report.type_drift.push(TypeDrift {
                        table: table.to_string(),
                        column: column.to_string(),
                        declared: storage,
                        actual: current.decl_type.clone(),
                    });
                }
            }
            None => {
                let quoted_column = quote_ident(column);
                execute_ddl(
                    conn,
                    &format!("ALTER TABLE {} ADD COLUMN {} {}", quoted, quoted_column, storage),
                )?;

                let backfill = format!(
                    "UPDATE {} SET {} = ?1 WHERE {} IS NULL",
                    quoted, quoted_column, quoted_column
                );
                tracing::debug!(target: "liteorm::dml", "{}", backfill);
                let filled = conn.execute(&backfill, [storage.default_value()])?;
                tracing::debug!(table, column, rows = filled, "backfilled new column");

                report.added_columns.push(ColumnChange {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }
    }

    for column in &existing {
        if column.name.eq_ignore_ascii_case(IDENTITY_COLUMN) || definition.field_by_column(&column.name).is_some() {
            continue;
        }
        let change = ColumnChange {
            table: table.to_string(),
            column: column.name.clone(),
        };
        match policy {
            StalePolicy::Drop => {
                tracing::warn!(table, column = %column.name, "dropping column and its data");
                execute_ddl(
                    conn,
                    &format!("ALTER TABLE {} DROP COLUMN {}", quoted, quote_ident(&column.name)),
                )?;
                report.dropped_columns.push(change);
            }
            StalePolicy::Keep => {
                tracing::warn!(table, column = %column.name, "column no longer declared; keeping it");
                report.stale_columns.push(change);
            }
        }
    }

    tracing::info!(table, "table migrated");
    Ok(())
}
