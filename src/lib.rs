//! # liteorm - Lightweight object-relational persistence over SQLite
//!
//! Maps typed record definitions onto SQLite tables and keeps those tables in
//! step with the definitions as they evolve.
//!
//! liteorm provides:
//! - Static record definitions with a per-field storage classification
//! - Automatic, idempotent schema migration (add columns with default backfill)
//! - Recursive flattening of nested records, lists and mappings into flat rows
//! - The inverse loader, resolving `$ID:<Type>:<id>` reference tokens
//! - A small record access API: migrate, upsert, first, all, delete

pub mod codec;
pub mod config;
pub mod flatten;
pub mod load;
pub mod migrate;
pub mod record;
pub mod schema;
pub mod store;
pub mod ui;
pub mod value;

// Re-exports for convenient access
pub use codec::ReferenceToken;
pub use config::StoreConfig;
pub use migrate::MigrationReport;
pub use record::{Identity, Record};
pub use rusqlite::params;
pub use schema::{Classification, FieldType, IdentityKind, RecordDefinition, StorageType};
pub use store::Store;
pub use value::Value;

/// Result type alias for liteorm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for liteorm operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A table required for a write does not exist (migrate first)
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid record definition: {0}")]
    InvalidDefinition(String),

    #[error("Unknown record type: {0}")]
    UnknownDefinition(String),

    /// A value does not fit the classification declared for its field
    #[error("Type error in {record}.{field}: {message}")]
    Type {
        record: String,
        field: String,
        message: String,
    },

    #[error("Missing identity: {0} uses a natural key and the record carries no id")]
    MissingIdentity(String),

    #[error("Invalid reference token: {0}")]
    InvalidToken(String),

    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    #[error("Reference cycle detected at {0}")]
    ReferenceCycle(String),

    #[error("Reference depth limit of {0} exceeded")]
    DepthExceeded(usize),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn type_error(
        record: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Type {
            record: record.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}
