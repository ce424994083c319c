//! Schema layer - record definitions and the type mapper
//!
//! Definitions are built once (validated at construction) and registered
//! with a [`Store`](crate::Store) on migration. Reads and writes consult the
//! registry instead of inspecting values at call time.

pub mod definition;
pub mod file;
pub mod types;

pub use definition::{FieldDef, IdentityKind, RecordDefinition, RecordDefinitionBuilder};
pub use file::{load_schema, parse_schema};
pub use types::{Classification, FieldType, StorageType};

use std::collections::HashMap;

/// Record definitions known to a store, keyed by record name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    definitions: HashMap<String, RecordDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any earlier one of the same name
    pub fn insert(&mut self, definition: RecordDefinition) {
        self.definitions.insert(definition.name().to_string(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&RecordDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered record names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
