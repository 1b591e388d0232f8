//! JSON schema definition files.
//!
//! A definition directory holds one `*.json` file per table, each
//! deserializing into a [`Schema`]. Files are read in file-name order so
//! plans are reproducible.

use std::fs;
use std::path::{Path, PathBuf};

use nestql_core::Schema;
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Reads and validates a single definition file.
pub fn load_file(path: &Path) -> Result<Schema> {
    if !path.is_file() {
        return Err(MigrateError::DefinitionNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    debug!(path = %path.display(), "Reading schema definition");
    Schema::from_json(&content).map_err(|source| MigrateError::InvalidDefinition {
        path: path.to_path_buf(),
        source,
    })
}

/// The definitions found in one directory, in file-name order.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    entries: Vec<(PathBuf, Schema)>,
}

impl SchemaSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(MigrateError::DefinitionNotFound(dir.to_path_buf()));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        paths.retain(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"));
        paths.sort();

        let mut set = Self::new();
        for path in paths {
            let schema = load_file(&path)?;
            set.insert(path, schema)?;
        }
        Ok(set)
    }

    /// Adds a definition. A table may only be declared once.
    pub fn insert(&mut self, path: PathBuf, schema: Schema) -> Result<()> {
        if let Some((first, _)) = self.entries.iter().find(|(_, s)| s.table == schema.table) {
            return Err(MigrateError::DuplicateTable {
                table: schema.table,
                first: first.clone(),
                second: path,
            });
        }
        self.entries.push((path, schema));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, table: &str) -> Option<&Schema> {
        self.schemas().find(|s| s.table == table)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.entries.iter().map(|(_, s)| s)
    }

    /// Table names in load order.
    #[must_use]
    pub fn tables(&self) -> Vec<&str> {
        self.schemas().map(|s| s.table.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
