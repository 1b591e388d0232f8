//! Error types for the migration tool.

use std::path::PathBuf;

/// Errors that can occur while loading definitions or planning DDL.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// IO error (reading definition files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A definition file is not valid JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema, query or database error from the core.
    #[error(transparent)]
    Core(#[from] nestql_core::Error),

    /// A definition file failed validation.
    #[error("Invalid definition '{path}': {source}")]
    InvalidDefinition {
        /// Path to the definition file.
        path: PathBuf,
        /// What was wrong with it.
        source: nestql_core::Error,
    },

    /// No definition directory or file at the given path.
    #[error("Schema definition not found: {0}")]
    DefinitionNotFound(PathBuf),

    /// Two definition files declare the same table.
    #[error("Table '{table}' is declared by both '{first}' and '{second}'")]
    DuplicateTable {
        /// Table name.
        table: String,
        /// File that declared it first.
        first: PathBuf,
        /// File that declared it again.
        second: PathBuf,
    },

    /// A diff was requested between two different tables.
    #[error("Cannot diff table '{from}' against table '{to}'")]
    TableMismatch {
        /// Table of the current definition.
        from: String,
        /// Table of the target definition.
        to: String,
    },
}

impl From<nestql_core::DbError> for MigrateError {
    fn from(error: nestql_core::DbError) -> Self {
        Self::Core(error.into())
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
