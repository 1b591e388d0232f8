//! Error types for the ORM.

use nestql_core::DbError;
use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Schema, operator or query assembly error from the core.
    #[error(transparent)]
    Core(#[from] nestql_core::Error),

    /// Error reported by the connection.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Join inference found zero or several candidate relationships.
    #[error("cannot relate '{local}' to '{foreign}': {reason}")]
    RelationshipAmbiguous {
        local: String,
        foreign: String,
        reason: String,
    },

    /// `fetch` found no row for the given key.
    #[error("no records in '{table}' for key {key}")]
    EntityNotFound { table: String, key: String },

    /// An attribute that is not declared on the schema.
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    /// A condition tree with the wrong shape.
    #[error("invalid filter tree: {0}")]
    InvalidFilterTree(String),

    /// A value that cannot be rendered as SQL.
    #[error("cannot sanitize value for '{0}'")]
    Sanitization(String),

    /// Every pending row failed sanitization.
    #[error("no records passed sanitization for '{0}'")]
    NothingToInsert(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
