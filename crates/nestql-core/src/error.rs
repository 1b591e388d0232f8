//! Error types for schema, value and query handling.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A schema declaration references something that does not exist or is
    /// missing a required part.
    #[error("schema definition error: {0}")]
    SchemaDefinition(String),

    /// An operator token outside the supported vocabulary.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// A statement could not be assembled.
    #[error("query construction error: {0}")]
    QueryConstruction(String),

    /// A value cannot be rendered as a SQL literal.
    #[error("cannot sanitize value: {0}")]
    Sanitization(String),

    /// A JSON condition has the wrong shape.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// Error reported by the connection.
    #[error(transparent)]
    Db(#[from] DbError),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic kind of a native database error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// A NOT NULL column received NULL (1048).
    CannotBeNull,
    /// Unknown column (1054).
    UnknownColumn,
    /// Duplicate entry for a unique key (1062).
    DuplicateKey,
    /// SQL syntax error (1064).
    ParseError,
    /// Unknown table (1146).
    UnknownTable,
    /// Row is still referenced by a foreign key (1451).
    ForeignKeyConstraint,
    /// Referenced row does not exist (1452).
    ReferenceNotFound,
    /// Anything else.
    Generic,
}

impl DbErrorKind {
    /// Maps a MySQL native error number to its kind.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1048 => Self::CannotBeNull,
            1054 => Self::UnknownColumn,
            1062 => Self::DuplicateKey,
            1064 => Self::ParseError,
            1146 => Self::UnknownTable,
            1451 => Self::ForeignKeyConstraint,
            1452 => Self::ReferenceNotFound,
            _ => Self::Generic,
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CannotBeNull => "cannot be null",
            Self::UnknownColumn => "unknown column",
            Self::DuplicateKey => "duplicate key",
            Self::ParseError => "parse error",
            Self::UnknownTable => "unknown table",
            Self::ForeignKeyConstraint => "foreign key constraint",
            Self::ReferenceNotFound => "reference not found",
            Self::Generic => "database error",
        };
        f.write_str(name)
    }
}

/// An error raised by the connection, carrying the failed statement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} ({code}): {message}")]
pub struct DbError {
    /// Semantic kind derived from `code`.
    pub kind: DbErrorKind,
    /// Native error number.
    pub code: u32,
    /// Native error message.
    pub message: String,
    /// Statement that failed, when known.
    pub sql: Option<String>,
}

impl DbError {
    /// Creates an error from a native code and message.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            kind: DbErrorKind::from_code(code),
            code,
            message: message.into(),
            sql: None,
        }
    }

    /// Attaches the failed statement.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// For duplicate-key errors, returns the offending `(entry, key)` pair.
    #[must_use]
    pub fn duplicate_entry(&self) -> Option<(String, String)> {
        if self.kind != DbErrorKind::DuplicateKey {
            return None;
        }
        let re = Regex::new(r"Duplicate entry '(.+)' for key '(.+)'").ok()?;
        let caps = re.captures(&self.message)?;
        Some((caps[1].to_string(), caps[2].to_string()))
    }
}
