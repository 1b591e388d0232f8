//! # nestql-core
//!
//! Table metadata, SQL assembly and the connection contract for MySQL.
//!
//! This crate provides:
//! - [`Schema`] declarations with DDL generation, live-table introspection
//!   and ALTER diffs
//! - A [`Query`] builder whose joins nest arbitrarily and flatten into one
//!   statement
//! - Operator rendering for scalar, list, range and JSON-path conditions
//! - The [`Connection`] and [`Cursor`] traits every database call goes
//!   through, plus a scripted [`MemoryConnection`]
//!
//! ## Declaring a table
//!
//! ```rust
//! use nestql_core::{Attribute, Schema, TableOptions};
//!
//! let people = Schema::builder("people")
//!     .attribute("id", Attribute::new("int").unsigned().auto_increment())
//!     .attribute("name", Attribute::new("varchar").length(128))
//!     .primary_key(&["id"])
//!     .build()
//!     .unwrap();
//!
//! let sql = people.create_sql(&TableOptions::default());
//! assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `people`"));
//! ```
//!
//! ## Building a SELECT
//!
//! ```rust
//! use nestql_core::Query;
//!
//! let sql = Query::select("people")
//!     .field("id", None)
//!     .where_clause("people.id > 3")
//!     .limit(10)
//!     .to_sql()
//!     .unwrap();
//! assert_eq!(
//!     sql,
//!     "SELECT people.id AS `id` FROM people `people` WHERE (people.id > 3) LIMIT 10"
//! );
//! ```

pub mod connection;
pub mod error;
pub mod operator;
pub mod query;
pub mod schema;
pub mod value;

pub use connection::{Connection, Cursor, MemoryConnection, MemoryCursor, Row};
pub use error::{DbError, DbErrorKind, Error, Result};
pub use operator::{JsonOp, Operator};
pub use query::{FlatJoin, JoinType, Query};
pub use schema::{
    Attribute, DefaultValue, ForeignKey, ReferentialAction, Schema, SchemaBuilder, SqlType,
    TableOptions, Trigger, TriggerEvent, TriggerTiming,
};
pub use value::{InsertValue, Param, SqlValue, ToSqlValue};
