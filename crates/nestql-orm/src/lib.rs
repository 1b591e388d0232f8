//! # nestql-orm
//!
//! Declarative collections over MySQL tables whose joined results come back
//! as nested objects.
//!
//! This crate provides:
//! - [`Collection`] for projections, conditions, joins with inferred
//!   relationships, paging and batched upserts
//! - [`ResultIterator`] folding a flat joined rowset into [`Record`] trees
//! - [`AliasMap`] translating attribute paths into qualified columns
//! - Sortable compact identifiers ([`unique_id`])
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use nestql_core::{Attribute, Connection, ForeignKey, MemoryConnection, Row, Schema, SqlValue};
//! use nestql_orm::Collection;
//! use serde_json::json;
//!
//! let people = Schema::builder("people")
//!     .attribute("id", Attribute::new("int").auto_increment())
//!     .attribute("name", Attribute::new("varchar").length(64))
//!     .primary_key(&["id"])
//!     .build()
//!     .unwrap();
//! let pets = Schema::builder("pets")
//!     .attribute("id", Attribute::new("int").auto_increment())
//!     .attribute("name", Attribute::new("varchar").length(64))
//!     .attribute("owner", Attribute::new("int"))
//!     .primary_key(&["id"])
//!     .foreign_key("owner", ForeignKey::references("people", "id"))
//!     .build()
//!     .unwrap();
//!
//! let row = |pet_id: i64, pet: &str| {
//!     Row::new([
//!         ("id", SqlValue::from(1)),
//!         ("name", SqlValue::from("Santiago")),
//!         ("pets.id", SqlValue::from(pet_id)),
//!         ("pets.name", SqlValue::from(pet)),
//!     ])
//! };
//! let memory = Rc::new(MemoryConnection::new());
//! memory.respond("SELECT", vec![row(1, "Rufus"), row(2, "Buddy")]);
//! let conn: Rc<dyn Connection> = memory;
//!
//! let owners = Collection::new(people, Rc::clone(&conn))
//!     .attribute("name")
//!     .attribute_join("pets", Collection::new(pets, conn).attribute("name"))
//!     .unwrap();
//!
//! let records = owners.find().unwrap().to_serializable();
//! assert_eq!(
//!     records,
//!     json!([{"name": "Santiago", "pets": [{"name": "Rufus"}, {"name": "Buddy"}]}])
//! );
//! ```

pub mod alias;
pub mod collection;
mod error;
pub mod iterator;
pub mod record;
pub mod unique_id;

pub use alias::AliasMap;
pub use collection::{Collection, OrderDirection};
pub use error::{OrmError, Result};
pub use iterator::{ResultIterator, RowFilter};
pub use record::{Field, Record};
pub use unique_id::{unique_id, unique_id_timestamp};

// Re-export commonly used types from nestql-core
pub use nestql_core::{Connection, Operator, Schema, SqlValue};
