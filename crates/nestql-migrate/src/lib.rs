//! Declarative schema files and DDL planning for nestql.
//!
//! Tables are declared as JSON files, one per table, that deserialize into
//! [`nestql_core::Schema`]. This crate reads a directory of such files and
//! plans the statements that create them or bring a live database in line
//! with them.
//!
//! # Example
//!
//! ```rust
//! use nestql_core::{Schema, TableOptions};
//! use nestql_migrate::{plan_create, SchemaSet};
//!
//! let people = Schema::from_json(r#"{
//!     "table": "people",
//!     "primary_key": ["id"],
//!     "attributes": [
//!         {"name": "id", "type": "int", "unsigned": true, "auto_increment": true},
//!         {"name": "name", "type": "varchar", "length": "64"}
//!     ]
//! }"#).unwrap();
//!
//! let mut set = SchemaSet::new();
//! set.insert("people.json".into(), people).unwrap();
//!
//! let statements = plan_create(&set, &TableOptions::default());
//! assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS `people`"));
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Print the DDL creating every table in ./schemas
//! nestql-migrate create --dir schemas
//!
//! # Print the ALTER statements between two versions of a table
//! nestql-migrate diff schemas/people.json next/people.json
//! ```

pub mod definition;
pub mod error;
pub mod plan;

pub use definition::{load_file, SchemaSet};
pub use error::{MigrateError, Result};
pub use plan::{apply, plan_create, plan_diff, to_script};
