//! DDL planning and application.
//!
//! Creating a set of tables runs in three passes: every CREATE TABLE first,
//! then the ALTER statements adding foreign keys, indexes and uniques, then
//! triggers. A table may therefore reference any other table of the set
//! regardless of file order.

use nestql_core::{Connection, Schema, TableOptions};
use tracing::info;

use crate::definition::SchemaSet;
use crate::error::{MigrateError, Result};

/// Statements creating every table of `set` from scratch.
#[must_use]
pub fn plan_create(set: &SchemaSet, options: &TableOptions) -> Vec<String> {
    let mut statements: Vec<String> = set.schemas().map(|s| s.create_sql(options)).collect();
    statements.extend(set.schemas().flat_map(Schema::constraint_statements));
    statements.extend(set.schemas().flat_map(Schema::trigger_statements));
    statements
}

/// Statements turning `from` into `to`. Both must describe the same table.
pub fn plan_diff(from: &Schema, to: &Schema) -> Result<Vec<String>> {
    if from.table != to.table {
        return Err(MigrateError::TableMismatch {
            from: from.table.clone(),
            to: to.table.clone(),
        });
    }
    Ok(from.alter_to(to))
}

/// Brings a live database in line with `set`.
///
/// Missing tables are created, existing ones are altered to match their
/// definition. Constraints are only added for tables created here; triggers
/// are recreated for every table. Returns the statements that were run,
/// introspection queries excluded.
pub fn apply(conn: &dyn Connection, set: &SchemaSet, options: &TableOptions) -> Result<Vec<String>> {
    let mut executed = Vec::new();
    let mut created = Vec::new();

    for schema in set.schemas() {
        let statements = match Schema::load(conn, &schema.table)? {
            None => {
                info!(table = %schema.table, "Creating table");
                created.push(schema);
                vec![schema.create_sql(options)]
            }
            Some(current) => {
                let statements = current.alter_to(schema);
                if statements.is_empty() {
                    info!(table = %schema.table, "Table is up to date");
                } else {
                    info!(table = %schema.table, changes = statements.len(), "Patching table");
                }
                statements
            }
        };
        run(conn, statements, &mut executed)?;
    }

    for schema in created {
        run(conn, schema.constraint_statements(), &mut executed)?;
    }
    for schema in set.schemas() {
        run(conn, schema.trigger_statements(), &mut executed)?;
    }
    Ok(executed)
}

fn run(conn: &dyn Connection, statements: Vec<String>, executed: &mut Vec<String>) -> Result<()> {
    for statement in statements {
        conn.query(&statement)?;
        executed.push(statement);
    }
    Ok(())
}

/// Formats statements as a script, one `;`-terminated statement per line.
#[must_use]
pub fn to_script(statements: &[String]) -> String {
    statements.iter().map(|s| format!("{s};\n")).collect()
}
