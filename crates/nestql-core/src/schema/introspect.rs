//! Live-table introspection and schema operations through a connection.

use regex::Regex;
use tracing::{info, warn};

use super::{Attribute, DefaultValue, ForeignKey, ReferentialAction, Schema, TableOptions};
use crate::connection::{Connection, Row};
use crate::error::{DbErrorKind, Error, Result};
use crate::value::SqlValue;

const FOREIGN_KEY_PATTERN: &str = r"FOREIGN KEY \(`([^`]+)`\) REFERENCES `([^`]+)` \(`([^`]+)`\)(?: ON DELETE (SET NULL|SET DEFAULT|NO ACTION|[A-Z]+))?(?: ON UPDATE (SET NULL|SET DEFAULT|NO ACTION|[A-Z]+))?";

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s.clone()),
        other => other.as_i64().map(|n| n.to_string()),
    }
}

/// Parses one `DESCRIBE` row into an attribute.
fn describe_attribute(row: &Row) -> Option<(Attribute, bool)> {
    let field = text(row, "Field")?;
    let full_type = text(row, "Type")?;

    let mut parts = full_type.split_whitespace();
    let type_part = parts.next()?;
    let unsigned = parts.any(|p| p.eq_ignore_ascii_case("unsigned"));

    let (type_name, length) = match type_part.split_once('(') {
        Some((name, rest)) => (name, Some(rest.trim_end_matches(')').to_string())),
        None => (type_part, None),
    };

    let nullable = text(row, "Null").is_some_and(|n| n == "YES");
    let auto_increment = text(row, "Extra").is_some_and(|e| e.contains("auto_increment"));
    let default = match text(row, "Default") {
        None if nullable => DefaultValue::Null,
        None => DefaultValue::None,
        Some(d) if is_expression(&d) => DefaultValue::Expression(d),
        Some(d) => DefaultValue::String(d),
    };
    let is_primary = text(row, "Key").is_some_and(|k| k == "PRI");

    let mut attribute = Attribute::new(type_name).column(field.clone());
    attribute.name = field;
    attribute.length = length;
    attribute.unsigned = unsigned;
    attribute.nullable = nullable;
    attribute.auto_increment = auto_increment;
    attribute.default = default;
    Some((attribute, is_primary))
}

fn is_expression(default: &str) -> bool {
    let upper = default.to_ascii_uppercase();
    upper.starts_with("CURRENT_TIMESTAMP") || upper == "NOW()" || default.ends_with("()")
}

/// Extracts foreign keys from `SHOW CREATE TABLE` output.
fn parse_foreign_keys(create_table: &str) -> Result<Vec<ForeignKey>> {
    let re = Regex::new(FOREIGN_KEY_PATTERN)
        .map_err(|e| Error::SchemaDefinition(format!("foreign key pattern: {e}")))?;
    re.captures_iter(create_table)
        .map(|caps| {
            let action = |i: usize| {
                caps.get(i)
                    .map_or(Ok(ReferentialAction::Restrict), |m| m.as_str().parse())
            };
            let mut fk = ForeignKey::references(&caps[2], &caps[3])
                .on_delete(action(4)?)
                .on_update(action(5)?);
            fk.attribute = caps[1].to_string();
            Ok(fk)
        })
        .collect()
}

impl Schema {
    /// Introspects a live table. Returns `None` when the table does not
    /// exist.
    pub fn load(conn: &dyn Connection, table: &str) -> Result<Option<Self>> {
        let mut cursor = match conn.query(&format!("DESCRIBE `{table}`")) {
            Ok(cursor) => cursor,
            Err(e) if e.kind == DbErrorKind::UnknownTable => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut schema = Self {
            table: table.to_string(),
            database: None,
            primary_key: Vec::new(),
            attributes: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            uniques: Vec::new(),
            triggers: Vec::new(),
        };

        while let Some(row) = cursor.fetch_row() {
            let Some((attribute, is_primary)) = describe_attribute(&row) else {
                warn!(table = %table, "Skipping unreadable DESCRIBE row");
                continue;
            };
            if is_primary {
                schema.primary_key.push(attribute.name.clone());
            }
            schema.attributes.push(attribute);
        }

        if schema.attributes.is_empty() {
            return Ok(None);
        }

        let mut cursor = conn.query(&format!("SHOW CREATE TABLE `{table}`"))?;
        while let Some(row) = cursor.fetch_row() {
            if let Some(create_table) = text(&row, "Create Table") {
                schema.foreign_keys.extend(parse_foreign_keys(&create_table)?);
            }
        }

        schema.normalized().map(Some)
    }

    /// Creates the table and its constraints.
    pub fn create(&self, conn: &dyn Connection, options: &TableOptions) -> Result<()> {
        info!(table = %self.table, "Creating table");
        for statement in self.create_statements(options) {
            conn.query(&statement)?;
        }
        Ok(())
    }

    /// (Re)creates every trigger.
    pub fn create_triggers(&self, conn: &dyn Connection) -> Result<()> {
        for statement in self.trigger_statements() {
            conn.query(&statement)?;
        }
        Ok(())
    }

    /// Creates the table if it is missing, otherwise alters the live table
    /// to match this declaration. Returns the statements that were run.
    pub fn patch(&self, conn: &dyn Connection, options: &TableOptions) -> Result<Vec<String>> {
        let Some(current) = Self::load(conn, &self.table)? else {
            self.create(conn, options)?;
            return Ok(self.create_statements(options));
        };

        let statements = current.alter_to(self);
        if statements.is_empty() {
            info!(table = %self.table, "Table is up to date");
        } else {
            info!(table = %self.table, changes = statements.len(), "Patching table");
        }
        for statement in &statements {
            conn.query(statement)?;
        }
        Ok(statements)
    }

    pub fn drop(&self, conn: &dyn Connection) -> Result<()> {
        conn.query(&format!("DROP TABLE IF EXISTS `{}`", self.table))?;
        Ok(())
    }

    pub fn truncate(&self, conn: &dyn Connection) -> Result<()> {
        conn.query(&format!("TRUNCATE `{}`", self.table))?;
        Ok(())
    }

    /// Deletes every row and resets AUTO_INCREMENT, honoring foreign keys.
    pub fn delete_all(&self, conn: &dyn Connection) -> Result<()> {
        conn.query(&format!("DELETE FROM `{}`", self.table))?;
        conn.query(&format!("ALTER TABLE `{}` AUTO_INCREMENT = 1", self.table))?;
        Ok(())
    }
}
