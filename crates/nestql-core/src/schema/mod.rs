//! Table metadata.
//!
//! A [`Schema`] describes one table: its attributes in declaration order,
//! primary key, foreign keys, indexes, unique constraints and triggers.
//! Schemas are built once, through [`SchemaBuilder`], from a JSON
//! definition, or by introspecting a live table with [`Schema::load`], and
//! are not mutated afterwards. Migrations compare two schemas with
//! [`Schema::alter_to`].

mod attribute;
mod ddl;
mod diff;
mod introspect;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use attribute::{Attribute, DefaultValue, SqlType};
pub use ddl::TableOptions;

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReferentialAction {
    /// Refuse the change while referencing rows exist.
    #[default]
    #[serde(rename = "RESTRICT")]
    Restrict,
    /// Cascade the delete/update to referencing rows.
    #[serde(rename = "CASCADE")]
    Cascade,
    /// Set the foreign key column to NULL.
    #[serde(rename = "SET NULL")]
    SetNull,
    /// No action (same as RESTRICT in InnoDB).
    #[serde(rename = "NO ACTION")]
    NoAction,
    /// Set the foreign key column to its default value.
    #[serde(rename = "SET DEFAULT")]
    SetDefault,
}

impl ReferentialAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::NoAction => "NO ACTION",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl FromStr for ReferentialAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Ok(Self::Restrict),
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "NO ACTION" => Ok(Self::NoAction),
            "SET DEFAULT" => Ok(Self::SetDefault),
            other => Err(Error::SchemaDefinition(format!(
                "unknown referential action '{other}'"
            ))),
        }
    }
}

/// A foreign key declared on one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local attribute holding the reference.
    #[serde(default)]
    pub attribute: String,
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

impl ForeignKey {
    /// References `table`.`column` with RESTRICT on both events.
    #[must_use]
    pub fn references(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            attribute: String::new(),
            table: table.into(),
            column: column.into(),
            on_delete: ReferentialAction::Restrict,
            on_update: ReferentialAction::Restrict,
        }
    }

    #[must_use]
    pub const fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    #[must_use]
    pub const fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A named secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerTiming {
    Before,
    After,
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::After => "after",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A row trigger watching `table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    /// Watched table. Empty means the schema's own table.
    #[serde(default)]
    pub table: String,
    /// Statement run for each row.
    pub statement: String,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub table: String,
    /// Logical database identifier, when the table lives outside the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Attributes in declaration order, which is also column order.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub uniques: Vec<Vec<String>>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl Schema {
    /// Starts declaring a schema for `table`.
    #[must_use]
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(table)
    }

    /// Parses and validates a JSON definition.
    pub fn from_json(definition: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(definition)?;
        schema.normalized()
    }

    /// Fills implied values (column names, trigger tables) and checks every
    /// cross reference.
    pub fn normalized(mut self) -> Result<Self> {
        for attr in &mut self.attributes {
            if attr.column.is_empty() {
                attr.column.clone_from(&attr.name);
            }
        }
        for trigger in &mut self.triggers {
            if trigger.table.is_empty() {
                trigger.table.clone_from(&self.table);
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(Error::SchemaDefinition(format!("{}: {msg}", self.table)))
        };

        if self.table.is_empty() {
            return Err(Error::SchemaDefinition("missing table name".to_string()));
        }
        for (i, attr) in self.attributes.iter().enumerate() {
            if attr.name.is_empty() {
                return fail("attribute without a name".to_string());
            }
            if attr.sql_type.name().is_empty() {
                return fail(format!("attribute '{}' has no type", attr.name));
            }
            if self.attributes[..i].iter().any(|a| a.name == attr.name) {
                return fail(format!("attribute '{}' declared twice", attr.name));
            }
        }
        if self.primary_key.is_empty() {
            return fail("no primary key".to_string());
        }
        for key in &self.primary_key {
            if !self.has_attribute(key) {
                return fail(format!("primary key references unknown attribute '{key}'"));
            }
        }
        for fk in &self.foreign_keys {
            if !self.has_attribute(&fk.attribute) {
                return fail(format!(
                    "foreign key on unknown attribute '{}'",
                    fk.attribute
                ));
            }
            if fk.table.is_empty() || fk.column.is_empty() {
                return fail(format!(
                    "foreign key '{}' needs a table and a column",
                    fk.attribute
                ));
            }
        }
        for index in &self.indexes {
            if let Some(missing) = index.attributes.iter().find(|a| !self.has_attribute(a)) {
                return fail(format!(
                    "index '{}' references unknown attribute '{missing}'",
                    index.name
                ));
            }
        }
        for unique in &self.uniques {
            if let Some(missing) = unique.iter().find(|a| !self.has_attribute(a)) {
                return fail(format!("unique constraint references unknown attribute '{missing}'"));
            }
        }
        Ok(())
    }

    /// Primary-key attribute names.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.primary_key
    }

    /// First primary-key attribute.
    #[must_use]
    pub fn first_key(&self) -> Option<&str> {
        self.primary_key.first().map(String::as_str)
    }

    #[must_use]
    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Backing column of an attribute.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&str> {
        self.attribute(name).map(|a| a.column.as_str())
    }

    #[must_use]
    pub fn is_json(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.json)
    }

    #[must_use]
    pub fn is_auto_increment(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.auto_increment)
    }

    #[must_use]
    pub fn accepts_null(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.nullable)
    }

    /// Columns filled in by AUTO_INCREMENT.
    #[must_use]
    pub fn auto_increment_columns(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.auto_increment)
            .map(|a| a.column.as_str())
            .collect()
    }

    #[must_use]
    pub fn has_foreign_key(&self, attribute: &str) -> bool {
        self.foreign_key(attribute).is_some()
    }

    #[must_use]
    pub fn foreign_key(&self, attribute: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.attribute == attribute)
    }

    /// Foreign keys pointing at `table`.
    #[must_use]
    pub fn foreign_keys_to(&self, table: &str) -> Vec<&ForeignKey> {
        self.foreign_keys.iter().filter(|fk| fk.table == table).collect()
    }
}

/// Declares a [`Schema`].
///
/// Declarations are checked as they are made. The first bad declaration is
/// kept and reported by [`SchemaBuilder::build`]; later calls are ignored.
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
    error: Option<Error>,
}

impl SchemaBuilder {
    fn new(table: impl Into<String>) -> Self {
        Self {
            schema: Schema {
                table: table.into(),
                database: None,
                primary_key: Vec::new(),
                attributes: Vec::new(),
                foreign_keys: Vec::new(),
                indexes: Vec::new(),
                uniques: Vec::new(),
                triggers: Vec::new(),
            },
            error: None,
        }
    }

    fn check(&mut self, names: &[&str], what: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        if let Some(missing) = names.iter().find(|n| !self.schema.has_attribute(n)) {
            self.error = Some(Error::SchemaDefinition(format!(
                "{}: {what} references undeclared attribute '{missing}'",
                self.schema.table
            )));
            return false;
        }
        true
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.schema.database = Some(database.into());
        self
    }

    /// Declares an attribute. Its column defaults to `name`.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, mut attribute: Attribute) -> Self {
        if self.error.is_some() {
            return self;
        }
        attribute.name = name.into();
        if attribute.column.is_empty() {
            attribute.column.clone_from(&attribute.name);
        }
        if self.schema.has_attribute(&attribute.name) {
            self.error = Some(Error::SchemaDefinition(format!(
                "{}: attribute '{}' declared twice",
                self.schema.table, attribute.name
            )));
            return self;
        }
        self.schema.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn primary_key(mut self, names: &[&str]) -> Self {
        if self.check(names, "primary key") {
            self.schema.primary_key = names.iter().map(ToString::to_string).collect();
        }
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, name: &str, mut foreign_key: ForeignKey) -> Self {
        if self.check(&[name], "foreign key") {
            foreign_key.attribute = name.to_string();
            self.schema.foreign_keys.retain(|fk| fk.attribute != name);
            self.schema.foreign_keys.push(foreign_key);
        }
        self
    }

    #[must_use]
    pub fn index(mut self, name: &str, attributes: &[&str]) -> Self {
        if self.check(attributes, "index") {
            self.schema.indexes.push(Index {
                name: name.to_string(),
                attributes: attributes.iter().map(ToString::to_string).collect(),
            });
        }
        self
    }

    #[must_use]
    pub fn unique(mut self, attributes: &[&str]) -> Self {
        if self.check(attributes, "unique constraint") {
            self.schema
                .uniques
                .push(attributes.iter().map(ToString::to_string).collect());
        }
        self
    }

    /// Declares a trigger. `table` defaults to this schema's table.
    #[must_use]
    pub fn trigger(
        mut self,
        timing: TriggerTiming,
        event: TriggerEvent,
        table: Option<&str>,
        statement: impl Into<String>,
    ) -> Self {
        let table = table.map_or_else(|| self.schema.table.clone(), ToString::to_string);
        self.schema.triggers.push(Trigger {
            timing,
            event,
            table,
            statement: statement.into(),
        });
        self
    }

    /// Finishes the declaration.
    pub fn build(self) -> Result<Schema> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.schema.normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pets() -> SchemaBuilder {
        Schema::builder("pets")
            .attribute("id", Attribute::new("int").unsigned().auto_increment())
            .attribute("name", Attribute::new("varchar").length(64))
            .attribute("owner", Attribute::new("int").unsigned().nullable())
            .attribute("sitter", Attribute::new("int").unsigned().nullable())
            .primary_key(&["id"])
    }

    #[test]
    fn test_build_and_lookup() {
        let schema = pets()
            .foreign_key(
                "owner",
                ForeignKey::references("people", "id").on_delete(ReferentialAction::Cascade),
            )
            .foreign_key("sitter", ForeignKey::references("people", "id"))
            .index("by_name", &["name"])
            .unique(&["name", "owner"])
            .build()
            .unwrap();

        assert_eq!(schema.keys(), ["id"]);
        assert_eq!(schema.column("name"), Some("name"));
        assert!(schema.is_auto_increment("id"));
        assert!(schema.accepts_null("owner"));
        assert_eq!(schema.foreign_keys_to("people").len(), 2);
        assert_eq!(schema.auto_increment_columns(), vec!["id"]);
        assert_eq!(
            schema.foreign_key("owner").map(|fk| fk.on_delete),
            Some(ReferentialAction::Cascade)
        );
    }

    #[test]
    fn test_undeclared_reference_fails() {
        let err = pets()
            .foreign_key("breeder", ForeignKey::references("people", "id"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("breeder"));

        let err = Schema::builder("t")
            .attribute("a", Attribute::new("int"))
            .primary_key(&["b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::SchemaDefinition(_)));
    }

    #[test]
    fn test_missing_key_fails() {
        let err = Schema::builder("t")
            .attribute("a", Attribute::new("int"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no primary key"));
    }

    #[test]
    fn test_from_json() {
        let schema = Schema::from_json(
            r#"{
                "table": "people",
                "primary_key": ["id"],
                "attributes": [
                    {"name": "id", "type": "integer", "unsigned": true, "auto_increment": true},
                    {"name": "name", "column": "full_name", "type": "varchar", "length": "128"}
                ],
                "foreign_keys": [],
                "triggers": [
                    {"timing": "after", "event": "insert", "statement": "SET @n = 1;"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(schema.column("id"), Some("id"));
        assert_eq!(schema.column("name"), Some("full_name"));
        assert_eq!(schema.attribute("id").map(|a| &a.sql_type), Some(&SqlType::Int));
        assert_eq!(schema.triggers[0].table, "people");
    }

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(
            "set null".parse::<ReferentialAction>().unwrap(),
            ReferentialAction::SetNull
        );
        assert!("EXPLODE".parse::<ReferentialAction>().is_err());
    }
}
