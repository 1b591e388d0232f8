//! DDL generation.
//!
//! CREATE TABLE carries columns, the primary key and one plain index per
//! foreign-key column. Constraints, secondary indexes and uniques are
//! emitted as separate ALTER TABLE statements so a whole set of tables can
//! be created before any of them references another.

use super::Schema;

/// Table options for CREATE TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub engine: String,
    pub charset: String,
    pub collation: String,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            engine: "InnoDB".to_string(),
            charset: "utf8".to_string(),
            collation: "utf8_general_ci".to_string(),
        }
    }
}

impl Schema {
    /// `CREATE TABLE IF NOT EXISTS` for this schema.
    #[must_use]
    pub fn create_sql(&self, options: &TableOptions) -> String {
        let mut lines: Vec<String> = self
            .attributes
            .iter()
            .map(|attr| format!("\t{}", attr.definition()))
            .collect();

        let key_columns: Vec<String> = self
            .primary_key
            .iter()
            .filter_map(|key| self.column(key))
            .map(|column| format!("`{column}`"))
            .collect();
        lines.push(format!("\tPRIMARY KEY ({})", key_columns.join(", ")));

        for fk in &self.foreign_keys {
            if let Some(column) = self.column(&fk.attribute) {
                lines.push(format!("\tKEY `{column}` (`{column}`)"));
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS `{}` (\n{}\n) ENGINE={} CHARACTER SET {} COLLATE {};",
            self.table,
            lines.join(",\n"),
            options.engine,
            options.charset,
            options.collation
        )
    }

    /// One ALTER TABLE adding every foreign-key constraint, named
    /// `<table>_fk<n>` in declaration order.
    #[must_use]
    pub fn foreign_keys_sql(&self) -> Option<String> {
        if self.foreign_keys.is_empty() {
            return None;
        }
        let clauses: Vec<String> = self
            .foreign_keys
            .iter()
            .enumerate()
            .map(|(i, fk)| {
                let column = self.column(&fk.attribute).unwrap_or(&fk.attribute);
                format!(
                    "ADD CONSTRAINT `{}_fk{}` FOREIGN KEY (`{column}`) REFERENCES `{}` (`{}`) ON DELETE {} ON UPDATE {}",
                    self.table,
                    i + 1,
                    fk.table,
                    fk.column,
                    fk.on_delete.to_sql(),
                    fk.on_update.to_sql()
                )
            })
            .collect();
        Some(self.alter(&clauses))
    }

    /// One ALTER TABLE adding every named index.
    #[must_use]
    pub fn indexes_sql(&self) -> Option<String> {
        if self.indexes.is_empty() {
            return None;
        }
        let clauses: Vec<String> = self
            .indexes
            .iter()
            .map(|index| format!("ADD INDEX `{}` ({})", index.name, self.column_list(&index.attributes)))
            .collect();
        Some(self.alter(&clauses))
    }

    /// One ALTER TABLE adding every unique constraint.
    #[must_use]
    pub fn uniques_sql(&self) -> Option<String> {
        if self.uniques.is_empty() {
            return None;
        }
        let clauses: Vec<String> = self
            .uniques
            .iter()
            .map(|attributes| format!("ADD UNIQUE ({})", self.column_list(attributes)))
            .collect();
        Some(self.alter(&clauses))
    }

    /// DROP/CREATE pairs for every trigger.
    ///
    /// Trigger bodies only run while `@DISABLE_TRIGGERS` is unset, so bulk
    /// loads can switch them off for a session.
    #[must_use]
    pub fn trigger_statements(&self) -> Vec<String> {
        let mut statements = Vec::with_capacity(self.triggers.len() * 2);
        for (i, trigger) in self.triggers.iter().enumerate() {
            let name = format!("{}_{}_{}_{}", trigger.table, trigger.timing, trigger.event, i + 1);
            statements.push(format!("DROP TRIGGER IF EXISTS `{name}`"));
            statements.push(format!(
                "CREATE TRIGGER `{name}` {} {} ON `{}` FOR EACH ROW BEGIN IF (@DISABLE_TRIGGERS IS NULL) THEN {} END IF; END",
                trigger.timing.to_string().to_uppercase(),
                trigger.event.to_string().to_uppercase(),
                trigger.table,
                trigger.statement
            ));
        }
        statements
    }

    /// Everything needed to create the table from scratch, in order.
    #[must_use]
    pub fn create_statements(&self, options: &TableOptions) -> Vec<String> {
        let mut statements = vec![self.create_sql(options)];
        statements.extend(self.constraint_statements());
        statements
    }

    /// ALTER statements that must wait until referenced tables exist.
    #[must_use]
    pub fn constraint_statements(&self) -> Vec<String> {
        [self.foreign_keys_sql(), self.indexes_sql(), self.uniques_sql()]
            .into_iter()
            .flatten()
            .collect()
    }

    fn alter(&self, clauses: &[String]) -> String {
        format!("ALTER TABLE `{}` {}", self.table, clauses.join(", "))
    }

    fn column_list(&self, attributes: &[String]) -> String {
        attributes
            .iter()
            .map(|a| format!("`{}`", self.column(a).unwrap_or(a)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
