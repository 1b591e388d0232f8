//! Migration diff between two versions of one table.

use super::Schema;

impl Schema {
    /// ALTER statements that turn `self` (usually the live table) into
    /// `target`.
    ///
    /// Attributes missing from `target` are dropped. Target attributes are
    /// then walked in declaration order: new ones are added right after the
    /// previous target attribute (or `FIRST`), and existing ones are
    /// changed only when a comparable property differs. `alter_to` of a
    /// schema against itself is empty.
    #[must_use]
    pub fn alter_to(&self, target: &Self) -> Vec<String> {
        let mut statements = Vec::new();

        for attr in &self.attributes {
            if !target.has_attribute(&attr.name) {
                statements.push(format!("ALTER TABLE `{}` DROP `{}`", self.table, attr.column));
            }
        }

        let mut previous: Option<&str> = None;

        for attr in &target.attributes {
            match self.attribute(&attr.name) {
                None => {
                    let position =
                        previous.map_or_else(|| "FIRST".to_string(), |p| format!("AFTER `{p}`"));
                    statements.push(format!(
                        "ALTER TABLE `{}` ADD {} {position}",
                        self.table,
                        attr.definition()
                    ));
                }
                Some(current) if current.differs_from(attr) => {
                    statements.push(format!(
                        "ALTER TABLE `{}` CHANGE `{}` {}",
                        self.table,
                        current.column,
                        attr.definition()
                    ));
                }
                Some(_) => {}
            }
            previous = Some(&attr.column);
        }

        statements
    }
}
