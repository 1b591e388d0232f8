//! SELECT assembly with nested joins.
//!
//! A [`Query`] may join other queries, which may join further queries.
//! [`Query::merge_joined`] flattens that tree into a single join list so an
//! arbitrarily deep graph compiles into one statement.

use std::fmt;

use crate::error::{Error, Result};

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
        })
    }
}

/// `LIMIT [offset, ]count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: Option<u64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct NestedJoin {
    kind: JoinType,
    query: Query,
    conditions: Vec<String>,
}

/// A join already flattened to its table, alias and ON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatJoin {
    pub kind: JoinType,
    pub table: String,
    pub alias: String,
    pub condition: String,
}

/// A SELECT statement under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    alias: String,
    fields: Vec<(String, String)>,
    conditions: Vec<String>,
    joins: Vec<NestedJoin>,
    flat_joins: Vec<FlatJoin>,
    order_by: Vec<String>,
    group_by: Vec<String>,
    having: Vec<String>,
    limit: Option<Limit>,
    use_index: Vec<String>,
}

impl Query {
    /// Starts a query over `table`, aliased as `alias`.
    #[must_use]
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            fields: Vec::new(),
            conditions: Vec::new(),
            joins: Vec::new(),
            flat_joins: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            limit: None,
            use_index: Vec::new(),
        }
    }

    /// Starts a query aliased by its own table name.
    #[must_use]
    pub fn select(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(table.clone(), table)
    }

    /// Table alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Projected `(output alias, source)` pairs.
    #[must_use]
    pub fn field_list(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Flattened joins. Empty until [`Query::merge_joined`] runs.
    #[must_use]
    pub fn flat_joins(&self) -> &[FlatJoin] {
        &self.flat_joins
    }

    /// Projects `source` as `name`. A `None` source reads `alias.name`.
    /// Re-projecting a name replaces its source.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, source: Option<String>) -> Self {
        let name = name.into();
        let source = source.unwrap_or_else(|| format!("{}.{}", self.alias, name));
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = source;
        } else {
            self.fields.push((name, source));
        }
        self
    }

    /// Replaces the whole projection.
    #[must_use]
    pub fn fields(mut self, fields: Vec<(String, Option<String>)>) -> Self {
        self.fields.clear();
        for (name, source) in fields {
            self = self.field(name, source);
        }
        self
    }

    #[must_use]
    pub fn where_clause(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by.push(order.into());
        self
    }

    #[must_use]
    pub fn group_by(mut self, group: impl Into<String>) -> Self {
        self.group_by.push(group.into());
        self
    }

    #[must_use]
    pub fn having(mut self, condition: impl Into<String>) -> Self {
        self.having.push(condition.into());
        self
    }

    /// Sets `LIMIT count`.
    #[must_use]
    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(Limit {
            offset: None,
            count,
        });
        self
    }

    /// Sets `LIMIT offset, count`.
    #[must_use]
    pub fn limit_offset(mut self, offset: u64, count: u64) -> Self {
        self.limit = Some(Limit {
            offset: Some(offset),
            count,
        });
        self
    }

    /// Removes any limit.
    #[must_use]
    pub fn clear_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Adds a `USE INDEX` hint.
    #[must_use]
    pub fn use_index(mut self, index: impl Into<String>) -> Self {
        self.use_index.push(index.into());
        self
    }

    /// Joins another query. Its fields, conditions and nested joins are
    /// pulled up when the statement is flattened.
    #[must_use]
    pub fn join(mut self, kind: JoinType, query: Self, conditions: Vec<String>) -> Self {
        self.joins.push(NestedJoin {
            kind,
            query,
            conditions,
        });
        self
    }

    /// Flattens every nested join, depth first, into one join list.
    #[must_use]
    pub fn merge_joined(&self) -> Self {
        let mut merged = self.clone();
        let nested = std::mem::take(&mut merged.joins);

        for join in nested {
            let inner = join.query.merge_joined();
            merged.flat_joins.push(FlatJoin {
                kind: join.kind,
                table: inner.table.clone(),
                alias: inner.alias.clone(),
                condition: join.conditions.join(" AND "),
            });
            for (name, source) in inner.fields {
                merged = merged.field(name, Some(source));
            }
            merged.flat_joins.extend(inner.flat_joins);
            merged.conditions.extend(inner.conditions);
            merged.order_by.extend(inner.order_by);
            merged.group_by.extend(inner.group_by);
            merged.having.extend(inner.having);
        }

        merged
    }

    /// Renders the statement.
    pub fn to_sql(&self) -> Result<String> {
        let select = self.merge_joined();

        if select.fields.is_empty() {
            return Err(Error::QueryConstruction(format!(
                "no fields selected for query on '{}'",
                select.table
            )));
        }

        let mut sql = String::from("SELECT ");
        let columns: Vec<String> = select
            .fields
            .iter()
            .map(|(name, source)| format!("{source} AS `{name}`"))
            .collect();
        sql.push_str(&columns.join(", "));

        sql.push_str(&format!(" FROM {} `{}`", select.table, select.alias));

        if !select.use_index.is_empty() {
            sql.push_str(&format!(" USE INDEX ({})", select.use_index.join(", ")));
        }

        for join in &select.flat_joins {
            sql.push_str(&format!(
                " {} JOIN {} `{}` ON {}",
                join.kind, join.table, join.alias, join.condition
            ));
        }

        if !select.conditions.is_empty() {
            sql.push_str(&format!(" WHERE ({})", select.conditions.join(") AND (")));
        }

        if !select.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", select.group_by.join(", ")));
        }

        if !select.having.is_empty() {
            sql.push_str(&format!(" HAVING ({})", select.having.join(") AND (")));
        }

        if !select.order_by.is_empty() {
            let order: Vec<&str> = select
                .order_by
                .iter()
                .map(|entry| {
                    select
                        .fields
                        .iter()
                        .find(|(name, _)| name == entry)
                        .map_or(entry.as_str(), |(_, source)| source.as_str())
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        if let Some(limit) = select.limit {
            match limit.offset {
                Some(offset) => sql.push_str(&format!(" LIMIT {offset}, {}", limit.count)),
                None => sql.push_str(&format!(" LIMIT {}", limit.count)),
            }
        }

        Ok(sql)
    }
}
