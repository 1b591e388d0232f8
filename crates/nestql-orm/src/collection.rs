//! Declarative collections.
//!
//! A [`Collection`] wraps a [`Schema`] and accumulates projections,
//! conditions and joins. [`Collection::find`] compiles everything into one
//! SELECT, runs it and returns a [`ResultIterator`] that folds the rows
//! back into nested records.
//!
//! Joined collections live in an arena owned by the root. Every node has
//! an alias path (`pets`, `pets.toys`) that names its table alias and
//! prefixes its output fields. Conditions are written against attribute
//! paths relative to the collection they are declared on; when a
//! collection is joined into another one its paths are rebased onto its
//! new alias.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use nestql_core::operator::{is_operator_object, json_condition, split_operator_object};
use nestql_core::value::bind_parameters;
use nestql_core::{
    Connection, InsertValue, JoinType, Operator, Param, Query, Schema, SqlValue,
};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::alias::AliasMap;
use crate::error::{OrmError, Result};
use crate::iterator::{ResultIterator, RowFilter};
use crate::record::Record;
use crate::unique_id;

/// Rows buffered before an automatic flush.
pub const DEFAULT_MAX_PILE_SIZE: usize = 2500;

const SEARCH_WORD_PATTERN: &str = r#""[^"]*"|[^\s"]+"#;

/// Order direction for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    #[default]
    Asc,
    /// Descending order (DESC)
    Desc,
}

impl OrderDirection {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Where a projected attribute comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Column,
    Expression(String),
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JoinOn {
    Columns { local: String, foreign: String },
    Condition(String),
}

#[derive(Debug, Clone)]
struct JoinEdge {
    name: String,
    node: usize,
    on: JoinOn,
}

#[derive(Debug, Clone)]
struct Node {
    schema: Rc<Schema>,
    alias: Option<String>,
    attributes: Vec<(String, Source)>,
    joins: Vec<JoinEdge>,
    conditions: Vec<String>,
    order: Vec<String>,
    group: Vec<String>,
    having: Vec<String>,
    not_empty: bool,
    related_with: Option<String>,
    has_one_element: bool,
    filters: Vec<RowFilter>,
}

impl Node {
    fn new(schema: Rc<Schema>) -> Self {
        Self {
            schema,
            alias: None,
            attributes: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            group: Vec::new(),
            having: Vec::new(),
            not_empty: false,
            related_with: None,
            has_one_element: false,
            filters: Vec::new(),
        }
    }

    fn table_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.schema.table)
    }

    fn prefix(&self) -> String {
        self.alias
            .as_ref()
            .map_or_else(String::new, |alias| format!("{alias}."))
    }

    fn qualified(&self, attribute: &str) -> Option<String> {
        let column = self.schema.column(attribute)?;
        Some(format!("`{}`.`{column}`", self.table_alias()))
    }

    fn join(&self, name: &str) -> Option<&JoinEdge> {
        self.joins.iter().find(|edge| edge.name == name)
    }

    fn add_attribute(&mut self, name: &str, source: Source) {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = source,
            None => self.attributes.push((name.to_string(), source)),
        }
    }

    fn rewrite(&mut self, renames: &AliasMap) {
        for list in [
            &mut self.conditions,
            &mut self.order,
            &mut self.group,
            &mut self.having,
        ] {
            for entry in list.iter_mut() {
                *entry = renames.translate(entry);
            }
        }
        for (_, source) in &mut self.attributes {
            if let Source::Expression(expr) = source {
                *expr = renames.translate(expr);
            }
        }
        for edge in &mut self.joins {
            if let JoinOn::Condition(condition) = &mut edge.on {
                *condition = renames.translate(condition);
            }
        }
    }
}

type ConditionFn = Rc<dyn Fn(Collection, &Value) -> Result<Collection>>;

/// A declarative query over one table and the tables joined to it.
///
/// Builder methods consume and return the collection. Execution and
/// unit-of-work methods borrow it.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
///
/// use nestql_core::{Attribute, Connection, MemoryConnection, Schema};
/// use nestql_orm::Collection;
/// use serde_json::json;
///
/// let people = Schema::builder("people")
///     .attribute("id", Attribute::new("int").auto_increment())
///     .attribute("name", Attribute::new("varchar").length(64))
///     .attribute("age", Attribute::new("int").nullable())
///     .primary_key(&["id"])
///     .build()
///     .unwrap();
///
/// let conn: Rc<dyn Connection> = Rc::new(MemoryConnection::new());
/// let adults = Collection::new(people, conn)
///     .attributes(&["name"])
///     .match_with("age", &json!(18), "&gte".parse().unwrap())
///     .unwrap()
///     .limit(10);
///
/// assert_eq!(
///     adults.get_query().to_sql().unwrap(),
///     "SELECT `people`.`id` AS `id`, `people`.`name` AS `name` FROM people `people` \
///      WHERE (`people`.`age` >= 18) LIMIT 10"
/// );
/// ```
pub struct Collection {
    conn: Rc<dyn Connection>,
    nodes: Vec<Node>,
    limit: Option<u64>,
    offset: Option<u64>,
    page: Option<u64>,
    pile: Vec<Vec<(String, InsertValue)>>,
    rejected: usize,
    max_pile_size: usize,
    insert_count: u64,
    values: Vec<(String, Value)>,
    custom_conditions: HashMap<String, ConditionFn>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("nodes", &self.nodes)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("page", &self.page)
            .field("pending", &self.pile.len())
            .field("insert_count", &self.insert_count)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl Collection {
    /// Creates a collection over `schema`.
    pub fn new(schema: impl Into<Rc<Schema>>, conn: Rc<dyn Connection>) -> Self {
        Self {
            conn,
            nodes: vec![Node::new(schema.into())],
            limit: None,
            offset: None,
            page: None,
            pile: Vec::new(),
            rejected: 0,
            max_pile_size: DEFAULT_MAX_PILE_SIZE,
            insert_count: 0,
            values: Vec::new(),
            custom_conditions: HashMap::new(),
        }
    }

    /// Creates a collection over a live table's introspected schema.
    pub fn load(conn: Rc<dyn Connection>, table: &str) -> Result<Self> {
        let schema = Schema::load(conn.as_ref(), table)?.ok_or_else(|| {
            nestql_core::Error::SchemaDefinition(format!("table '{table}' does not exist"))
        })?;
        Ok(Self::new(schema, conn))
    }

    /// Generates a sortable unique identifier.
    #[must_use]
    pub fn unique_id() -> String {
        unique_id::unique_id()
    }

    /// Unix timestamp encoded in an identifier from [`Collection::unique_id`].
    #[must_use]
    pub fn unique_id_timestamp(id: &str) -> Option<i64> {
        unique_id::unique_id_timestamp(id)
    }

    fn root(&self) -> &Node {
        &self.nodes[0]
    }

    fn root_mut(&mut self) -> &mut Node {
        &mut self.nodes[0]
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.root().schema
    }

    #[must_use]
    pub fn connection(&self) -> &Rc<dyn Connection> {
        &self.conn
    }

    /// Table alias of the root, which is the table name unless aliased.
    #[must_use]
    pub fn table_alias(&self) -> &str {
        self.root().table_alias()
    }

    /// Conditions of the root, untranslated.
    #[must_use]
    pub fn where_conditions(&self) -> &[String] {
        &self.root().conditions
    }

    /// Current page, derived from the offset when paging by offset.
    #[must_use]
    pub fn current_page(&self) -> u64 {
        self.page.unwrap_or(1)
    }

    /// Rows waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pile.len()
    }

    /// Rows reported as written by every flush so far.
    #[must_use]
    pub const fn insert_count(&self) -> u64 {
        self.insert_count
    }

    /// Last AUTO_INCREMENT value reported by the connection.
    #[must_use]
    pub fn last_insert_id(&self) -> u64 {
        self.conn.last_insert_id()
    }

    // Arena plumbing

    fn subtree(&self, idx: usize) -> Vec<usize> {
        let mut out = vec![idx];
        for edge in &self.nodes[idx].joins {
            out.extend(self.subtree(edge.node));
        }
        out
    }

    fn copy_subtree(&self, idx: usize, into: &mut Vec<Node>) -> usize {
        let at = into.len();
        into.push(self.nodes[idx].clone());
        let children: Vec<usize> = self.nodes[idx].joins.iter().map(|e| e.node).collect();
        for (i, child) in children.into_iter().enumerate() {
            let copied = self.copy_subtree(child, into);
            into[at].joins[i].node = copied;
        }
        at
    }

    /// Deep copy of the node at `idx` and its descendants as a new root.
    fn extract(&self, idx: usize) -> Self {
        let mut nodes = Vec::new();
        self.copy_subtree(idx, &mut nodes);
        let mut copy = Self {
            conn: Rc::clone(&self.conn),
            nodes,
            limit: None,
            offset: None,
            page: None,
            pile: Vec::new(),
            rejected: 0,
            max_pile_size: self.max_pile_size,
            insert_count: 0,
            values: Vec::new(),
            custom_conditions: self.custom_conditions.clone(),
        };
        if idx != 0 {
            copy.set_alias(0, None);
        }
        copy
    }

    /// Deep copy of the whole collection without pending rows.
    fn duplicate(&self) -> Self {
        let mut copy = self.extract(0);
        copy.limit = self.limit;
        copy.offset = self.offset;
        copy.page = self.page;
        copy.values.clone_from(&self.values);
        copy
    }

    /// An empty collection over the same schema and connection.
    fn fresh(&self) -> Self {
        let mut fresh = Self::new(Rc::clone(&self.root().schema), Rc::clone(&self.conn));
        fresh.custom_conditions = self.custom_conditions.clone();
        fresh
    }

    fn collect_renames(&self, idx: usize, alias: Option<&str>, renames: &mut AliasMap) {
        let node = &self.nodes[idx];
        if node.alias.as_deref() == alias {
            return;
        }
        let old = node.prefix();
        let new = alias.map_or_else(String::new, |a| format!("{a}."));

        let names = node
            .schema
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(node.attributes.iter().map(|(n, _)| n.as_str()));
        for name in names {
            renames.insert(format!("{old}{name}"), format!("{new}{name}"));
        }
        for edge in &node.joins {
            let child = format!("{new}{}", edge.name);
            self.collect_renames(edge.node, Some(&child), renames);
        }
    }

    fn assign_alias(&mut self, idx: usize, alias: Option<String>) {
        let prefix = alias.as_ref().map_or_else(String::new, |a| format!("{a}."));
        self.nodes[idx].alias = alias;
        let children: Vec<(usize, String)> = self.nodes[idx]
            .joins
            .iter()
            .map(|e| (e.node, format!("{prefix}{}", e.name)))
            .collect();
        for (child, child_alias) in children {
            self.assign_alias(child, Some(child_alias));
        }
    }

    /// Re-aliases the subtree at `idx` and rebases its attribute paths.
    fn set_alias(&mut self, idx: usize, alias: Option<String>) {
        let mut renames = AliasMap::new();
        self.collect_renames(idx, alias.as_deref(), &mut renames);
        let subtree = self.subtree(idx);
        self.assign_alias(idx, alias);
        if renames.is_empty() {
            return;
        }
        for i in subtree {
            self.nodes[i].rewrite(&renames);
        }
    }

    // Projection

    /// Sets the alias of this collection and of every joined descendant.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.set_alias(0, Some(alias.into()));
        self
    }

    /// Projects a declared attribute. Unknown attributes are ignored.
    #[must_use]
    pub fn attribute(mut self, name: &str) -> Self {
        if self.root().schema.has_attribute(name) {
            self.root_mut().add_attribute(name, Source::Column);
        } else {
            warn!(
                table = %self.root().schema.table,
                attribute = %name,
                "Ignoring unknown attribute"
            );
        }
        self
    }

    /// Projects `name` computed from a SQL expression over attribute paths.
    #[must_use]
    pub fn attribute_as(mut self, name: &str, source: impl Into<String>) -> Self {
        self.root_mut()
            .add_attribute(name, Source::Expression(source.into()));
        self
    }

    #[must_use]
    pub fn attributes(self, names: &[&str]) -> Self {
        names.iter().fold(self, |c, name| c.attribute(name))
    }

    /// Projects every declared attribute.
    #[must_use]
    pub fn all_attributes(mut self) -> Self {
        let names: Vec<String> = self
            .root()
            .schema
            .attributes
            .iter()
            .map(|a| a.name.clone())
            .collect();
        for name in names {
            self.root_mut().add_attribute(&name, Source::Column);
        }
        self
    }

    /// Joins `other` as `name` and projects it as a nested attribute.
    pub fn attribute_join(self, name: &str, other: Self) -> Result<Self> {
        let mut this = self.join(name, other)?;
        this.root_mut().add_attribute(name, Source::Join);
        Ok(this)
    }

    /// Like [`Collection::attribute_join`] with an explicit ON condition.
    pub fn attribute_join_on(
        self,
        name: &str,
        other: Self,
        condition: impl Into<String>,
    ) -> Result<Self> {
        let mut this = self.join_on(name, other, condition)?;
        this.root_mut().add_attribute(name, Source::Join);
        Ok(this)
    }

    /// Inner-join this collection when it is joined to a parent.
    #[must_use]
    pub fn not_empty(mut self) -> Self {
        self.root_mut().not_empty = true;
        self
    }

    /// Hints the attribute relating this collection to its parent.
    #[must_use]
    pub fn related_with(mut self, attribute: impl Into<String>) -> Self {
        self.root_mut().related_with = Some(attribute.into());
        self
    }

    /// Yield one record (or none) instead of a list when nested.
    #[must_use]
    pub fn has_one_element(mut self) -> Self {
        self.root_mut().has_one_element = true;
        self
    }

    /// Registers a row filter for the records of this collection.
    #[must_use]
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.root_mut().filters.push(filter);
        self
    }

    #[must_use]
    pub fn max_pile_size(mut self, size: usize) -> Self {
        self.max_pile_size = size.max(1);
        self
    }

    // Joins

    /// Joins `other` as `name`, inferring the relationship from foreign keys.
    ///
    /// In order: `name` is a foreign key here; the `related_with` hint of
    /// `other` names a foreign key here, a foreign key there or a plain
    /// attribute there; this table has exactly one foreign key to the other
    /// table; the other table has exactly one foreign key back.
    pub fn join(self, name: &str, other: Self) -> Result<Self> {
        let on = self.infer_relation(name, &other)?;
        self.graft(name, other, on)
    }

    /// Joins `other` as `name` on a raw condition over attribute paths.
    pub fn join_on(self, name: &str, other: Self, condition: impl Into<String>) -> Result<Self> {
        self.graft(name, other, JoinOn::Condition(condition.into()))
    }

    fn infer_relation(&self, name: &str, other: &Self) -> Result<JoinOn> {
        let local = &self.root().schema;
        let foreign = &other.root().schema;
        let ambiguous = |reason: String| OrmError::RelationshipAmbiguous {
            local: local.table.clone(),
            foreign: foreign.table.clone(),
            reason,
        };

        let (attribute, is_local) = if local.has_foreign_key(name) {
            (name.to_string(), true)
        } else if let Some(hint) = &other.root().related_with {
            if local.has_foreign_key(hint) {
                (hint.clone(), true)
            } else if foreign.has_foreign_key(hint) || foreign.has_attribute(hint) {
                (hint.clone(), false)
            } else {
                return Err(ambiguous(format!("related attribute '{hint}' not found")));
            }
        } else {
            let outgoing = local.foreign_keys_to(&foreign.table);
            let incoming = foreign.foreign_keys_to(&local.table);
            if let [fk] = outgoing.as_slice() {
                (fk.attribute.clone(), true)
            } else if let [fk] = incoming.as_slice() {
                (fk.attribute.clone(), false)
            } else {
                return Err(ambiguous(format!(
                    "{} outgoing and {} incoming foreign keys",
                    outgoing.len(),
                    incoming.len()
                )));
            }
        };

        let missing = || ambiguous(format!("attribute '{attribute}' not found"));
        let on = if is_local {
            let fk = local.foreign_key(&attribute).ok_or_else(missing)?;
            JoinOn::Columns {
                local: local.column(&attribute).ok_or_else(missing)?.to_string(),
                foreign: fk.column.clone(),
            }
        } else if let Some(fk) = foreign.foreign_key(&attribute) {
            JoinOn::Columns {
                local: fk.column.clone(),
                foreign: foreign.column(&attribute).ok_or_else(missing)?.to_string(),
            }
        } else {
            let key = local
                .first_key()
                .and_then(|k| local.column(k))
                .ok_or_else(|| ambiguous(format!("'{}' has no primary key", local.table)))?;
            JoinOn::Columns {
                local: key.to_string(),
                foreign: foreign.column(&attribute).ok_or_else(missing)?.to_string(),
            }
        };
        Ok(on)
    }

    fn graft(mut self, name: &str, mut other: Self, on: JoinOn) -> Result<Self> {
        if other.pending() > 0 {
            other.save()?;
        }

        let offset = self.nodes.len();
        for mut node in std::mem::take(&mut other.nodes) {
            for edge in &mut node.joins {
                edge.node += offset;
            }
            self.nodes.push(node);
        }

        let alias = match &self.root().alias {
            Some(alias) => format!("{alias}.{name}"),
            None => name.to_string(),
        };
        self.set_alias(offset, Some(alias));

        let edge = JoinEdge {
            name: name.to_string(),
            node: offset,
            on,
        };
        match self.root_mut().joins.iter_mut().find(|e| e.name == name) {
            Some(slot) => *slot = edge,
            None => self.root_mut().joins.push(edge),
        }
        Ok(self)
    }

    // Conditions

    /// Adds a raw condition over attribute paths.
    #[must_use]
    pub fn where_clause(mut self, condition: impl Into<String>) -> Self {
        self.root_mut().conditions.push(condition.into());
        self
    }

    /// Adds a condition with `:name` placeholders bound to `params`.
    #[must_use]
    pub fn where_with(self, template: &str, params: &[(&str, Param)]) -> Self {
        let condition = bind_parameters(self.conn.as_ref(), template, params);
        self.where_clause(condition)
    }

    /// Matches `name` against `value` by equality.
    pub fn match_value(self, name: &str, value: &Value) -> Result<Self> {
        self.match_with(name, value, Operator::Eq)
    }

    /// Matches `name` against `value`.
    ///
    /// `null` gives `IS NULL`, a scalar gives `name <op> value`, an array
    /// gives `IN`, `NOT IN` or `BETWEEN` over its scalars (objects in the
    /// array contribute their first key value) and an operator object such
    /// as `{"&gt": 18}` overrides `op`. An empty array adds nothing.
    pub fn match_with(mut self, name: &str, value: &Value, op: Operator) -> Result<Self> {
        if let Some(condition) = self.match_condition(0, name, value, op)? {
            self.root_mut().conditions.push(condition);
        }
        Ok(self)
    }

    /// Matches `name` against the keys selected by `sub`.
    ///
    /// `sub` contributes its `related_with` attribute, or its first key.
    pub fn match_in(self, name: &str, sub: &Self) -> Result<Self> {
        let root = sub.root();
        let attribute = root
            .related_with
            .clone()
            .or_else(|| root.schema.first_key().map(str::to_string))
            .ok_or_else(|| {
                nestql_core::Error::QueryConstruction(format!(
                    "'{}' has no primary key",
                    root.schema.table
                ))
            })?;
        let map = sub.alias_map();
        let path = format!("{}{attribute}", root.prefix());
        let source = map
            .get(&path)
            .map(str::to_string)
            .ok_or(OrmError::UnknownAttribute(path))?;

        let sql = sub
            .build_query(0, &map, true)
            .merge_joined()
            .fields(vec![(attribute, Some(source))])
            .clear_limit()
            .to_sql()?;
        Ok(self.where_clause(format!("{name} IN ({sql})")))
    }

    /// Matches every key of a JSON object.
    ///
    /// Keys naming a joined collection take a nested object that is matched
    /// against that collection. Undeclared keys are ignored.
    pub fn match_object(mut self, object: &Value) -> Result<Self> {
        self.match_object_at(0, object)?;
        Ok(self)
    }

    fn match_object_at(&mut self, idx: usize, object: &Value) -> Result<()> {
        let Value::Object(map) = object else {
            return Err(OrmError::InvalidFilterTree(object.to_string()));
        };
        for (name, value) in map {
            let node = &self.nodes[idx];
            let child = node
                .join(name)
                .filter(|_| value.is_object() && !is_operator_object(value))
                .map(|edge| edge.node);

            if let Some(child) = child {
                self.match_object_at(child, value)?;
            } else if node.schema.has_attribute(name) {
                let path = format!("{}{name}", node.prefix());
                if let Some(condition) = self.match_condition(idx, &path, value, Operator::Eq)? {
                    self.nodes[idx].conditions.push(condition);
                }
            }
        }
        Ok(())
    }

    fn match_condition(
        &self,
        idx: usize,
        lhs: &str,
        value: &Value,
        op: Operator,
    ) -> Result<Option<String>> {
        let conn = self.conn.as_ref();
        match value {
            Value::Null => Ok(Some(match op {
                Operator::Ne | Operator::Nin => format!("{lhs} IS NOT NULL"),
                _ => format!("{lhs} IS NULL"),
            })),
            Value::Array(items) => {
                let list = self.normalize_list(idx, items);
                if list.is_empty() {
                    return Ok(None);
                }
                let op = match op {
                    Operator::Between => Operator::Between,
                    Operator::Ne | Operator::Nin => Operator::Nin,
                    _ => Operator::In,
                };
                Ok(Some(op.render(lhs, &Param::Many(list), conn)?))
            }
            Value::Object(_) if is_operator_object(value) => {
                let (op, inner) = split_operator_object(value)?;
                self.match_condition(idx, lhs, inner, op)
            }
            Value::Object(_) => Err(OrmError::Sanitization(lhs.to_string())),
            scalar => {
                let value = SqlValue::from_json(scalar)
                    .ok_or_else(|| OrmError::Sanitization(lhs.to_string()))?;
                Ok(Some(op.render(lhs, &Param::One(value), conn)?))
            }
        }
    }

    fn normalize_list(&self, idx: usize, items: &[Value]) -> Vec<SqlValue> {
        let first_key = self.nodes[idx].schema.first_key();
        items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => first_key
                    .and_then(|key| map.get(key))
                    .filter(|v| !v.is_null())
                    .and_then(SqlValue::from_json),
                Value::Array(_) => None,
                scalar => SqlValue::from_json(scalar),
            })
            .collect()
    }

    /// Full-text-ish search with `LIKE` over `attributes`.
    ///
    /// Words are split on whitespace; `"quoted phrases"` stay whole. Each
    /// word must match one of the attributes; words are combined with AND
    /// when `match_all` is set, otherwise with OR.
    pub fn search(self, text: &str, attributes: &[&str], match_all: bool) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(self);
        }
        if attributes.is_empty() {
            warn!(table = %self.root().schema.table, "No searchable attributes given");
            return Ok(self);
        }

        let words = Regex::new(SEARCH_WORD_PATTERN)
            .map_err(|e| nestql_core::Error::InvalidCondition(format!("search pattern: {e}")))?;
        let template = format!(
            "({})",
            attributes
                .iter()
                .map(|a| format!("{a} LIKE :word"))
                .collect::<Vec<_>>()
                .join(" OR ")
        );

        let groups: Vec<String> = words
            .find_iter(text)
            .map(|m| {
                let word = m.as_str();
                word.strip_prefix('"')
                    .and_then(|w| w.strip_suffix('"'))
                    .unwrap_or(word)
                    .trim()
            })
            .filter(|word| !word.is_empty())
            .map(|word| {
                let pattern = format!("%{}%", word.replace('%', "\\%"));
                bind_parameters(self.conn.as_ref(), &template, &[("word", Param::from(pattern))])
            })
            .collect();

        if groups.is_empty() {
            return Ok(self);
        }
        let glue = if match_all { " AND " } else { " OR " };
        Ok(self.where_clause(groups.join(glue)))
    }

    /// Adds a Mongo-style condition such as
    /// `{"&or": [{"name": {"&like": "ros%"}}, {"id": {"&in": [1, 2]}}]}`.
    ///
    /// A dotted path whose head is a JSON attribute tests inside the
    /// stored document.
    pub fn mongo(self, condition: &Value) -> Result<Self> {
        let sql = self.mongo_condition(condition)?;
        Ok(self.where_clause(sql))
    }

    fn mongo_condition(&self, condition: &Value) -> Result<String> {
        let invalid = || OrmError::InvalidFilterTree(condition.to_string());
        let Value::Object(map) = condition else {
            return Err(invalid());
        };
        if map.len() != 1 {
            return Err(invalid());
        }
        let Some((key, test)) = map.iter().next() else {
            return Err(invalid());
        };

        if key == "&or" || key == "&and" {
            let Value::Array(items) = test else {
                return Err(invalid());
            };
            let parts = items
                .iter()
                .map(|item| Ok(format!("( {} )", self.mongo_condition(item)?)))
                .collect::<Result<Vec<_>>>()?;
            let glue = if key == "&or" { " OR " } else { " AND " };
            return Ok(parts.join(glue));
        }

        if let Some((head, path)) = key.split_once('.') {
            if self.root().schema.is_json(head) {
                let mut inner = serde_json::Map::new();
                inner.insert(path.to_string(), test.clone());
                return Ok(json_condition(head, &Value::Object(inner), self.conn.as_ref())?);
            }
        }

        let (op, value) = split_operator_object(test)?;
        let param = Param::from_json(value).ok_or_else(|| OrmError::Sanitization(key.clone()))?;
        Ok(op.render(key, &param, self.conn.as_ref())?)
    }

    /// Adds a condition over the document stored in a JSON attribute.
    pub fn where_json(self, attribute: &str, condition: &Value) -> Result<Self> {
        let sql = json_condition(attribute, condition, self.conn.as_ref())?;
        Ok(self.where_clause(sql))
    }

    /// Registers a condition type usable in [`Collection::where_tree`].
    #[must_use]
    pub fn define_condition(
        mut self,
        name: impl Into<String>,
        condition: impl Fn(Self, &Value) -> Result<Self> + 'static,
    ) -> Self {
        self.custom_conditions.insert(name.into(), Rc::new(condition));
        self
    }

    /// Applies a condition tree.
    ///
    /// Nodes are `{"type": "or"|"and"|"not"|"attributes"|<custom>, "model": ...}`.
    /// `or`/`and` take a list of trees, `not` takes one tree, `attributes`
    /// takes an object for [`Collection::match_object`]. A tree that yields
    /// no condition matches nothing.
    pub fn where_tree(self, tree: &Value) -> Result<Self> {
        let kind = tree
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| OrmError::InvalidFilterTree(tree.to_string()))?;
        let model = tree.get("model").unwrap_or(&Value::Null);
        let branches = model.as_array().map_or(&[][..], Vec::as_slice);

        let mut this = self;
        let mut applied = false;
        match kind {
            "or" => {
                let mut any = this.fresh();
                for branch in branches {
                    applied = true;
                    let sub = this.fresh().where_tree(branch)?;
                    any = any.union(sub);
                }
                if applied {
                    this = this.intersect(any);
                }
            }
            "and" => {
                for branch in branches {
                    applied = true;
                    let sub = this.fresh().where_tree(branch)?;
                    this = this.intersect(sub);
                }
            }
            "not" => {
                applied = true;
                let sub = this.fresh().where_tree(model)?;
                this = this.exclude(sub);
            }
            "attributes" => {
                if model.as_object().is_some_and(|m| !m.is_empty()) {
                    applied = true;
                    this = this.match_object(model)?;
                }
            }
            custom => {
                if let Some(condition) = this.custom_conditions.get(custom).cloned() {
                    applied = true;
                    this = condition(this, model)?;
                }
            }
        }

        if !applied {
            this = this.where_clause("0");
        }
        Ok(this)
    }

    /// Pulls every joined collection's conditions up into the root.
    fn consolidate(&mut self) -> Vec<String> {
        let mut all = Vec::new();
        for idx in self.subtree(0) {
            all.append(&mut self.nodes[idx].conditions);
        }
        all
    }

    /// Keeps rows matching this collection or `other`.
    #[must_use]
    pub fn union(mut self, mut other: Self) -> Self {
        let mine = self.consolidate();
        let theirs = other.consolidate();
        let groups: Vec<String> = [mine, theirs]
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| format!("({})", c.join(" AND ")))
            .collect();
        if !groups.is_empty() {
            self.root_mut().conditions = vec![format!("({})", groups.join(" OR "))];
        }
        self
    }

    /// Keeps rows matching both this collection and `other`.
    #[must_use]
    pub fn intersect(mut self, mut other: Self) -> Self {
        let mine = self.consolidate();
        let theirs = other.consolidate();
        self.root_mut().conditions = [mine, theirs]
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| format!("({})", c.join(" AND ")))
            .collect();
        self
    }

    /// Keeps rows matching this collection but not `other`.
    #[must_use]
    pub fn exclude(mut self, mut other: Self) -> Self {
        let mine = self.consolidate();
        let theirs = other.consolidate();
        let mut conditions = Vec::new();
        if !mine.is_empty() {
            conditions.push(format!("({})", mine.join(" AND ")));
        }
        if !theirs.is_empty() {
            conditions.push(format!("NOT ({})", theirs.join(" AND ")));
        }
        self.root_mut().conditions = conditions;
        self
    }

    // Ordering, grouping and paging

    /// Orders by an attribute path such as `name` or `pets.name`.
    ///
    /// A path into a JSON attribute (`tags.color`) orders by the extracted
    /// value. Paths that do not resolve are ignored with a warning.
    #[must_use]
    pub fn order_by(self, attribute: &str, direction: OrderDirection) -> Self {
        let dir = direction.sql();
        if let Some((head, path)) = attribute.split_once('.') {
            if self.root().schema.is_json(head) {
                return self.order(format!("JSON_EXTRACT({head}, '$.{path}') {dir}"), false);
            }
        }

        let mut parts: Vec<&str> = attribute.split('.').collect();
        let name = parts.pop().unwrap_or_default();
        let mut idx = 0;
        for part in parts {
            match self.nodes[idx].join(part) {
                Some(edge) => idx = edge.node,
                None => {
                    warn!(attribute = %attribute, "Order attribute not found");
                    return self;
                }
            }
        }
        if !self.nodes[idx].schema.has_attribute(name) {
            warn!(attribute = %attribute, "Order attribute not found");
            return self;
        }
        self.order(format!("{attribute} {dir}"), false)
    }

    /// Adds a raw ordering. With `priority` it goes before existing ones.
    #[must_use]
    pub fn order(mut self, order: impl Into<String>, priority: bool) -> Self {
        let order = order.into();
        let list = &mut self.root_mut().order;
        if priority {
            list.insert(0, order);
        } else {
            list.push(order);
        }
        self
    }

    #[must_use]
    pub fn clear_order(mut self) -> Self {
        self.root_mut().order.clear();
        self
    }

    #[must_use]
    pub fn group_by(mut self, group: impl Into<String>) -> Self {
        self.root_mut().group.push(group.into());
        self
    }

    #[must_use]
    pub fn having(mut self, condition: impl Into<String>) -> Self {
        self.root_mut().having.push(condition.into());
        self
    }

    /// Limits the result to at least one row.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    #[must_use]
    pub fn clear_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Skips `offset` rows and derives the page from the limit.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self.page = Some(self.limit.map_or(1, |limit| 1 + offset / limit));
        self
    }

    /// Moves to a 1-based page and derives the offset from the limit.
    #[must_use]
    pub fn page(mut self, page: u64) -> Self {
        let page = page.max(1);
        self.page = Some(page);
        self.offset = Some(self.limit.map_or(0, |limit| limit * (page - 1)));
        self
    }

    /// Limits the number of distinct root keys rather than rows.
    ///
    /// Joined one-to-many rows make a plain LIMIT cut records in half. This
    /// restricts the root keys through a subquery that keeps only the joins
    /// used by conditions, groupings or orderings.
    pub fn limit_distinct(self, limit: u64, offset: Option<u64>) -> Result<Self> {
        let key = self
            .root()
            .schema
            .first_key()
            .map(str::to_string)
            .ok_or_else(|| {
                nestql_core::Error::QueryConstruction(format!(
                    "'{}' has no primary key",
                    self.root().schema.table
                ))
            })?;

        let mut keys = self.duplicate();
        keys.remove_nonessential_joins();
        for idx in keys.subtree(0) {
            keys.nodes[idx].attributes.clear();
        }
        let key_path = format!("{}{key}", keys.root().prefix());
        keys.root_mut()
            .attributes
            .push((key.clone(), Source::Expression(format!("DISTINCT({key_path})"))));

        let map = keys.alias_map();
        let mut query = keys.build_query(0, &map, false);
        query = match offset {
            Some(offset) => query.limit_offset(offset, limit.max(1)),
            None => query.limit(limit.max(1)),
        };
        let sql = query.to_sql()?;
        Ok(self.where_clause(format!("{key_path} IN (SELECT * FROM ({sql}) AS t)")))
    }

    fn remove_nonessential_joins(&mut self) {
        let root = self.root();
        let uses = root
            .conditions
            .iter()
            .chain(&root.group)
            .chain(&root.having)
            .chain(&root.order)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let nodes = &self.nodes;
        let kept: Vec<JoinEdge> = root
            .joins
            .iter()
            .filter(|edge| {
                let child = &nodes[edge.node];
                child.not_empty || uses.contains(&child.prefix())
            })
            .cloned()
            .collect();
        self.root_mut().joins = kept;
    }

    // Compilation

    /// Attribute path to SQL source for the whole join tree.
    #[must_use]
    pub fn alias_map(&self) -> AliasMap {
        self.alias_map_at(0)
    }

    fn alias_map_at(&self, idx: usize) -> AliasMap {
        let node = &self.nodes[idx];
        let table_alias = node.table_alias();
        let prefix = node.prefix();

        let mut map = AliasMap::new();
        for attr in &node.schema.attributes {
            map.insert(
                format!("{prefix}{}", attr.name),
                format!("`{table_alias}`.`{}`", attr.column),
            );
        }
        for edge in &node.joins {
            map.extend(self.alias_map_at(edge.node));
        }
        for (name, source) in &node.attributes {
            if let Source::Expression(expr) = source {
                if !node.schema.has_attribute(name) {
                    let translated = map.translate(expr);
                    map.insert(format!("{prefix}{name}"), format!("({translated})"));
                }
            }
        }
        map
    }

    fn build_query(&self, idx: usize, map: &AliasMap, force_keys: bool) -> Query {
        let node = &self.nodes[idx];
        let table_alias = node.table_alias();
        let prefix = node.prefix();
        let mut query = Query::new(node.schema.table.clone(), table_alias);

        if force_keys {
            for key in node.schema.keys() {
                query = query.field(format!("{prefix}{key}"), node.qualified(key));
            }
        }

        for (name, source) in &node.attributes {
            let sql = match source {
                Source::Join => continue,
                Source::Column => match node.qualified(name) {
                    Some(sql) => sql,
                    None => continue,
                },
                Source::Expression(expr) => map.translate(expr),
            };
            query = query.field(format!("{prefix}{name}"), Some(sql));
        }

        for edge in &node.joins {
            let child = &self.nodes[edge.node];
            let kind = if child.not_empty {
                JoinType::Inner
            } else {
                JoinType::Left
            };
            let mut on = vec![match &edge.on {
                JoinOn::Columns { local, foreign } => format!(
                    "`{table_alias}`.`{local}` = `{}`.`{foreign}`",
                    child.table_alias()
                ),
                JoinOn::Condition(condition) => map.translate(condition),
            }];
            on.extend(child.conditions.iter().map(|c| map.translate(c)));
            query = query.join(kind, self.build_query(edge.node, map, force_keys), on);
        }

        if idx == 0 {
            for condition in &node.conditions {
                query = query.where_clause(map.translate(condition));
            }
        }
        for order in &node.order {
            query = query.order_by(map.translate(order));
        }
        for group in &node.group {
            query = query.group_by(map.translate(group));
        }
        for condition in &node.having {
            query = query.having(map.translate(condition));
        }
        query
    }

    /// Compiles the collection into a query with translated paths.
    #[must_use]
    pub fn get_query(&self) -> Query {
        let query = self.build_query(0, &self.alias_map(), true);
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => query.limit_offset(offset, limit),
            (Some(limit), None) => query.limit(limit),
            (None, _) => query,
        }
    }

    fn build_iterator(&self, idx: usize) -> ResultIterator {
        let node = &self.nodes[idx];
        let prefix = node.prefix();
        let mut iterator =
            ResultIterator::new(node.schema.keys().iter().map(|k| format!("{prefix}{k}")))
                .single(node.has_one_element);

        for (name, source) in &node.attributes {
            iterator = match (source, node.join(name)) {
                (Source::Join, Some(edge)) => {
                    iterator.nested(name.clone(), self.build_iterator(edge.node))
                }
                (Source::Join, None) => iterator,
                _ => iterator.attribute(name.clone(), format!("{prefix}{name}")),
            };
            if node.schema.is_json(name) {
                iterator = iterator.filter(RowFilter::JsonDecode(name.clone()));
            }
        }
        for filter in &node.filters {
            iterator = iterator.filter(filter.clone());
        }
        iterator
    }

    // Execution

    /// Runs the query and returns an iterator over nested records.
    pub fn find(&self) -> Result<ResultIterator> {
        let sql = self.get_query().to_sql()?;
        let cursor = self.conn.query(&sql)?;
        let mut iterator = self.build_iterator(0);
        iterator.bind(cursor);
        Ok(iterator)
    }

    /// Fetches the record whose primary key values are `key`, in key order.
    pub fn fetch(&self, key: &[Value]) -> Result<Record> {
        let mut scoped = self.duplicate();
        let prefix = scoped.root().prefix();
        let names: Vec<String> = scoped.root().schema.keys().to_vec();
        for (name, value) in names.iter().zip(key) {
            let path = format!("{prefix}{name}");
            if let Some(condition) = scoped.match_condition(0, &path, value, Operator::Eq)? {
                scoped.root_mut().conditions.push(condition);
            }
        }
        scoped
            .find()?
            .first()
            .ok_or_else(|| OrmError::EntityNotFound {
                table: self.root().schema.table.clone(),
                key: Value::Array(key.to_vec()).to_string(),
            })
    }

    /// First record, if any.
    pub fn first(&self) -> Result<Option<Record>> {
        let mut scoped = self.duplicate();
        scoped.limit = Some(1);
        Ok(scoped.find()?.first())
    }

    /// Number of rows the query yields without its limit.
    pub fn count(&self) -> Result<u64> {
        let sql = self.get_query().clear_limit().to_sql()?;
        let count_sql = format!("SELECT COUNT(*) AS `count` FROM ({sql}) AS countTable");
        let mut cursor = self.conn.query(&count_sql)?;
        let count = cursor
            .fetch_row()
            .and_then(|row| row.get("count").and_then(SqlValue::as_i64))
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    // Unit of work

    /// Buffers an object for the next batched write.
    ///
    /// Objects that cannot be written (a value with no SQL form, a missing
    /// value for a column with neither default nor NULL) are dropped with a
    /// warning. The pile is flushed when it reaches its maximum size.
    pub fn add(&mut self, object: &Value) -> Result<&mut Self> {
        match self.to_row(object) {
            Ok(row) => self.pile.push(row),
            Err(OrmError::Sanitization(attribute)) => {
                warn!(
                    table = %self.root().schema.table,
                    attribute = %attribute,
                    "Dropping row that failed sanitization"
                );
                self.rejected += 1;
            }
            Err(e) => return Err(e),
        }
        if self.pile.len() >= self.max_pile_size {
            self.flush()?;
        }
        Ok(self)
    }

    /// Writes every buffered row. Returns the rows written so far.
    pub fn save(&mut self) -> Result<u64> {
        self.flush()
    }

    /// Writes `entity` and fills in generated values.
    ///
    /// Generated keys, defaults resolved by sanitization, decoded JSON and
    /// AUTO_INCREMENT values are written back onto the object.
    pub fn save_entity(&mut self, entity: &mut Value) -> Result<u64> {
        let row = self.to_row(entity)?;
        self.pile.push(row.clone());
        let count = self.flush()?;

        let schema = Rc::clone(&self.root().schema);
        let Value::Object(map) = entity else {
            return Ok(count);
        };
        for attr in &schema.attributes {
            let cell = row.iter().find(|(c, _)| *c == attr.column).map(|(_, v)| v);
            let value = match cell {
                Some(InsertValue::Literal(value)) if attr.json => value
                    .as_str()
                    .map_or(Value::Null, |s| serde_json::from_str(s).unwrap_or(Value::Null)),
                Some(InsertValue::Literal(value)) => value.to_json(),
                _ if attr.auto_increment => Value::from(self.conn.last_insert_id()),
                Some(InsertValue::Null) => Value::Null,
                _ => continue,
            };
            map.insert(attr.name.clone(), value);
        }
        Ok(count)
    }

    /// Writes a typed object and reads it back with generated values.
    pub fn save_object<T: Serialize + DeserializeOwned>(&mut self, object: &mut T) -> Result<u64> {
        let mut entity = serde_json::to_value(&*object)?;
        let count = self.save_entity(&mut entity)?;
        *object = serde_json::from_value(entity)?;
        Ok(count)
    }

    /// Drops every buffered row.
    pub fn clear(&mut self) {
        self.pile.clear();
        self.rejected = 0;
    }

    fn flush(&mut self) -> Result<u64> {
        let Some(root) = self.nodes.first() else {
            return Ok(self.insert_count);
        };
        let table = root.schema.table.clone();
        if self.pile.is_empty() {
            if self.rejected > 0 {
                self.rejected = 0;
                return Err(OrmError::NothingToInsert(table));
            }
            return Ok(self.insert_count);
        }

        let pile = std::mem::take(&mut self.pile);
        self.rejected = 0;
        let conn = self.conn.as_ref();
        let auto_increment = root.schema.auto_increment_columns();

        let columns: Vec<&str> = pile[0].iter().map(|(c, _)| c.as_str()).collect();
        let rows: Vec<String> = pile
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(|(_, v)| v.render(conn)).collect();
                format!("({})", cells.join(", "))
            })
            .collect();
        let updates: Vec<String> = columns
            .iter()
            .map(|c| {
                if auto_increment.contains(c) {
                    format!("`{c}` = LAST_INSERT_ID(`{c}`)")
                } else {
                    format!("`{c}` = VALUES(`{c}`)")
                }
            })
            .collect();

        let sql = format!(
            "INSERT INTO `{table}` ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
            columns
                .iter()
                .map(|c| format!("`{c}`"))
                .collect::<Vec<_>>()
                .join(", "),
            rows.join(", "),
            updates.join(", ")
        );
        self.conn.query(&sql)?;
        self.insert_count += self.conn.affected_rows();
        Ok(self.insert_count)
    }

    /// Attributes written by `add`: the projected declared attributes, or
    /// every declared attribute when none is projected.
    fn writable_attributes(&self) -> Vec<String> {
        let root = self.root();
        let projected: Vec<String> = root
            .attributes
            .iter()
            .filter(|(name, source)| {
                !matches!(source, Source::Expression(_)) && root.schema.has_attribute(name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        if projected.is_empty() {
            root.schema.attributes.iter().map(|a| a.name.clone()).collect()
        } else {
            projected
        }
    }

    fn to_row(&self, object: &Value) -> Result<Vec<(String, InsertValue)>> {
        let schema = &self.root().schema;
        let Value::Object(map) = object else {
            return Err(OrmError::Sanitization(schema.table.clone()));
        };

        let mut names: Vec<String> = schema.keys().to_vec();
        names.extend(
            self.writable_attributes()
                .into_iter()
                .filter(|name| !schema.is_key(name)),
        );

        let mut row = Vec::with_capacity(names.len());
        for name in names {
            let attr = schema
                .attribute(&name)
                .ok_or_else(|| OrmError::UnknownAttribute(name.clone()))?;
            let mut value = map.get(&name).cloned().unwrap_or(Value::Null);
            if value.is_null() && attr.uuid && schema.is_key(&name) {
                value = Value::String(unique_id::unique_id());
            }
            let cell = self.sanitize(&name, &value)?;
            if cell == InsertValue::UseColumnDefault && attr.is_required() {
                return Err(OrmError::Sanitization(name));
            }
            row.push((attr.column.clone(), cell));
        }
        Ok(row)
    }

    fn sanitize(&self, name: &str, value: &Value) -> Result<InsertValue> {
        let root = self.root();
        let attr = root
            .schema
            .attribute(name)
            .ok_or_else(|| OrmError::UnknownAttribute(name.to_string()))?;

        let fallback = self
            .values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .filter(|v| !v.is_null() && !v.is_object() && !v.is_array());
        let value = match fallback {
            Some(fallback) if value.is_null() => fallback,
            _ => value,
        };

        if value.is_null() {
            return Ok(if attr.nullable || attr.auto_increment {
                InsertValue::Null
            } else {
                InsertValue::UseColumnDefault
            });
        }
        if attr.json {
            return Ok(InsertValue::Literal(SqlValue::Text(serde_json::to_string(value)?)));
        }
        if let Some(scalar) = SqlValue::from_json(value) {
            return Ok(InsertValue::Literal(scalar));
        }
        if value.is_object() {
            if let Some(edge) = root.join(name) {
                return self.nested_key(name, edge.node, value);
            }
        }
        Err(OrmError::Sanitization(name.to_string()))
    }

    /// Key of a nested object, saving it through the joined collection
    /// first when it has none.
    fn nested_key(&self, name: &str, child: usize, value: &Value) -> Result<InsertValue> {
        let schema = Rc::clone(&self.nodes[child].schema);
        let key_of = |object: &Value| {
            schema.keys().iter().find_map(|k| {
                object
                    .get(k)
                    .filter(|v| !v.is_null())
                    .and_then(SqlValue::from_json)
            })
        };
        if let Some(key) = key_of(value) {
            return Ok(InsertValue::Literal(key));
        }

        let mut entity = value.clone();
        let mut sub = self.extract(child);
        sub.save_entity(&mut entity)?;
        key_of(&entity)
            .map(InsertValue::Literal)
            .ok_or_else(|| OrmError::Sanitization(name.to_string()))
    }

    // Statement-style writes

    /// Sets a value for [`Collection::update`]. Also used for added rows
    /// that carry no value for the attribute.
    #[must_use]
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == attribute) {
            Some(slot) => slot.1 = value,
            None => self.values.push((attribute, value)),
        }
        self
    }

    fn join_clauses(&self, idx: usize, map: &AliasMap) -> String {
        let node = &self.nodes[idx];
        let mut sql = String::new();
        for edge in &node.joins {
            let child = &self.nodes[edge.node];
            let kind = if child.not_empty {
                JoinType::Inner
            } else {
                JoinType::Left
            };
            let mut on = vec![match &edge.on {
                JoinOn::Columns { local, foreign } => format!(
                    "`{}`.`{local}` = `{}`.`{foreign}`",
                    node.table_alias(),
                    child.table_alias()
                ),
                JoinOn::Condition(condition) => map.translate(condition),
            }];
            on.extend(child.conditions.iter().map(|c| map.translate(c)));
            sql.push_str(&format!(
                " {kind} JOIN {} `{}` ON {}",
                child.schema.table,
                child.table_alias(),
                on.join(" AND ")
            ));
            sql.push_str(&self.join_clauses(edge.node, map));
        }
        sql
    }

    /// Applies the values from [`Collection::set`] to every matching row.
    ///
    /// Without values or without a condition nothing is run and 0 is
    /// returned. Use `where_clause("1")` to update the whole table.
    pub fn update(&self) -> Result<u64> {
        let root = self.root();
        if self.values.is_empty() {
            warn!(table = %root.schema.table, "No values to update");
            return Ok(0);
        }
        if root.conditions.is_empty() {
            warn!(
                table = %root.schema.table,
                "Update ignored because no conditions are defined; use where_clause(\"1\") to update every row"
            );
            return Ok(0);
        }

        let map = self.alias_map();
        let conn = self.conn.as_ref();
        let prefix = root.prefix();
        let mut assignments = Vec::new();
        for (name, value) in &self.values {
            let Some(target) = map.get(&format!("{prefix}{name}")) else {
                warn!(attribute = %name, "Skipping update of unknown attribute");
                continue;
            };
            let rendered = if value.is_object() || value.is_array() {
                if root.schema.is_json(name) {
                    Some(SqlValue::Text(serde_json::to_string(value)?).render(conn))
                } else {
                    None
                }
            } else {
                SqlValue::from_json(value).map(|v| v.render(conn))
            };
            match rendered {
                Some(rendered) => assignments.push(format!("{target} = {rendered}")),
                None => warn!(attribute = %name, "Skipping value that cannot be sanitized"),
            }
        }
        if assignments.is_empty() {
            return Ok(0);
        }

        let conditions: Vec<String> = root.conditions.iter().map(|c| map.translate(c)).collect();
        let sql = format!(
            "UPDATE {} `{}`{} SET {} WHERE ({})",
            root.schema.table,
            root.table_alias(),
            self.join_clauses(0, &map),
            assignments.join(", "),
            conditions.join(") AND (")
        );
        self.conn.query(&sql)?;
        Ok(self.conn.affected_rows())
    }

    /// Deletes every matching row of the root table.
    ///
    /// Without a condition nothing is run and 0 is returned. Use
    /// `where_clause("1")` to empty the table.
    pub fn delete(&self) -> Result<u64> {
        let root = self.root();
        if root.conditions.is_empty() {
            warn!(
                table = %root.schema.table,
                "Delete ignored because no conditions are defined; use where_clause(\"1\") to delete every row"
            );
            return Ok(0);
        }

        let map = self.alias_map();
        let conditions = root
            .conditions
            .iter()
            .map(|c| map.translate(c))
            .collect::<Vec<_>>()
            .join(") AND (");
        let table_alias = root.table_alias();

        let sql = if root.joins.is_empty() {
            // single-table DELETE cannot alias its table
            format!(
                "DELETE FROM `{}` WHERE ({})",
                root.schema.table,
                conditions.replace(&format!("`{table_alias}`."), "")
            )
        } else {
            format!(
                "DELETE `{table_alias}` FROM {} `{table_alias}`{} WHERE ({conditions})",
                root.schema.table,
                self.join_clauses(0, &map)
            )
        };
        self.conn.query(&sql)?;
        Ok(self.conn.affected_rows())
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        if self.pile.is_empty() {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(error = %e, "Pending rows could not be written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestql_core::{Attribute, ForeignKey, MemoryConnection};
    use serde_json::json;

    fn people() -> Schema {
        Schema::builder("people")
            .attribute("id", Attribute::new("int").auto_increment())
            .attribute("name", Attribute::new("varchar").length(64))
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    fn pets() -> Schema {
        Schema::builder("pets")
            .attribute("id", Attribute::new("int").auto_increment())
            .attribute("name", Attribute::new("varchar").length(64))
            .attribute("owner", Attribute::new("int"))
            .primary_key(&["id"])
            .foreign_key("owner", ForeignKey::references("people", "id"))
            .build()
            .unwrap()
    }

    fn conn() -> Rc<dyn Connection> {
        Rc::new(MemoryConnection::new())
    }

    #[test]
    fn test_alias_rebases_paths() {
        let c = Collection::new(people(), conn())
            .attribute("name")
            .where_clause("name = 'x'")
            .alias("p");
        assert_eq!(c.table_alias(), "p");
        assert_eq!(c.where_conditions(), ["p.name = 'x'"]);
        assert_eq!(
            c.get_query().to_sql().unwrap(),
            "SELECT `p`.`id` AS `p.id`, `p`.`name` AS `p.name` FROM people `p` WHERE (`p`.`name` = 'x')"
        );
    }

    #[test]
    fn test_rejoin_replaces_edge() {
        let conn = conn();
        let c = Collection::new(people(), Rc::clone(&conn))
            .join("pets", Collection::new(pets(), Rc::clone(&conn)))
            .unwrap()
            .join(
                "pets",
                Collection::new(pets(), Rc::clone(&conn)).where_clause("name = 'Rufus'"),
            )
            .unwrap();
        assert_eq!(c.root().joins.len(), 1);
        let sql = c.get_query().to_sql().unwrap();
        assert_eq!(sql.matches("JOIN").count(), 1);
        assert!(sql.contains("AND `pets`.`name` = 'Rufus'"));
    }

    #[test]
    fn test_extract_restores_root_paths() {
        let conn = conn();
        let c = Collection::new(people(), Rc::clone(&conn))
            .attribute_join(
                "pets",
                Collection::new(pets(), Rc::clone(&conn))
                    .attribute("name")
                    .where_clause("name LIKE 'R%'"),
            )
            .unwrap();
        let child = c.root().joins[0].node;
        assert_eq!(c.nodes[child].conditions, ["pets.name LIKE 'R%'"]);

        let sub = c.extract(child);
        assert_eq!(sub.table_alias(), "pets");
        assert!(sub.root().alias.is_none());
        assert_eq!(sub.where_conditions(), ["name LIKE 'R%'"]);
    }

    #[test]
    fn test_fresh_keeps_custom_conditions() {
        let c = Collection::new(people(), conn())
            .define_condition("named", |c, model| c.match_value("name", model))
            .limit(3);
        let fresh = c.fresh();
        assert!(fresh.custom_conditions.contains_key("named"));
        assert_eq!(fresh.limit, None);

        let matched = fresh
            .where_tree(&json!({"type": "named", "model": "Ana"}))
            .unwrap();
        assert_eq!(matched.where_conditions(), ["name = 'Ana'"]);
    }
}
