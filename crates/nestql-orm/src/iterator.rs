//! Folding joined rowsets into nested records.
//!
//! A joined SELECT returns one row per combination of parent and child
//! rows:
//!
//! ```text
//! id  name      pets.id  pets.name
//! 1   Santiago  1        Rufus
//! 1   Santiago  2        Buddy
//! 2   Peter     4        Hugo
//! ```
//!
//! A [`ResultIterator`] keyed on `id` yields one record per distinct key
//! and skips the repeated parent rows. Each joined attribute is served by a
//! nested iterator keyed on `pets.id` that starts at the parent's row and
//! stops at the first row whose parent key no longer matches. Nested
//! iterators share the parent's cursor and seek it before every read.
//!
//! Rows of one key group must be contiguous in the cursor.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use nestql_core::{Cursor, Row, SqlValue};
use serde_json::Value;
use tracing::warn;

use crate::record::{Field, Record};

/// A cursor shared between an iterator and its nested iterators.
pub type SharedCursor = Rc<RefCell<Box<dyn Cursor>>>;

/// A transformation applied to every record an iterator yields.
#[derive(Clone)]
pub enum RowFilter {
    /// Decodes a JSON-encoded text field in place.
    JsonDecode(String),
    /// Arbitrary transformation.
    Custom(Rc<dyn Fn(&mut Record)>),
}

impl RowFilter {
    /// Wraps a closure.
    pub fn custom(f: impl Fn(&mut Record) + 'static) -> Self {
        Self::Custom(Rc::new(f))
    }

    fn apply(&self, record: &mut Record) {
        match self {
            Self::JsonDecode(name) => {
                let Some(Value::String(encoded)) = record.value(name) else {
                    return;
                };
                let decoded = serde_json::from_str(encoded).unwrap_or_else(|e| {
                    warn!(attribute = %name, error = %e, "Stored JSON could not be decoded");
                    Value::Null
                });
                record.set_value(name.clone(), decoded);
            }
            Self::Custom(f) => f(record),
        }
    }
}

impl fmt::Debug for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsonDecode(name) => f.debug_tuple("JsonDecode").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Column(String),
    Nested(Box<ResultIterator>),
}

/// Forward-only iterator over a rowset, yielding one [`Record`] per key
/// group.
///
/// Besides [`std::iter::Iterator`], the explicit protocol
/// ([`rewind`](Self::rewind), [`valid`](Self::valid),
/// [`current`](Self::current), [`advance`](Self::advance)) is available for
/// callers that need to peek without consuming.
#[derive(Clone)]
pub struct ResultIterator {
    cursor: Option<SharedCursor>,
    key: Vec<String>,
    attributes: Vec<(String, Source)>,
    single: bool,
    filters: Vec<RowFilter>,

    assertions: Vec<(String, SqlValue)>,
    pointer_start: usize,
    pointer: usize,
    current_row: Option<Row>,
    last_seen: Vec<SqlValue>,
    seen: HashSet<String>,
    started: bool,
}

impl fmt::Debug for ResultIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultIterator")
            .field("key", &self.key)
            .field("attributes", &self.attributes)
            .field("single", &self.single)
            .field("filters", &self.filters)
            .field("assertions", &self.assertions)
            .field("pointer_start", &self.pointer_start)
            .field("pointer", &self.pointer)
            .field("bound", &self.cursor.is_some())
            .finish_non_exhaustive()
    }
}

impl ResultIterator {
    /// Creates an iterator grouping rows by the given key columns.
    #[must_use]
    pub fn new<S: Into<String>>(key: impl IntoIterator<Item = S>) -> Self {
        Self {
            cursor: None,
            key: key.into_iter().map(Into::into).collect(),
            attributes: Vec::new(),
            single: false,
            filters: Vec::new(),
            assertions: Vec::new(),
            pointer_start: 0,
            pointer: 0,
            current_row: None,
            last_seen: Vec::new(),
            seen: HashSet::new(),
            started: false,
        }
    }

    /// Yield only the first record when used as a nested iterator.
    #[must_use]
    pub const fn single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    /// Copies column `source` into attribute `name`.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.attributes.push((name.into(), Source::Column(source.into())));
        self
    }

    /// Serves attribute `name` from a nested iterator.
    #[must_use]
    pub fn nested(mut self, name: impl Into<String>, iterator: Self) -> Self {
        self.attributes.push((name.into(), Source::Nested(Box::new(iterator))));
        self
    }

    /// Registers a row filter. Filters run in registration order.
    #[must_use]
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Binds a result cursor.
    pub fn bind(&mut self, cursor: Box<dyn Cursor>) {
        self.bind_shared(&Rc::new(RefCell::new(cursor)));
    }

    fn bind_shared(&mut self, cursor: &SharedCursor) {
        self.cursor = Some(Rc::clone(cursor));
        for (_, source) in &mut self.attributes {
            if let Source::Nested(nested) = source {
                nested.bind_shared(cursor);
            }
        }
        self.started = false;
    }

    /// Total rows in the underlying result set.
    #[must_use]
    pub fn num_rows(&self) -> Option<usize> {
        self.cursor.as_ref().map(|c| c.borrow().row_count())
    }

    fn read_at(&self, position: usize) -> Option<Row> {
        let mut cursor = self.cursor.as_ref()?.borrow_mut();
        cursor.seek(position);
        cursor.fetch_row()
    }

    fn key_values(&self, row: &Row) -> Vec<SqlValue> {
        self.key
            .iter()
            .map(|k| row.get(k).cloned().unwrap_or(SqlValue::Null))
            .collect()
    }

    fn assertions_hold(&self, row: &Row) -> bool {
        self.assertions
            .iter()
            .all(|(column, expected)| row.get(column) == Some(expected))
    }

    fn remember(&mut self) {
        match &self.current_row {
            Some(row) => {
                self.last_seen = self.key_values(row);
                self.seen.insert(format!("{:?}", self.last_seen));
            }
            None => self.last_seen.clear(),
        }
    }

    /// Moves to the first row of this iterator's range.
    pub fn rewind(&mut self) {
        self.started = true;
        self.seen.clear();
        self.pointer = self.pointer_start;
        self.current_row = self.read_at(self.pointer);
        self.remember();
    }

    /// Whether the current row starts a record.
    ///
    /// False past the end, on a row whose key is null (an empty LEFT JOIN
    /// branch) and on a row belonging to another parent.
    #[must_use]
    pub fn valid(&self) -> bool {
        let Some(row) = &self.current_row else {
            return false;
        };
        if self
            .key
            .iter()
            .any(|k| row.get(k).map_or(true, SqlValue::is_null))
        {
            return false;
        }
        self.assertions_hold(row)
    }

    /// Materializes the record at the current row.
    #[must_use]
    pub fn current(&self) -> Option<Record> {
        let row = self.current_row.as_ref()?;
        let mut record = Record::new();

        let assertions: Vec<(String, SqlValue)> = self
            .key
            .iter()
            .zip(self.key_values(row))
            .map(|(k, v)| (k.clone(), v))
            .collect();

        for (name, source) in &self.attributes {
            let field = match source {
                Source::Column(column) => {
                    Field::Value(row.get(column).map_or(Value::Null, SqlValue::to_json))
                }
                Source::Nested(template) => {
                    let mut nested = (**template).clone();
                    nested.assertions.clone_from(&assertions);
                    nested.pointer_start = self.pointer;
                    nested.started = false;
                    if nested.single {
                        Field::One(nested.first().map(Box::new))
                    } else {
                        Field::Iter(nested)
                    }
                }
            };
            record.set(name.clone(), field);
        }

        for filter in &self.filters {
            filter.apply(&mut record);
        }

        Some(record)
    }

    /// Moves past every row of the current key group.
    ///
    /// Rows whose key was already yielded in this pass are skipped too, so
    /// a child repeated by a sibling join is yielded once.
    pub fn advance(&mut self) {
        loop {
            let Some(row) = &self.current_row else {
                break;
            };
            let signature = format!("{:?}", self.key_values(row));
            if !self.assertions_hold(row) || !self.seen.contains(&signature) {
                break;
            }
            self.pointer += 1;
            self.current_row = self.read_at(self.pointer);
        }
        self.remember();
    }

    /// Record at the start of the range, if any.
    pub fn first(&mut self) -> Option<Record> {
        self.rewind();
        if self.valid() {
            self.current()
        } else {
            None
        }
    }

    /// Reads every record, resolving nested iterators into lists.
    pub fn fetch_all(&mut self) -> Vec<Record> {
        let mut records = Vec::new();
        self.rewind();
        while self.valid() {
            if let Some(record) = self.current() {
                records.push(record.resolve());
            }
            self.advance();
        }
        records
    }

    /// Reads every record into a JSON array.
    pub fn to_serializable(&mut self) -> Value {
        Value::Array(self.fetch_all().into_iter().map(Record::into_json).collect())
    }
}

impl Iterator for ResultIterator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.started {
            self.advance();
        } else {
            self.rewind();
        }
        if self.valid() {
            self.current()
        } else {
            None
        }
    }
}
