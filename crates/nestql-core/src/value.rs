//! SQL values, bound parameters and insert cells.
//!
//! Values are rendered inline through the connection's escaping routine.
//! Text is always quoted; column references and expressions such as
//! `NOW()` go through [`SqlValue::Raw`].

use serde_json::Value;

use crate::connection::Connection;

/// A scalar SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value, rendered as 1/0.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// SQL expression rendered verbatim. Never built from caller data.
    Raw(String),
}

impl SqlValue {
    /// Renders the value as an inline SQL literal.
    #[must_use]
    pub fn render(&self, conn: &dyn Connection) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => String::from(if *b { "1" } else { "0" }),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => format!("'{}'", conn.escape_string(s)),
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
            Self::Raw(expr) => expr.clone(),
        }
    }

    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a JSON scalar. Arrays and objects have no scalar form.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Converts to JSON. Blobs become lossy UTF-8 strings.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Text(s) => Value::String(s.clone()),
            Self::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            Self::Raw(expr) => Value::String(expr.clone()),
        }
    }

    /// Reads the value as an integer, parsing text if needed.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) => Some(*f as i64),
            Self::Null | Self::Blob(_) | Self::Raw(_) => None,
        }
    }

    /// Reads the value as text, if it is textual.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        self.map_or(SqlValue::Null, ToSqlValue::to_sql_value)
    }
}

impl<T: ToSqlValue> From<T> for Param {
    fn from(value: T) -> Self {
        Self::One(value.to_sql_value())
    }
}

/// A value bound to a `:name` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Single value.
    One(SqlValue),
    /// List rendered as `(a, b, c)`.
    Many(Vec<SqlValue>),
}

impl Param {
    /// Builds a list parameter.
    pub fn list<T: ToSqlValue>(values: impl IntoIterator<Item = T>) -> Self {
        Self::Many(values.into_iter().map(ToSqlValue::to_sql_value).collect())
    }

    /// Converts a JSON scalar or array of scalars.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(SqlValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::Many),
            other => SqlValue::from_json(other).map(Self::One),
        }
    }

    /// Renders the parameter inline.
    #[must_use]
    pub fn render(&self, conn: &dyn Connection) -> String {
        match self {
            Self::One(v) => v.render(conn),
            Self::Many(values) => {
                let rendered: Vec<String> = values.iter().map(|v| v.render(conn)).collect();
                format!("({})", rendered.join(", "))
            }
        }
    }
}

/// One cell of a row pending insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// A concrete value.
    Literal(SqlValue),
    /// Explicit SQL NULL.
    Null,
    /// Let the column fall back to its declared default.
    UseColumnDefault,
}

impl InsertValue {
    /// Renders the cell for a VALUES list.
    #[must_use]
    pub fn render(&self, conn: &dyn Connection) -> String {
        match self {
            Self::Literal(v) => v.render(conn),
            Self::Null => String::from("NULL"),
            Self::UseColumnDefault => String::from("DEFAULT"),
        }
    }
}

/// Replaces `:name` placeholders in `template` with rendered parameters.
///
/// Placeholders are matched as whole identifiers, so `:id` never touches
/// `:idx`. Unknown placeholders are left as they are.
#[must_use]
pub fn bind_parameters(conn: &dyn Connection, template: &str, params: &[(&str, Param)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != ':' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let name = &template[start..end];
        match params.iter().find(|(key, _)| *key == name) {
            Some((_, param)) if !name.is_empty() => out.push_str(&param.render(conn)),
            _ => {
                out.push(':');
                out.push_str(name);
            }
        }
    }

    out
}
