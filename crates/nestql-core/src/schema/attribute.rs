//! Attribute (column) metadata.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MySQL column types.
///
/// Type names are parsed case-insensitively and aliases collapse onto one
/// variant (`integer` is `int`, `bool` is `tinyint`). Anything unrecognized
/// is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SqlType {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Decimal,
    Float,
    Double,
    Char,
    Varchar,
    TinyText,
    Text,
    MediumText,
    LongText,
    Blob,
    LongBlob,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Json,
    Enum,
    Set,
    Other(String),
}

impl SqlType {
    /// Parses a type name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "tinyint" | "bool" | "boolean" => Self::TinyInt,
            "smallint" => Self::SmallInt,
            "mediumint" => Self::MediumInt,
            "int" | "integer" => Self::Int,
            "bigint" => Self::BigInt,
            "decimal" | "numeric" => Self::Decimal,
            "float" => Self::Float,
            "double" | "real" => Self::Double,
            "char" => Self::Char,
            "varchar" => Self::Varchar,
            "tinytext" => Self::TinyText,
            "text" => Self::Text,
            "mediumtext" => Self::MediumText,
            "longtext" => Self::LongText,
            "blob" => Self::Blob,
            "longblob" => Self::LongBlob,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            "time" => Self::Time,
            "year" => Self::Year,
            "json" => Self::Json,
            "enum" => Self::Enum,
            "set" => Self::Set,
            _ => Self::Other(name.trim().to_string()),
        }
    }

    /// Type name as written in DDL.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::TinyInt => "tinyint",
            Self::SmallInt => "smallint",
            Self::MediumInt => "mediumint",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::Varchar => "varchar",
            Self::TinyText => "tinytext",
            Self::Text => "text",
            Self::MediumText => "mediumtext",
            Self::LongText => "longtext",
            Self::Blob => "blob",
            Self::LongBlob => "longblob",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Time => "time",
            Self::Year => "year",
            Self::Json => "json",
            Self::Enum => "enum",
            Self::Set => "set",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for SqlType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<&str> for SqlType {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl From<SqlType> for String {
    fn from(sql_type: SqlType) -> Self {
        sql_type.name().to_string()
    }
}

/// Default value for a column.
///
/// In definition files a missing `default` is `None`, `null` is `Null`, a
/// scalar is the matching variant and `{"expression": "..."}` is an
/// unquoted SQL expression.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<Value>", into = "Option<Value>")]
pub enum DefaultValue {
    /// No default value.
    #[default]
    None,
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    ///
    /// Scalars are quoted the way MySQL reports them back, so a declared
    /// integer default compares equal to an introspected one.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Null => Some("NULL".to_string()),
            Self::Bool(b) => Some(if *b { "'1'" } else { "'0'" }.to_string()),
            Self::Integer(i) => Some(format!("'{i}'")),
            Self::Float(f) => Some(format!("'{f}'")),
            Self::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            Self::Expression(expr) => Some(expr.clone()),
        }
    }

    /// Returns true for `None`.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<Option<Value>> for DefaultValue {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Null,
            Some(Value::Bool(b)) => Self::Bool(b),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::None),
            Some(Value::String(s)) => Self::String(s),
            Some(Value::Object(map)) => map
                .get("expression")
                .and_then(Value::as_str)
                .map_or(Self::None, |e| Self::Expression(e.to_string())),
            Some(Value::Array(_)) => Self::None,
        }
    }
}

impl From<DefaultValue> for Option<Value> {
    fn from(value: DefaultValue) -> Self {
        match value {
            DefaultValue::None => None,
            DefaultValue::Null => Some(Value::Null),
            DefaultValue::Bool(b) => Some(Value::Bool(b)),
            DefaultValue::Integer(i) => Some(Value::from(i)),
            DefaultValue::Float(f) => Some(Value::from(f)),
            DefaultValue::String(s) => Some(Value::String(s)),
            DefaultValue::Expression(e) => Some(serde_json::json!({ "expression": e })),
        }
    }
}

/// A logical field of a schema and its backing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    #[serde(default)]
    pub name: String,
    /// Backing column. Empty means "same as the name".
    #[serde(default)]
    pub column: String,
    /// Column type.
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    /// Length or precision, e.g. `255` or `10,2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(default)]
    pub unsigned: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "DefaultValue::is_none")]
    pub default: DefaultValue,
    #[serde(default)]
    pub auto_increment: bool,
    /// Values are stored as encoded JSON and decoded on read.
    #[serde(default)]
    pub json: bool,
    /// Key values are generated with the unique-id scheme when absent.
    #[serde(default)]
    pub uuid: bool,
}

impl Attribute {
    /// Creates a NOT NULL attribute of the given type.
    #[must_use]
    pub fn new(sql_type: impl Into<SqlType>) -> Self {
        Self {
            name: String::new(),
            column: String::new(),
            sql_type: sql_type.into(),
            length: None,
            unsigned: false,
            nullable: false,
            default: DefaultValue::None,
            auto_increment: false,
            json: false,
            uuid: false,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    #[must_use]
    pub fn length(mut self, length: impl ToString) -> Self {
        self.length = Some(length.to_string());
        self
    }

    #[must_use]
    pub const fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub const fn json(mut self) -> Self {
        self.json = true;
        self
    }

    #[must_use]
    pub const fn uuid(mut self) -> Self {
        self.uuid = true;
        self
    }

    /// Whether inserting without a value is an error: NOT NULL, no default
    /// and not filled in by the server.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.auto_increment
    }

    /// Column definition used by CREATE TABLE and ALTER TABLE, starting with
    /// the quoted column name.
    #[must_use]
    pub fn definition(&self) -> String {
        let mut parts = vec![format!("`{}`", self.column)];
        match &self.length {
            Some(length) => parts.push(format!("{}({length})", self.sql_type)),
            None => parts.push(self.sql_type.to_string()),
        }
        if self.unsigned {
            parts.push("unsigned".to_string());
        }
        parts.push(if self.nullable { "NULL" } else { "NOT NULL" }.to_string());
        if let Some(default) = self.default.to_sql() {
            parts.push(format!("DEFAULT {default}"));
        }
        if self.auto_increment {
            parts.push("AUTO_INCREMENT".to_string());
        }
        parts.join(" ")
    }

    /// Compares the properties a migration can change. An unspecified
    /// length or default on either side is not a difference.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        if self.sql_type != other.sql_type
            || self.unsigned != other.unsigned
            || self.nullable != other.nullable
            || self.auto_increment != other.auto_increment
        {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.length, &other.length) {
            if a.replace(' ', "") != b.replace(' ', "") {
                return true;
            }
        }
        if !self.default.is_none() && !other.default.is_none() {
            return self.default.to_sql() != other.default.to_sql();
        }
        false
    }
}
