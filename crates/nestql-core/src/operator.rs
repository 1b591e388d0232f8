//! Comparison operators and JSON-path conditions.
//!
//! Operator tokens are accepted with or without the leading `&`
//! (`gt` and `&gt` are the same operator).

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::value::{Param, SqlValue};

/// The operator vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Like,
    Between,
    Or,
    And,
}

impl Operator {
    /// SQL text for this operator.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::Nin => "NOT IN",
            Self::Like => "LIKE",
            Self::Between => "BETWEEN",
            Self::Or => "OR",
            Self::And => "AND",
        }
    }

    /// Token spelling, without the `&` prefix.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Like => "like",
            Self::Between => "between",
            Self::Or => "or",
            Self::And => "and",
        }
    }

    /// Renders `lhs <op> value` with the value inlined.
    ///
    /// `BETWEEN` takes exactly two values, `IN`/`NOT IN` take a non-empty
    /// list (a single value is wrapped), and every other comparison takes a
    /// single value. `OR`/`AND` are not comparisons.
    pub fn render(self, lhs: &str, value: &Param, conn: &dyn Connection) -> Result<String> {
        match (self, value) {
            (Self::Between, Param::Many(values)) if values.len() == 2 => Ok(format!(
                "{lhs} BETWEEN {} AND {}",
                values[0].render(conn),
                values[1].render(conn)
            )),
            (Self::Between, _) => Err(Error::QueryConstruction(format!(
                "BETWEEN on '{lhs}' needs exactly two values"
            ))),
            (Self::In | Self::Nin, Param::Many(values)) if values.is_empty() => Err(
                Error::QueryConstruction(format!("{} on '{lhs}' needs at least one value", self.sql())),
            ),
            (Self::In | Self::Nin, Param::Many(_)) => {
                Ok(format!("{lhs} {} {}", self.sql(), value.render(conn)))
            }
            (Self::In | Self::Nin, Param::One(v)) => {
                Ok(format!("{lhs} {} ({})", self.sql(), v.render(conn)))
            }
            (Self::Or | Self::And, _) => Err(Error::QueryConstruction(format!(
                "'{}' is not a comparison",
                self.token()
            ))),
            (_, Param::Many(_)) => Err(Error::QueryConstruction(format!(
                "'{}' on '{lhs}' takes a single value",
                self.token()
            ))),
            (_, Param::One(v)) => Ok(format!("{lhs} {} {}", self.sql(), v.render(conn))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{}", self.token())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.strip_prefix('&').unwrap_or(s);
        Ok(match token {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "in" => Self::In,
            "nin" => Self::Nin,
            "like" => Self::Like,
            "between" => Self::Between,
            "or" => Self::Or,
            "and" => Self::And,
            _ => return Err(Error::UnknownOperator(s.to_string())),
        })
    }
}

/// Detects operator objects such as `{"&gt": 18}`.
///
/// Every key must be an `&`-prefixed operator token.
#[must_use]
pub fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) if !map.is_empty() => map
            .keys()
            .all(|k| k.starts_with('&') && k.parse::<Operator>().is_ok()),
        _ => false,
    }
}

/// Splits `{"&op": value}` into its operator and value.
pub fn split_operator_object(value: &Value) -> Result<(Operator, &Value)> {
    let Value::Object(map) = value else {
        return Err(Error::InvalidCondition(value.to_string()));
    };
    let Some((key, inner)) = map.iter().next() else {
        return Err(Error::InvalidCondition(value.to_string()));
    };
    Ok((key.parse()?, inner))
}

/// Operators available on paths inside JSON-typed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonOp {
    Like,
    BeginsWith,
    EndsWith,
    Contains,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    HasAny,
    HasAll,
}

impl FromStr for JsonOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.strip_prefix('&').unwrap_or(s);
        Ok(match token {
            "like" => Self::Like,
            "beginsWith" => Self::BeginsWith,
            "endsWith" => Self::EndsWith,
            "contains" => Self::Contains,
            "eq" => Self::Eq,
            "neq" | "ne" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "hasAny" => Self::HasAny,
            "hasAll" => Self::HasAll,
            _ => return Err(Error::UnknownOperator(s.to_string())),
        })
    }
}

/// Builds a SQL condition over a JSON-typed column.
///
/// `condition` is either `{"path.in.doc": {"&op": argument}}` or an
/// `{"&or": [...]}` / `{"&and": [...]}` group of such conditions.
pub fn json_condition(column: &str, condition: &Value, conn: &dyn Connection) -> Result<String> {
    let Value::Object(map) = condition else {
        return Err(Error::InvalidCondition(condition.to_string()));
    };
    let Some((path, test)) = map.iter().next() else {
        return Err(Error::InvalidCondition(condition.to_string()));
    };

    if path == "&or" || path == "&and" {
        let Value::Array(items) = test else {
            return Err(Error::InvalidCondition(condition.to_string()));
        };
        let parts = items
            .iter()
            .map(|item| json_condition(column, item, conn))
            .collect::<Result<Vec<_>>>()?;
        let glue = if path == "&or" { " OR " } else { " AND " };
        return Ok(format!("({})", parts.join(glue)));
    }

    let Value::Object(test_map) = test else {
        return Err(Error::InvalidCondition(condition.to_string()));
    };
    let Some((op, argument)) = test_map.iter().next() else {
        return Err(Error::InvalidCondition(condition.to_string()));
    };
    let op: JsonOp = op.parse()?;
    let path = conn.escape_string(path);

    let search = |pattern: String| {
        format!("JSON_SEARCH({column}, 'one', '{pattern}', NULL, '$.{path}') IS NOT NULL")
    };
    let contains = |arg: &Value| {
        let encoded = conn.escape_string(&arg.to_string());
        format!("JSON_CONTAINS({column}, '{encoded}', '$.{path}')")
    };
    let extract = |sql_op: &str| {
        format!(
            "JSON_EXTRACT({column}, '$.{path}') {sql_op} {}",
            literal_argument(argument, conn)
        )
    };

    Ok(match op {
        JsonOp::Like => search(text_argument(argument, conn)),
        JsonOp::BeginsWith => search(format!("{}%", text_argument(argument, conn))),
        JsonOp::EndsWith => search(format!("%{}", text_argument(argument, conn))),
        JsonOp::Contains => search(format!("%{}%", text_argument(argument, conn))),
        JsonOp::Eq => contains(&coerce_numeric(argument)),
        JsonOp::Neq => format!("NOT {}", contains(&coerce_numeric(argument))),
        JsonOp::Gt => extract(">"),
        JsonOp::Gte => extract(">="),
        JsonOp::Lt => extract("<"),
        JsonOp::Lte => extract("<="),
        JsonOp::HasAny | JsonOp::HasAll => {
            let targets = match argument {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            let parts: Vec<String> = targets.iter().map(|t| contains(&coerce_numeric(t))).collect();
            let glue = if op == JsonOp::HasAny { " OR " } else { " AND " };
            format!("({})", parts.join(glue))
        }
    })
}

/// Numeric arguments (including numeric strings) become integers.
fn coerce_numeric(argument: &Value) -> Value {
    numeric_argument(argument).map_or_else(|| argument.clone(), Value::from)
}

#[allow(clippy::cast_possible_truncation)]
fn numeric_argument(argument: &Value) -> Option<i64> {
    match argument {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f as i64),
        _ => None,
    }
}

/// Argument spliced inside an existing quoted pattern.
fn text_argument(argument: &Value, conn: &dyn Connection) -> String {
    if let Some(n) = numeric_argument(argument) {
        return n.to_string();
    }
    match argument {
        Value::String(s) => conn.escape_string(s),
        other => conn.escape_string(&other.to_string()),
    }
}

/// Argument rendered as a standalone literal.
fn literal_argument(argument: &Value, conn: &dyn Connection) -> String {
    if let Some(n) = numeric_argument(argument) {
        return n.to_string();
    }
    SqlValue::from_json(argument).map_or_else(
        || format!("'{}'", conn.escape_string(&argument.to_string())),
        |v| v.render(conn),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryConnection;
    use serde_json::json;

    #[test]
    fn test_parse_tokens() {
        assert_eq!("&gt".parse::<Operator>().unwrap(), Operator::Gt);
        assert_eq!("nin".parse::<Operator>().unwrap(), Operator::Nin);
        assert!(matches!(
            "&near".parse::<Operator>(),
            Err(Error::UnknownOperator(_))
        ));
        assert_eq!(Operator::Nin.sql(), "NOT IN");
        assert_eq!(Operator::Gte.to_string(), "&gte");
    }

    #[test]
    fn test_render_comparisons() {
        let conn = MemoryConnection::new();
        assert_eq!(
            Operator::In.render("age", &Param::list([18, 21, 30]), &conn).unwrap(),
            "age IN (18, 21, 30)"
        );
        assert_eq!(
            Operator::Between.render("age", &Param::list([18, 30]), &conn).unwrap(),
            "age BETWEEN 18 AND 30"
        );
        assert_eq!(
            Operator::Like.render("name", &Param::from("san%"), &conn).unwrap(),
            "name LIKE 'san%'"
        );
        assert!(Operator::Between.render("age", &Param::from(3), &conn).is_err());
        assert!(Operator::Gt.render("age", &Param::list([1, 2]), &conn).is_err());
        assert!(Operator::Or.render("age", &Param::from(1), &conn).is_err());
    }

    #[test]
    fn test_operator_objects() {
        assert!(is_operator_object(&json!({"&gt": 5})));
        assert!(!is_operator_object(&json!({"gt": 5})));
        assert!(!is_operator_object(&json!({"&gt": 5, "name": 1})));
        assert!(!is_operator_object(&json!(5)));
        let value = json!({"&lte": 9});
        let (op, inner) = split_operator_object(&value).unwrap();
        assert_eq!(op, Operator::Lte);
        assert_eq!(inner, &json!(9));
    }

    #[test]
    fn test_json_search_conditions() {
        let conn = MemoryConnection::new();
        assert_eq!(
            json_condition("data", &json!({"name": {"&beginsWith": "san"}}), &conn).unwrap(),
            "JSON_SEARCH(data, 'one', 'san%', NULL, '$.name') IS NOT NULL"
        );
        assert_eq!(
            json_condition("data", &json!({"age": {"&gt": "18"}}), &conn).unwrap(),
            "JSON_EXTRACT(data, '$.age') > 18"
        );
        assert_eq!(
            json_condition("data", &json!({"tags": {"&eq": "a"}}), &conn).unwrap(),
            "JSON_CONTAINS(data, '\\\"a\\\"', '$.tags')"
        );
    }

    #[test]
    fn test_json_groups() {
        let conn = MemoryConnection::new();
        let sql = json_condition(
            "data",
            &json!({"&or": [
                {"tags": {"&hasAll": [1, 2]}},
                {"age": {"&lte": 3}}
            ]}),
            &conn,
        )
        .unwrap();
        assert_eq!(
            sql,
            "((JSON_CONTAINS(data, '1', '$.tags') AND JSON_CONTAINS(data, '2', '$.tags')) \
             OR JSON_EXTRACT(data, '$.age') <= 3)"
        );
    }

    #[test]
    fn test_json_unknown_operator() {
        let conn = MemoryConnection::new();
        assert!(matches!(
            json_condition("data", &json!({"a": {"&near": 1}}), &conn),
            Err(Error::UnknownOperator(_))
        ));
        assert!(json_condition("data", &json!("nope"), &conn).is_err());
    }
}
