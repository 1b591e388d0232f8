//! Materialized result objects.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::iterator::ResultIterator;

/// One attribute of a [`Record`].
#[derive(Debug, Clone)]
pub enum Field {
    /// A column value.
    Value(Value),
    /// A joined collection marked as holding at most one element.
    One(Option<Box<Record>>),
    /// A joined collection not yet read.
    Iter(ResultIterator),
    /// A joined collection read into memory.
    List(Vec<Record>),
}

impl Field {
    /// Reads any lazy part into memory.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Iter(mut it) => Self::List(it.fetch_all()),
            Self::One(Some(record)) => Self::One(Some(Box::new(record.resolve()))),
            Self::List(records) => Self::List(records.into_iter().map(Record::resolve).collect()),
            other => other,
        }
    }

    /// Converts to JSON, reading lazy parts.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::One(None) => Value::Null,
            Self::One(Some(record)) => record.into_json(),
            Self::Iter(mut it) => Value::Array(
                it.fetch_all().into_iter().map(Record::into_json).collect(),
            ),
            Self::List(records) => {
                Value::Array(records.into_iter().map(Record::into_json).collect())
            }
        }
    }
}

/// An object built from one row group, attributes in projection order.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, Field)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous one with that name.
    pub fn set(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        self.set(name, Field::Value(value));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Column value of a field. `None` for joined fields.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name)? {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Records of a resolved joined field.
    #[must_use]
    pub fn list(&self, name: &str) -> Option<&[Record]> {
        match self.get(name)? {
            Field::List(records) => Some(records),
            _ => None,
        }
    }

    /// Record of a single-element joined field.
    #[must_use]
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.get(name)? {
            Field::One(record) => record.as_deref(),
            _ => None,
        }
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reads every lazy joined field into memory.
    #[must_use]
    pub fn resolve(self) -> Self {
        Self {
            fields: self
                .fields
                .into_iter()
                .map(|(name, field)| (name, field.resolve()))
                .collect(),
        }
    }

    /// Converts to a JSON object, reading lazy joined fields.
    #[must_use]
    pub fn into_json(self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .into_iter()
            .map(|(name, field)| (name, field.into_json()))
            .collect();
        Value::Object(map)
    }

    /// Deserializes into a typed value.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn pet(id: i64, name: &str) -> Record {
        let mut record = Record::new();
        record.set_value("id", json!(id));
        record.set_value("name", json!(name));
        record
    }

    #[test]
    fn test_set_replaces() {
        let mut record = pet(1, "Rufus");
        record.set_value("name", json!("Buddy"));
        assert_eq!(record.len(), 2);
        assert_eq!(record.value("name"), Some(&json!("Buddy")));
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn test_into_json_nests() {
        let mut person = Record::new();
        person.set_value("id", json!(1));
        person.set("pets", Field::List(vec![pet(1, "Rufus"), pet(2, "Buddy")]));
        person.set("best_friend", Field::One(Some(Box::new(pet(1, "Rufus")))));
        person.set("nemesis", Field::One(None));

        assert_eq!(person.list("pets").map(<[Record]>::len), Some(2));
        assert_eq!(
            person.into_json(),
            json!({
                "id": 1,
                "pets": [{"id": 1, "name": "Rufus"}, {"id": 2, "name": "Buddy"}],
                "best_friend": {"id": 1, "name": "Rufus"},
                "nemesis": null
            })
        );
    }

    #[test]
    fn test_deserialize() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Pet {
            id: i64,
            name: String,
        }

        let parsed: Pet = pet(4, "Hugo").deserialize().unwrap();
        assert_eq!(parsed, Pet { id: 4, name: "Hugo".into() });
        assert!(pet(4, "Hugo").deserialize::<Vec<i64>>().is_err());
    }
}
