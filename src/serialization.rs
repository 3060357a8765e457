use crate::form::{Form, FormKind, Keyword, Symbol};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Plain data view of a form, used when forms are written out as JSON or YAML.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Null,
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

pub fn to_value(form: &Form) -> Value {
    match &form.kind {
        FormKind::Nil => Value::Null,
        FormKind::Bool(b) => Value::Boolean(*b),
        FormKind::Int(n) => Value::Integer(*n),
        FormKind::Float(x) => Value::Number(*x),
        FormKind::Str(s) => Value::String(s.clone()),
        FormKind::List(items) | FormKind::Vector(items) | FormKind::Set(items) => {
            Value::Array(items.iter().map(to_value).collect())
        }
        FormKind::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match &k.kind {
                        FormKind::Str(s) => s.clone(),
                        _ => k.to_string(),
                    };
                    (key, to_value(v))
                })
                .collect(),
        ),
        // Symbols, keywords, characters and tagged literals keep their printed form.
        _ => Value::String(form.to_string()),
    }
}

impl Serialize for Form {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        to_value(self).serialize(serializer)
    }
}

impl Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl Serialize for Keyword {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
