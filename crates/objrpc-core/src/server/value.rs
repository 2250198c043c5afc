//! Server-side values and the marshalling rules between them and JSON.
//!
//! Encoding (`to_wire`), applied recursively:
//! - a value with a custom wire hook uses it
//! - a registered live object becomes its `hash:<id>` token
//! - arrays and maps recurse element-wise
//! - a timestamp becomes an ISO-8601 string
//! - everything else passes through
//!
//! Decoding (`from_wire`) turns `hash:<id>` strings back into registry entries.

use super::registry::{ObjectRef, Registry};
use crate::error::Fault;
use crate::protocol::parse_reference;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Custom wire representation hook.
pub trait WireRepr: Send + Sync + fmt::Debug {
    fn to_wire(&self) -> serde_json::Value;
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectRef),
    Timestamp(DateTime<Utc>),
    Custom(Arc<dyn WireRepr>),
}

impl Value {
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_wire).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_wire()))
                    .collect::<Map<String, serde_json::Value>>(),
            ),
            Value::Object(obj) => serde_json::Value::String(obj.token()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Custom(hook) => hook.to_wire(),
        }
    }

    /// Decode a JSON value, resolving reference tokens against `registry`.
    ///
    /// A token naming an unregistered id is a `NotFound` fault.
    pub fn from_wire(json: serde_json::Value, registry: &Registry) -> Result<Value, Fault> {
        Ok(match json {
            serde_json::Value::String(s) => match parse_reference(&s) {
                Some(id) => Value::Object(registry.lookup(id)?),
                None => Value::String(s),
            },
            serde_json::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| Value::from_wire(item, registry))
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, Value::from_wire(v, registry)?)))
                    .collect::<Result<_, Fault>>()?,
            ),
            other => Value::from(other),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => a.to_wire() == b.to_wire(),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    /// Plain conversion; reference tokens stay strings.
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats become `Null`, as JSON cannot carry them.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}
