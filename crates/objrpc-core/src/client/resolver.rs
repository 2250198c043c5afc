//! Client-side reference resolution.
//!
//! Decoding a result: a top-level `hash:<id>` string becomes a [`Proxy`].
//! Proxies of the [`Flavor::SqlRef`] flavor additionally wrap mappings that
//! embed `{sqlref: {name, items}}` values in a [`LazyRecord`], whose embedded
//! references are fetched with `api.database.get(name, items)` on first read.
//!
//! Encoding an argument: the same flavor rewrites records carrying
//! `__meta__: {name, id}` into `{one: true, sqlref: {name, items: id}}`.

use super::proxy::Proxy;
use crate::config::ProtocolConfig;
use crate::error::{ClientError, Result};
use crate::protocol::parse_reference;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt;

/// How a proxy treats auxiliary references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flavor {
    /// Results pass through untouched apart from object references.
    #[default]
    Plain,
    /// `sqlref` values are resolved lazily; `__meta__` records are sent by reference.
    SqlRef,
}

impl Flavor {
    pub(crate) fn marshal(self, value: Value) -> Value {
        match self {
            Flavor::Plain => value,
            Flavor::SqlRef => by_reference(&value).unwrap_or(value),
        }
    }
}

fn by_reference(value: &Value) -> Option<Value> {
    let meta = value.get(ProtocolConfig::META_KEY)?;
    let name = meta.get("name")?;
    let id = meta.get("id")?;
    Some(json!({"one": true, "sqlref": {"name": name, "items": id}}))
}

fn is_sqlref(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|entries| entries.contains_key(ProtocolConfig::SQLREF_KEY))
}

/// Decode the `result` of a success envelope on behalf of `proxy`.
pub(crate) fn decode(proxy: &Proxy, result: Value) -> Reply {
    if let Some(id) = result.as_str().and_then(parse_reference) {
        return Reply::Proxy(proxy.child(id));
    }
    match proxy.flavor() {
        Flavor::Plain => Reply::Value(result),
        Flavor::SqlRef => wrap_records(proxy, result),
    }
}

fn wrap_records(proxy: &Proxy, value: Value) -> Reply {
    match value {
        Value::Object(fields) if fields.values().any(is_sqlref) => Reply::Record(LazyRecord {
            fields,
            resolver: proxy.clone(),
        }),
        Value::Array(items) => {
            Reply::List(items.into_iter().map(|item| wrap_records(proxy, item)).collect())
        }
        other => Reply::Value(other),
    }
}

/// A decoded call result.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    Proxy(Proxy),
    Record(LazyRecord),
    List(Vec<Reply>),
}

impl Reply {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Reply::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Reply::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Reply::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&LazyRecord> {
        match self {
            Reply::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Reply]> {
        match self {
            Reply::List(items) => Some(items),
            _ => None,
        }
    }

    /// Parse an ISO-8601 string result.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.as_str()?)
    }

    /// Parse the ISO-8601 string found at a JSON pointer into the result,
    /// e.g. `/created` or `/events/0/at`.
    pub fn timestamp_at(&self, pointer: &str) -> Option<DateTime<Utc>> {
        parse_timestamp(self.to_json().pointer(pointer)?.as_str()?)
    }

    /// Wire form: proxies become their `hash:<id>` token, records their raw fields.
    pub fn to_json(&self) -> Value {
        match self {
            Reply::Value(value) => value.clone(),
            Reply::Proxy(proxy) => Value::String(proxy.self_ref()),
            Reply::Record(record) => Value::Object(record.fields.clone()),
            Reply::List(items) => Value::Array(items.iter().map(Reply::to_json).collect()),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// A mapping whose `sqlref` values are fetched on first read.
#[derive(Clone)]
pub struct LazyRecord {
    fields: Map<String, Value>,
    resolver: Proxy,
}

impl LazyRecord {
    /// Read `key`, resolving an embedded `sqlref`.
    ///
    /// Each distinct `(name, items)` pair costs at most one lookup across all
    /// records sharing a cache.
    pub fn get(&self, key: &str) -> Result<Option<Reply>> {
        let Some(value) = self.fields.get(key) else {
            return Ok(None);
        };
        let Some(sqlref) = value.get(ProtocolConfig::SQLREF_KEY) else {
            return Ok(Some(Reply::Value(value.clone())));
        };

        let name = sqlref
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol(format!("sqlref at '{}' has no name", key)))?;
        let items = sqlref.get("items").cloned().unwrap_or(Value::Null);
        let resolved = self.resolver.lookup_auxiliary(name, &items)?;
        Ok(Some(decode(&self.resolver, resolved)))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// The undecoded fields.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_raw(self) -> Map<String, Value> {
        self.fields
    }
}

impl PartialEq for LazyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Debug for LazyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}
