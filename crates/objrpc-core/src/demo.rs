//! A small object graph served by `objrpc-server` and used throughout the tests.
//!
//! ```text
//! API
//!  └─ api: DemoApi
//!      ├─ counter: Counter
//!      └─ database: Database   (target of `sqlref` lookups)
//! ```

use crate::config::ProtocolConfig;
use crate::error::{Fault, RegistryError};
use crate::server::{
    Args, Capabilities, Exposed, ObjectRef, Registry, RemoteObject, Value,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Fault> {
    mutex
        .lock()
        .map_err(|_| Fault::new("InternalError", "lock poisoned"))
}

fn optional_i64(args: &Args, index: usize, default: i64) -> Result<i64, Fault> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => args.i64(index),
    }
}

/// A labelled integer counter.
#[derive(Debug)]
pub struct Counter {
    label: Mutex<String>,
    value: Mutex<i64>,
    peer: Mutex<Option<ObjectRef>>,
    created: DateTime<Utc>,
}

impl Counter {
    pub fn new(label: impl Into<String>, value: i64) -> Self {
        Self {
            label: Mutex::new(label.into()),
            value: Mutex::new(value),
            peer: Mutex::new(None),
            created: Utc::now(),
        }
    }

    pub fn value(&self) -> i64 {
        self.value.lock().map(|v| *v).unwrap_or_default()
    }

    pub fn label(&self) -> String {
        self.label.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn increment(&self, by: i64) -> Result<i64, Fault> {
        let mut value = lock(&self.value)?;
        *value += by;
        Ok(*value)
    }
}

impl Exposed for Counter {
    const CLASS: &'static str = "Counter";

    fn capabilities() -> &'static Capabilities<Self> {
        static CAPS: OnceLock<Capabilities<Counter>> = OnceLock::new();
        CAPS.get_or_init(|| {
            Capabilities::<Self>::builder()
                .method("increment", &["by"], |c, _, args| {
                    Ok(Value::from(c.increment(optional_i64(&args, 0, 1)?)?))
                })
                .method("reset", &[], |c, _, _| {
                    *lock(&c.value)? = 0;
                    Ok(Value::Null)
                })
                .method("fail", &["message"], |_, _, args| {
                    Err(Fault::value_error(args.str(0)?))
                })
                .method("inspect", &["name"], |c, cx, args| c.get_attr(cx, args.str(0)?))
                .method("spawn", &["label"], |_, cx, args| {
                    let child = cx.register(Arc::new(Counter::new(args.str(0)?, 0)))?;
                    Ok(Value::Object(child))
                })
                .attr(
                    "value",
                    |c, _| Ok(Value::from(*lock(&c.value)?)),
                    |c, _, v| {
                        let n = v
                            .as_i64()
                            .ok_or_else(|| Fault::type_error("value must be an integer"))?;
                        *lock(&c.value)? = n;
                        Ok(())
                    },
                )
                .attr(
                    "label",
                    |c, _| Ok(Value::from(lock(&c.label)?.clone())),
                    |c, _, v| {
                        let label = v
                            .as_str()
                            .ok_or_else(|| Fault::type_error("label must be a string"))?;
                        *lock(&c.label)? = label.to_string();
                        Ok(())
                    },
                )
                .attr(
                    "peer",
                    |c, _| Ok(Value::from(lock(&c.peer)?.clone())),
                    |c, _, v| {
                        let peer = match v {
                            Value::Null => None,
                            Value::Object(obj) => Some(obj),
                            _ => return Err(Fault::type_error("peer must be an object or null")),
                        };
                        *lock(&c.peer)? = peer;
                        Ok(())
                    },
                )
                .getter("created", |c, _| Ok(Value::Timestamp(c.created)))
                .build()
        })
    }
}

/// In-memory tables answering `api.database.get(name, items)`.
///
/// Records carry `__meta__: {name, id}` so clients can send them back by
/// reference.
#[derive(Debug)]
pub struct Database {
    tables: Mutex<BTreeMap<String, Vec<serde_json::Value>>>,
    lookups: AtomicUsize,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        let sqlref = |name: &str, items: serde_json::Value| {
            json!({"sqlref": {"name": name, "items": items}})
        };
        let mut tables = BTreeMap::new();
        tables.insert(
            "customers".to_string(),
            vec![
                json!({"id": 1, "name": "Ada Lovelace"}),
                json!({"id": 2, "name": "Grace Hopper"}),
            ],
        );
        tables.insert(
            "orders".to_string(),
            vec![
                json!({
                    "id": 10,
                    "item": "lamp",
                    "quantity": 2,
                    "customer": sqlref("customers", json!([1])),
                    "watchers": sqlref("customers", json!([1, 2])),
                }),
                json!({
                    "id": 11,
                    "item": "desk",
                    "quantity": 1,
                    "customer": sqlref("customers", json!([2])),
                    "watchers": sqlref("customers", json!([])),
                }),
            ],
        );
        Self {
            tables: Mutex::new(tables),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of `get` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Fetch the records of `name` whose ids are listed in `items`.
    ///
    /// `items` is a single id or a list of ids; the result is always a list.
    pub fn fetch(&self, name: &str, items: &Value) -> Result<Vec<serde_json::Value>, Fault> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let ids: Vec<u64> = match items {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_u64().ok_or_else(|| Fault::type_error("ids must be integers")))
                .collect::<Result<_, _>>()?,
            single => vec![single
                .as_u64()
                .ok_or_else(|| Fault::type_error("ids must be integers"))?],
        };
        debug!("Database lookup {} {:?}", name, ids);

        let tables = lock(&self.tables)?;
        let rows = tables
            .get(name)
            .ok_or_else(|| Fault::key_error(format!("no table '{}'", name)))?;
        Ok(ids
            .iter()
            .filter_map(|id| rows.iter().find(|row| row["id"] == json!(id)))
            .map(|row| {
                let mut record = row.clone();
                record[ProtocolConfig::META_KEY] = json!({"name": name, "id": row["id"]});
                record
            })
            .collect())
    }

    fn insert(&self, name: &str, mut record: serde_json::Value) -> Result<u64, Fault> {
        if !record.is_object() {
            return Err(Fault::type_error("record must be a mapping"));
        }
        let mut tables = lock(&self.tables)?;
        let rows = tables.entry(name.to_string()).or_default();
        let id = rows
            .iter()
            .filter_map(|row| row["id"].as_u64())
            .max()
            .unwrap_or(0)
            + 1;
        record["id"] = json!(id);
        rows.push(record);
        Ok(id)
    }
}

impl Exposed for Database {
    const CLASS: &'static str = "Database";

    fn capabilities() -> &'static Capabilities<Self> {
        static CAPS: OnceLock<Capabilities<Database>> = OnceLock::new();
        CAPS.get_or_init(|| {
            Capabilities::<Self>::builder()
                .method("get", &["name", "items"], |db, _, args| {
                    let records = db.fetch(args.str(0)?, args.required(1)?)?;
                    Ok(Value::from(records))
                })
                .method("insert", &["name", "record"], |db, _, args| {
                    let record = args.required(1)?.to_wire();
                    Ok(Value::from(db.insert(args.str(0)?, record)?))
                })
                .getter("tables", |db, _| {
                    let names: Vec<String> = lock(&db.tables)?.keys().cloned().collect();
                    Ok(Value::from(names))
                })
                .build()
        })
    }
}

/// Application object exposed as `api`.
#[derive(Debug)]
pub struct DemoApi {
    counter: ObjectRef,
    database: ObjectRef,
    title: Mutex<String>,
}

impl DemoApi {
    /// Build the graph, registering its children in `registry`.
    pub fn new(registry: &Registry) -> Result<Arc<Self>, RegistryError> {
        let counter = registry.register(Arc::new(Counter::new("default", 0)))?;
        let database = registry.register(Arc::new(Database::new()))?;
        Ok(Arc::new(Self {
            counter,
            database,
            title: Mutex::new("objrpc demo".to_string()),
        }))
    }

    pub fn counter(&self) -> &ObjectRef {
        &self.counter
    }

    pub fn database(&self) -> &ObjectRef {
        &self.database
    }

    fn db(&self) -> Result<&Database, Fault> {
        self.database
            .downcast_ref::<Database>()
            .ok_or_else(|| Fault::new("InternalError", "database has the wrong type"))
    }

    /// Dereference a `{sqlref: {name, items}, one?}` mapping.
    fn dereference(&self, reference: &Value) -> Result<Value, Fault> {
        let Value::Map(entries) = reference else {
            return Err(Fault::type_error("expected a sqlref mapping"));
        };
        let Some(Value::Map(sqlref)) = entries.get(ProtocolConfig::SQLREF_KEY) else {
            return Err(Fault::type_error("expected a sqlref mapping"));
        };
        let name = sqlref
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Fault::type_error("sqlref without a name"))?;
        let items = sqlref
            .get("items")
            .ok_or_else(|| Fault::type_error("sqlref without items"))?;

        let mut records = self.db()?.fetch(name, items)?;
        let one = entries.get("one").and_then(Value::as_bool).unwrap_or(false);
        if one {
            return match records.len() {
                1 => Ok(Value::from(records.remove(0))),
                n => Err(Fault::value_error(format!("expected one record, found {}", n))),
            };
        }
        Ok(Value::from(records))
    }
}

fn add(a: &Value, b: &Value) -> Result<Value, Fault> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a
            .checked_add(b)
            .map(Value::from)
            .ok_or_else(|| Fault::value_error("integer overflow"));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::from(a + b)),
        _ => Err(Fault::type_error("add() takes two numbers")),
    }
}

impl Exposed for DemoApi {
    const CLASS: &'static str = "DemoApi";

    fn capabilities() -> &'static Capabilities<Self> {
        static CAPS: OnceLock<Capabilities<DemoApi>> = OnceLock::new();
        CAPS.get_or_init(|| {
            Capabilities::<Self>::builder()
                .method("add", &["a", "b"], |_, _, args| add(args.required(0)?, args.required(1)?))
                .method("make_counter", &["label", "start"], |_, cx, args| {
                    let counter = Counter::new(args.str(0)?, optional_i64(&args, 1, 0)?);
                    Ok(Value::Object(cx.register(Arc::new(counter))?))
                })
                .method("class_of", &["obj"], |_, _, args| {
                    Ok(Value::from(args.object(0)?.class_name()))
                })
                .method("now", &[], |_, _, _| Ok(Value::Timestamp(Utc::now())))
                .method("order", &["id"], |api, _, args| {
                    let id = args.required(0)?;
                    let mut records = api.db()?.fetch("orders", id)?;
                    if records.is_empty() {
                        return Err(Fault::key_error(format!("no order {}", id.to_wire())));
                    }
                    Ok(Value::from(records.remove(0)))
                })
                .method("dereference", &["reference"], |api, _, args| {
                    api.dereference(args.required(0)?)
                })
                .getter("counter", |api, _| Ok(Value::Object(api.counter.clone())))
                .getter("database", |api, _| Ok(Value::Object(api.database.clone())))
                .attr(
                    "title",
                    |api, _| Ok(Value::from(lock(&api.title)?.clone())),
                    |api, _, v| {
                        let title = v
                            .as_str()
                            .ok_or_else(|| Fault::type_error("title must be a string"))?;
                        *lock(&api.title)? = title.to_string();
                        Ok(())
                    },
                )
                .build()
        })
    }
}
