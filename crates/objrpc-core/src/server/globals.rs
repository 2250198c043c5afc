//! The API root and the `globals` pseudo-namespace.
//!
//! The root is the default dispatch target of the base endpoint. It exposes the
//! application object as `api`, the diagnostics namespace as `globals`, and any
//! registered object by its numeric id (`"17.method"` routes to object 17).

use super::object::{Args, CallContext, Capabilities, Exposed};
use super::registry::ObjectRef;
use super::value::Value;
use crate::error::Fault;
use std::sync::OnceLock;

/// Walk a dotted attribute path, starting at `start`.
///
/// Every segment but the last must yield an object.
pub(crate) fn resolve_path(
    cx: &CallContext<'_>,
    start: &ObjectRef,
    path: &str,
) -> Result<Value, Fault> {
    let mut current = Value::Object(start.clone());
    for segment in path.split('.') {
        let obj = current.as_object().ok_or_else(|| {
            Fault::attribute(format!("cannot resolve '{}' on a non-object value", segment))
        })?;
        current = obj.object().get_attr(cx, segment)?;
    }
    Ok(current)
}

fn split_parent(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    }
}

/// Accept a registered id as integer, digit string, or already-resolved reference.
fn object_argument(cx: &CallContext<'_>, args: &Args, index: usize) -> Result<ObjectRef, Fault> {
    let key = args.required(index)?;
    if let Some(obj) = key.as_object() {
        return Ok(obj.clone());
    }
    let id = key
        .as_u64()
        .or_else(|| key.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| Fault::key_error(format!("{:?} is not an object id", key.to_wire())))?;
    cx.lookup(id).map_err(|_| Fault::key_error(id.to_string()))
}

/// Diagnostics and reflection helpers reachable as `globals.*`.
///
/// Read-only: none of its members can be reassigned.
#[derive(Debug, Default)]
pub struct Globals;

impl Exposed for Globals {
    const CLASS: &'static str = "Globals";

    fn capabilities() -> &'static Capabilities<Self> {
        static CAPS: OnceLock<Capabilities<Globals>> = OnceLock::new();
        CAPS.get_or_init(|| {
            Capabilities::<Self>::builder()
                .method("allobjects", &[], |_, cx, _| {
                    let ids = cx.registry().ids().map_err(Fault::from)?;
                    Ok(Value::from(ids))
                })
                .method("getobject", &["key"], |_, cx, args| {
                    Ok(Value::Object(object_argument(cx, &args, 0)?))
                })
                .method("echo", &["val"], |_, _, mut args| args.take(0))
                .method("getattr", &["obj", "attr"], |_, cx, args| {
                    let obj = args.object(0)?;
                    resolve_path(cx, obj, args.str(1)?)
                })
                .method("setattr", &["obj", "attr", "val"], |_, cx, mut args| {
                    let value = args.take(2)?;
                    let obj = args.object(0)?.clone();
                    let (parent, leaf) = split_parent(args.str(1)?);
                    let owner = match parent {
                        Some(prefix) => resolve_path(cx, &obj, prefix)?
                            .as_object()
                            .cloned()
                            .ok_or_else(|| {
                                Fault::attribute(format!("'{}' is not an object", prefix))
                            })?,
                        None => obj,
                    };
                    owner.object().set_attr(cx, leaf, value)?;
                    Ok(Value::Null)
                })
                .build()
        })
    }
}

/// Default dispatch target of the base endpoint.
#[derive(Debug)]
pub struct ApiRoot {
    api: ObjectRef,
    globals: ObjectRef,
}

impl ApiRoot {
    pub fn new(api: ObjectRef, globals: ObjectRef) -> Self {
        Self { api, globals }
    }

    pub fn api(&self) -> &ObjectRef {
        &self.api
    }
}

impl Exposed for ApiRoot {
    const CLASS: &'static str = "API";

    fn capabilities() -> &'static Capabilities<Self> {
        static CAPS: OnceLock<Capabilities<ApiRoot>> = OnceLock::new();
        CAPS.get_or_init(|| {
            Capabilities::<Self>::builder()
                .getter("api", |root, _| Ok(Value::Object(root.api.clone())))
                .getter("globals", |root, _| Ok(Value::Object(root.globals.clone())))
                .fallback(|_, cx, name| {
                    let id: u64 = name.parse().ok()?;
                    Some(cx.lookup(id).map(Value::Object).map_err(Fault::from))
                })
                .build()
        })
    }
}
