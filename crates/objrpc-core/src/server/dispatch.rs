//! JSON-RPC request dispatcher.
//!
//! Per payload: decode, validate, route, invoke, encode. A payload that is not
//! JSON aborts as a whole with `ParseError`; a JSON array is a batch whose
//! elements are processed independently, notifications contributing no entry.
//!
//! Attribute faults raised while invoking are reported as `MethodNotFound`,
//! the same kind as a path that does not resolve. `data.message` tells the two
//! apart for diagnostics.

use super::globals::resolve_path;
use super::introspect::describe;
use super::object::{CallContext, Params};
use super::registry::{ObjectRef, Registry};
use super::value::Value;
use crate::config::ProtocolConfig;
use crate::error::{Fault, RpcErrorKind};
use crate::protocol::ResponseEnvelope;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one request before encoding.
type CallOutcome = Result<Value, (RpcErrorKind, Fault)>;

pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Handle a raw request body against `target`.
    ///
    /// Returns the raw response body. A lone notification yields an empty
    /// body.
    pub fn handle(&self, target: &ObjectRef, body: &[u8]) -> String {
        let payload: serde_json::Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unparseable request payload: {}", e);
                let resp = ResponseEnvelope::error(
                    None,
                    RpcErrorKind::ParseError,
                    "JSONDecodeError",
                    e.to_string(),
                );
                return encode(&resp);
            }
        };

        match self.handle_payload(target, payload) {
            Some(response) => response.to_string(),
            None => String::new(),
        }
    }

    /// Handle an already-parsed payload (single request or batch).
    pub fn handle_payload(
        &self,
        target: &ObjectRef,
        payload: serde_json::Value,
    ) -> Option<serde_json::Value> {
        match payload {
            serde_json::Value::Array(requests) => {
                debug!("Dispatching batch of {} requests to {:?}", requests.len(), target);
                let responses: Vec<serde_json::Value> = requests
                    .into_iter()
                    .filter_map(|request| self.handle_one(target, request))
                    .map(|resp| to_json(&resp))
                    .collect();
                Some(serde_json::Value::Array(responses))
            }
            request => self.handle_one(target, request).map(|resp| to_json(&resp)),
        }
    }

    /// Process one request; `None` for notifications.
    pub fn handle_one(
        &self,
        target: &ObjectRef,
        request: serde_json::Value,
    ) -> Option<ResponseEnvelope> {
        let serde_json::Value::Object(mut fields) = request else {
            return Some(ResponseEnvelope::error(
                None,
                RpcErrorKind::InvalidRequest,
                "InvalidRequest",
                "request is not an object",
            ));
        };

        let is_notification = !fields.contains_key("id");
        let id = fields.remove("id");
        let outcome = self.process(target, &mut fields);

        if is_notification {
            if let Err((kind, fault)) = &outcome {
                debug!("Notification failed with {:?}: {}", kind, fault);
            }
            return None;
        }

        Some(match outcome {
            Ok(value) => ResponseEnvelope::success(id, value.to_wire()),
            Err((kind, fault)) => {
                warn!("Request failed with {:?}: {}", kind, fault);
                ResponseEnvelope::error(id, kind, fault.exception, fault.message)
            }
        })
    }

    fn process(
        &self,
        target: &ObjectRef,
        fields: &mut serde_json::Map<String, serde_json::Value>,
    ) -> CallOutcome {
        let invalid = |msg: &str| (RpcErrorKind::InvalidRequest, Fault::new("InvalidRequest", msg));

        if !fields.contains_key("jsonrpc") {
            return Err(invalid("no version specified"));
        }
        let method = match fields.get("method") {
            Some(serde_json::Value::String(method)) => method.clone(),
            Some(_) => return Err(invalid("method is not a string")),
            None => return Err(invalid("no method specified")),
        };

        let raw_params = fields
            .remove("params")
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
        let params = match Value::from_wire(raw_params, &self.registry) {
            Ok(Value::Array(items)) => Params::Positional(items),
            Ok(Value::Map(entries)) => Params::Named(entries),
            Ok(_) => {
                return Err((
                    RpcErrorKind::InvalidParams,
                    Fault::type_error("args not an object or array"),
                ))
            }
            Err(fault) => return Err((RpcErrorKind::InvalidParams, fault)),
        };

        debug!("RPC call: {:?}.{}", target, method);
        let cx = CallContext::new(&self.registry);
        match catch_unwind(AssertUnwindSafe(|| route_and_invoke(&cx, target, &method, params))) {
            Ok(outcome) => outcome,
            Err(_) => Err((
                RpcErrorKind::InternalError,
                Fault::new("Panic", format!("method {} panicked", method)),
            )),
        }
    }
}

fn route_and_invoke(
    cx: &CallContext<'_>,
    target: &ObjectRef,
    method: &str,
    params: Params,
) -> CallOutcome {
    let (owner, member) = match method.rsplit_once('.') {
        Some((prefix, member)) => {
            let owner = resolve_path(cx, target, prefix).map_err(route_fault)?;
            let owner = owner.as_object().cloned().ok_or_else(|| {
                route_fault(Fault::attribute(format!("'{}' is not an object", prefix)))
            })?;
            (owner, member)
        }
        None => (target.clone(), method),
    };

    if member == ProtocolConfig::INTERFACE_METHOD {
        let descriptor = describe(&owner);
        return serde_json::to_value(descriptor)
            .map(Value::from)
            .map_err(|e| {
                (
                    RpcErrorKind::InternalError,
                    Fault::new("SerializationError", e.to_string()),
                )
            });
    }

    if !owner.object().has_method(member) {
        return Err((
            RpcErrorKind::MethodNotFound,
            Fault::attribute(format!(
                "'{}' object has no method '{}'",
                owner.class_name(),
                member
            )),
        ));
    }

    owner
        .object()
        .call(cx, member, params)
        .map_err(|fault| {
            if fault.is_attribute_error() {
                (RpcErrorKind::MethodNotFound, fault)
            } else {
                (RpcErrorKind::ApplicationError, fault)
            }
        })
}

/// Faults while walking the path: attribute faults are unresolved segments,
/// anything else came out of application getters.
fn route_fault(fault: Fault) -> (RpcErrorKind, Fault) {
    if fault.is_attribute_error() || fault.exception == Fault::NOT_FOUND {
        (RpcErrorKind::MethodNotFound, fault)
    } else {
        (RpcErrorKind::ApplicationError, fault)
    }
}

fn to_json(resp: &ResponseEnvelope) -> serde_json::Value {
    serde_json::to_value(resp).unwrap_or(serde_json::Value::Null)
}

fn encode(resp: &ResponseEnvelope) -> String {
    serde_json::to_string(resp).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Capabilities, Exposed};
    use serde_json::{json, Value as Json};
    use std::sync::OnceLock;

    struct Volatile;

    impl Exposed for Volatile {
        const CLASS: &'static str = "Volatile";

        fn capabilities() -> &'static Capabilities<Self> {
            static CAPS: OnceLock<Capabilities<Volatile>> = OnceLock::new();
            CAPS.get_or_init(|| {
                Capabilities::<Self>::builder()
                    .method("explode", &[], |_, _, _| panic!("volatile object exploded"))
                    .method("steady", &[], |_, _, _| Ok(Value::from("ok")))
                    .build()
            })
        }
    }

    fn setup() -> (Dispatcher, ObjectRef) {
        let registry = Arc::new(Registry::new());
        let target = registry.register(Arc::new(Volatile)).unwrap();
        (Dispatcher::new(registry), target)
    }

    fn send(dispatcher: &Dispatcher, target: &ObjectRef, body: Json) -> Json {
        let raw = dispatcher.handle(target, body.to_string().as_bytes());
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_panicking_method_becomes_internal_error() {
        let (dispatcher, target) = setup();
        let resp = send(
            &dispatcher,
            &target,
            json!({"jsonrpc": "2.0", "id": 1, "method": "explode", "params": []}),
        );
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["error"]["code"], RpcErrorKind::InternalError.code());
        assert_eq!(resp["error"]["data"]["exception"], "Panic");

        let resp = send(
            &dispatcher,
            &target,
            json!({"jsonrpc": "2.0", "id": 2, "method": "steady", "params": []}),
        );
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 2, "result": "ok"}));
    }

    #[test]
    fn test_panic_is_contained_to_its_batch_element() {
        let (dispatcher, target) = setup();
        let resp = send(
            &dispatcher,
            &target,
            json!([
                {"jsonrpc": "2.0", "id": 1, "method": "explode", "params": []},
                {"jsonrpc": "2.0", "id": 2, "method": "steady", "params": []}
            ]),
        );
        let items = resp.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["error"]["code"], -32603);
        assert_eq!(items[1]["result"], "ok");
    }
}
