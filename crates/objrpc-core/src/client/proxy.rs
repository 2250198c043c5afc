//! Client proxy for one remote object.
//!
//! A proxy resolves member names against the object's interface descriptor
//! before anything goes on the wire: unknown names fail with
//! [`ClientError::NoSuchMember`], assignments to methods with
//! [`ClientError::ImmutableMember`]. Methods are invoked at the proxy's own
//! endpoint; attributes are read and written through `globals.getattr` and
//! `globals.setattr` at the base endpoint.

use super::batch::{Batch, Thunk};
use super::builder::ProxyBuilder;
use super::cache::ClientCache;
use super::resolver::{decode, Flavor, LazyRecord, Reply};
use super::transport::Transport;
use crate::config::ProtocolConfig;
use crate::error::{ClientError, RemoteException, Result, TransportError};
use crate::interface::InterfaceDescriptor;
use crate::protocol::{reference_token, RequestEnvelope, ResponseEnvelope};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// An empty argument list.
pub const NO_ARGS: [Arg; 0] = [];

/// Connection settings shared by a proxy and every proxy decoded through it.
pub(crate) struct Session {
    base: String,
    transport: Arc<dyn Transport>,
    cache: Arc<ClientCache>,
    flavor: Flavor,
}

impl Session {
    pub(crate) fn new(
        base: String,
        transport: Arc<dyn Transport>,
        cache: Arc<ClientCache>,
        flavor: Flavor,
    ) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            transport,
            cache,
            flavor,
        }
    }
}

/// Endpoint, id and (once fetched) interface of one remote object.
pub(crate) struct TargetState {
    endpoint: String,
    id: u64,
    interface: OnceLock<InterfaceDescriptor>,
}

/// An argument to a remote call.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    /// Result of an earlier call in the same batch.
    Thunk(Thunk),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Value(Value::from(s))
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Value(Value::from(s))
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Value(Value::from(b))
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<u64> for Arg {
    fn from(n: u64) -> Self {
        Arg::Value(Value::from(n))
    }
}

impl From<f64> for Arg {
    fn from(n: f64) -> Self {
        Arg::Value(json!(n))
    }
}

impl From<&Proxy> for Arg {
    fn from(proxy: &Proxy) -> Self {
        Arg::Value(Value::String(proxy.self_ref()))
    }
}

impl From<Proxy> for Arg {
    fn from(proxy: Proxy) -> Self {
        Arg::from(&proxy)
    }
}

impl From<&Reply> for Arg {
    fn from(reply: &Reply) -> Self {
        Arg::Value(reply.to_json())
    }
}

impl From<Reply> for Arg {
    fn from(reply: Reply) -> Self {
        Arg::from(&reply)
    }
}

impl From<LazyRecord> for Arg {
    fn from(record: LazyRecord) -> Self {
        Arg::Value(Value::Object(record.into_raw()))
    }
}

impl From<&Thunk> for Arg {
    fn from(thunk: &Thunk) -> Self {
        Arg::Thunk(thunk.clone())
    }
}

impl From<Thunk> for Arg {
    fn from(thunk: Thunk) -> Self {
        Arg::Thunk(thunk)
    }
}

/// A member looked up by name.
#[derive(Debug, Clone)]
pub enum Member {
    Method(Method),
    Value(Reply),
}

/// A remote method bound to its proxy.
#[derive(Debug, Clone)]
pub struct Method {
    proxy: Proxy,
    name: String,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call<I, A>(&self, args: I) -> Result<Reply>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.proxy.call(&self.name, args)
    }

    pub fn call_named<I, K, A>(&self, args: I) -> Result<Reply>
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<String>,
        A: Into<Arg>,
    {
        self.proxy.call_named(&self.name, args)
    }
}

/// Client-side stand-in for one remote object.
///
/// Cloning is cheap; clones share the connection settings and the interface.
#[derive(Clone)]
pub struct Proxy {
    session: Arc<Session>,
    target: Arc<TargetState>,
}

impl Proxy {
    pub fn builder(base_endpoint: impl Into<String>) -> ProxyBuilder {
        ProxyBuilder::new(base_endpoint)
    }

    /// Connect to the API root at `base_endpoint` with the process-wide cache.
    pub fn connect(
        base_endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Proxy> {
        ProxyBuilder::new(base_endpoint).transport(transport).connect()
    }

    /// Fetch the interface at `base/sub_path` and bind a proxy to it.
    pub(crate) fn open(session: Session, sub_path: Option<&str>) -> Result<Proxy> {
        let session = Arc::new(session);
        let endpoint = match sub_path.map(|s| s.trim_matches('/')) {
            Some(sub) if !sub.is_empty() => format!("{}/{}", session.base, sub),
            _ => session.base.clone(),
        };

        let raw = invoke_at(&session, &endpoint, ProtocolConfig::INTERFACE_METHOD, json!([]))?;
        let descriptor: InterfaceDescriptor = serde_json::from_value(raw)?;
        debug!(
            "Connected to {} ({} {})",
            endpoint,
            descriptor.name,
            descriptor.self_ref()
        );

        let target = TargetState {
            endpoint,
            id: descriptor.hash,
            interface: OnceLock::from(descriptor),
        };
        Ok(Proxy {
            session,
            target: Arc::new(target),
        })
    }

    /// Proxy for object `id` on the same server. Its interface is fetched on
    /// first use.
    pub(crate) fn child(&self, id: u64) -> Proxy {
        self.with_target(Arc::new(TargetState {
            endpoint: format!("{}/{}", self.session.base, id),
            id,
            interface: OnceLock::new(),
        }))
    }

    fn with_target(&self, target: Arc<TargetState>) -> Proxy {
        Proxy {
            session: self.session.clone(),
            target,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.target.endpoint
    }

    pub fn base_endpoint(&self) -> &str {
        &self.session.base
    }

    pub fn id(&self) -> u64 {
        self.target.id
    }

    /// `hash:<id>` of the remote object.
    pub fn self_ref(&self) -> String {
        reference_token(self.target.id)
    }

    pub fn flavor(&self) -> Flavor {
        self.session.flavor
    }

    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.session.cache
    }

    /// The interface descriptor, fetched on first access for decoded proxies.
    pub fn interface(&self) -> Result<&InterfaceDescriptor> {
        if let Some(descriptor) = self.target.interface.get() {
            return Ok(descriptor);
        }
        let raw = self.invoke(self.endpoint(), ProtocolConfig::INTERFACE_METHOD, json!([]))?;
        let descriptor: InterfaceDescriptor = serde_json::from_value(raw)?;
        Ok(self.target.interface.get_or_init(|| descriptor))
    }

    /// Every method and attribute name, sorted.
    pub fn member_names(&self) -> Result<Vec<String>> {
        Ok(self
            .interface()?
            .members()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    fn no_such_member(&self, name: &str) -> ClientError {
        ClientError::NoSuchMember {
            target: self.self_ref(),
            member: name.to_string(),
        }
    }

    pub(crate) fn expect_method(&self, name: &str) -> Result<()> {
        let interface = self.interface()?;
        if interface.has_func(name) {
            Ok(())
        } else if interface.has_attr(name) {
            Err(ClientError::MemberKind {
                target: self.self_ref(),
                member: name.to_string(),
                expected: "a method",
            })
        } else {
            Err(self.no_such_member(name))
        }
    }

    fn expect_attribute(&self, name: &str) -> Result<()> {
        let interface = self.interface()?;
        if interface.has_attr(name) {
            Ok(())
        } else if interface.has_func(name) {
            Err(ClientError::MemberKind {
                target: self.self_ref(),
                member: name.to_string(),
                expected: "an attribute",
            })
        } else {
            Err(self.no_such_member(name))
        }
    }

    pub(crate) fn marshal_value(&self, value: Value) -> Value {
        self.session.flavor.marshal(value)
    }

    fn marshal(&self, arg: Arg) -> Result<Value> {
        match arg {
            Arg::Value(value) => Ok(self.marshal_value(value)),
            Arg::Thunk(_) => Err(ClientError::ForeignThunk),
        }
    }

    /// Call method `name` with positional arguments.
    pub fn call<I, A>(&self, name: &str, args: I) -> Result<Reply>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.expect_method(name)?;
        let params = args
            .into_iter()
            .map(|arg| self.marshal(arg.into()))
            .collect::<Result<Vec<_>>>()?;
        let raw = self.invoke(self.endpoint(), name, Value::Array(params))?;
        Ok(decode(self, raw))
    }

    /// Call method `name` with named arguments.
    pub fn call_named<I, K, A>(&self, name: &str, args: I) -> Result<Reply>
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<String>,
        A: Into<Arg>,
    {
        self.expect_method(name)?;
        let params = args
            .into_iter()
            .map(|(key, arg)| -> Result<(String, Value)> {
                Ok((key.into(), self.marshal(arg.into())?))
            })
            .collect::<Result<Map<String, Value>>>()?;
        let raw = self.invoke(self.endpoint(), name, Value::Object(params))?;
        Ok(decode(self, raw))
    }

    pub fn method(&self, name: &str) -> Result<Method> {
        self.expect_method(name)?;
        Ok(Method {
            proxy: self.clone(),
            name: name.to_string(),
        })
    }

    /// Look up any member: methods come back bound, attributes are read.
    pub fn member(&self, name: &str) -> Result<Member> {
        if self.interface()?.has_func(name) {
            return self.method(name).map(Member::Method);
        }
        self.get(name).map(Member::Value)
    }

    /// Read attribute `name`.
    ///
    /// Attributes that resolve to remote objects are cached per
    /// `(selfRef, name)`; plain values are fetched on every read.
    pub fn get(&self, name: &str) -> Result<Reply> {
        self.expect_attribute(name)?;
        let self_ref = self.self_ref();
        if let Some(target) = self.cache().attr(self.base_endpoint(), &self_ref, name) {
            return Ok(Reply::Proxy(self.with_target(target)));
        }

        let raw = self.invoke(
            self.base_endpoint(),
            ProtocolConfig::GLOBALS_GETATTR,
            json!([self_ref, name]),
        )?;
        let reply = decode(self, raw);
        if let Reply::Proxy(proxy) = &reply {
            self.cache()
                .store_attr(self.base_endpoint(), &self_ref, name, proxy.target.clone());
        }
        Ok(reply)
    }

    /// Assign attribute `name`, which may be a dotted path whose first
    /// segment is one of this object's attributes.
    pub fn set(&self, name: &str, value: impl Into<Arg>) -> Result<()> {
        let head = name.split('.').next().unwrap_or(name);
        let interface = self.interface()?;
        if interface.has_func(head) {
            return Err(ClientError::ImmutableMember {
                target: self.self_ref(),
                member: name.to_string(),
            });
        }
        if !interface.has_attr(head) {
            return Err(self.no_such_member(name));
        }

        let value = self.marshal(value.into())?;
        let self_ref = self.self_ref();
        self.invoke(
            self.base_endpoint(),
            ProtocolConfig::GLOBALS_SETATTR,
            json!([self_ref, name, value]),
        )?;
        self.invalidate_after_set(name);
        Ok(())
    }

    /// Drop the cache entry a successful `set` of `name` made stale.
    ///
    /// A dotted name is cached under the object its prefix resolves to. When
    /// that object cannot be determined, every attribute cached for this
    /// base endpoint is dropped instead.
    fn invalidate_after_set(&self, name: &str) {
        let base = self.base_endpoint();
        let Some((prefix, leaf)) = name.rsplit_once('.') else {
            self.cache().invalidate_attr(base, &self.self_ref(), name);
            return;
        };
        match self.resolve_attr_path(prefix) {
            Ok(Some(owner)) => self.cache().invalidate_attr(base, &owner.self_ref(), leaf),
            Ok(None) => {
                debug!(
                    "{} of {} is not an object, flushing attribute cache",
                    prefix,
                    self.self_ref()
                );
                self.cache().flush_base(base);
            }
            Err(e) => {
                debug!(
                    "Could not resolve {} on {}: {}, flushing attribute cache",
                    prefix,
                    self.self_ref(),
                    e
                );
                self.cache().flush_base(base);
            }
        }
    }

    /// Follow a dotted attribute path through object-valued attributes.
    fn resolve_attr_path(&self, path: &str) -> Result<Option<Proxy>> {
        let mut current = self.clone();
        for segment in path.split('.') {
            match current.get(segment)? {
                Reply::Proxy(next) => current = next,
                _ => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Forget every cached attribute of this object. Returns the number of
    /// dropped entries.
    pub fn flush_cache(&self) -> usize {
        self.cache()
            .flush_object(self.base_endpoint(), &self.self_ref())
    }

    /// Start a batch of calls against this proxy's endpoint.
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Run `body` against a fresh batch and commit it if `body` succeeds.
    ///
    /// When `body` fails, nothing queued in the batch is sent. Calls already
    /// forced as dependencies have run and are not undone.
    pub fn with_batch<T, F>(&self, body: F) -> Result<(T, Batch)>
    where
        F: FnOnce(&mut Batch) -> Result<T>,
    {
        let mut batch = self.batch();
        let value = body(&mut batch)?;
        batch.commit()?;
        Ok((value, batch))
    }

    /// Resolve an auxiliary reference through `api.database.get`, at most
    /// once per `(name, items)` per cache.
    pub(crate) fn lookup_auxiliary(&self, name: &str, items: &Value) -> Result<Value> {
        let base = self.base_endpoint();
        if let Some(hit) = self.cache().aux(base, name, items) {
            return Ok(hit);
        }

        debug!("Resolving sqlref {} {}", name, items);
        let raw = self.invoke(base, ProtocolConfig::AUXILIARY_LOOKUP_METHOD, json!([name, items]))?;
        let value = match raw {
            Value::Array(mut records) if records.len() == 1 => records.remove(0),
            other => other,
        };
        Ok(self.cache().store_aux(base, name, items, value))
    }

    fn invoke(&self, endpoint: &str, method: &str, params: Value) -> Result<Value> {
        invoke_at(&self.session, endpoint, method, params)
    }

    /// Send one request to this proxy's endpoint, decoding its outcome.
    pub(crate) fn send_one(
        &self,
        request: &RequestEnvelope,
    ) -> Result<std::result::Result<Reply, RemoteException>> {
        let response: ResponseEnvelope =
            exchange(&self.session, self.endpoint(), request)?;
        Ok(response.into_result().map(|raw| decode(self, raw)))
    }

    /// Send several requests as one JSON-RPC batch to this proxy's endpoint.
    pub(crate) fn send_batch(
        &self,
        requests: &[&RequestEnvelope],
    ) -> Result<Vec<ResponseEnvelope>> {
        let body: Value = exchange(&self.session, self.endpoint(), &requests)?;
        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(ClientError::from))
                .collect(),
            single => {
                let response: ResponseEnvelope = serde_json::from_value(single)?;
                response.into_result()?;
                Err(ClientError::Protocol(
                    "expected a batch response, got a single envelope".to_string(),
                ))
            }
        }
    }
}

fn invoke_at(session: &Session, endpoint: &str, method: &str, params: Value) -> Result<Value> {
    let request = RequestEnvelope::new(method, params);
    let response: ResponseEnvelope = exchange(session, endpoint, &request)?;
    Ok(response.into_result()?)
}

/// Post `payload` and parse the response body as `R`.
///
/// A body that is not JSON at all is a transport failure; JSON of the wrong
/// shape is a protocol error.
fn exchange<P, R>(session: &Session, endpoint: &str, payload: &P) -> Result<R>
where
    P: serde::Serialize + ?Sized,
    R: serde::de::DeserializeOwned,
{
    let body = serde_json::to_string(payload)?;
    debug!("POST {} ({} bytes)", endpoint, body.len());
    let text = session.transport.post(endpoint, &body)?;
    let json: Value = serde_json::from_str(&text).map_err(TransportError::MalformedBody)?;
    serde_json::from_value(json)
        .map_err(|e| ClientError::Protocol(format!("unexpected response from {}: {}", endpoint, e)))
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.session.base == other.session.base && self.target.id == other.target.id
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Proxy {} {}>", self.target.endpoint, self.self_ref())
    }
}
