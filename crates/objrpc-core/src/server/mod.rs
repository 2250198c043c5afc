//! Server side: registry, introspection, dispatcher and the API root.
//!
//! [`Server::handle`] is the whole contract with a transport: a raw request
//! body in, a raw JSON response body out.

mod dispatch;
mod globals;
mod introspect;
mod object;
mod registry;
mod value;

pub use dispatch::Dispatcher;
pub use globals::{ApiRoot, Globals};
pub use introspect::describe;
pub use object::{
    Args, CallContext, Capabilities, CapabilitiesBuilder, Exposed, Params, RemoteObject,
};
pub use registry::{EvictionPolicy, ObjectRef, Registry, RetainAll};
pub use value::{Value, WireRepr};

use crate::error::{Fault, RegistryError, RpcErrorKind};
use crate::protocol::ResponseEnvelope;
use std::sync::Arc;
use tracing::warn;

/// Object a request is dispatched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The API root (base endpoint).
    Root,
    /// A registered object selected by id (sub-path).
    Object(u64),
}

impl Target {
    /// Parse the optional sub-path of an endpoint (`/api/<objid>`).
    pub fn parse(sub_path: Option<&str>) -> Result<Self, Fault> {
        match sub_path.map(|s| s.trim_matches('/')) {
            None | Some("") => Ok(Target::Root),
            Some(raw) => raw
                .parse()
                .map(Target::Object)
                .map_err(|_| Fault::value_error(format!("'{}' is not an object id", raw))),
        }
    }
}

/// Registry, API root and dispatcher bundled together.
pub struct Server {
    registry: Arc<Registry>,
    root: ObjectRef,
    api: ObjectRef,
    dispatcher: Dispatcher,
}

impl Server {
    /// Expose `api` under a fresh registry.
    pub fn new<T: Exposed>(api: Arc<T>) -> Result<Self, RegistryError> {
        Self::with_registry(Arc::new(Registry::new()), api)
    }

    /// Expose `api` under an existing registry.
    pub fn with_registry<T: Exposed>(
        registry: Arc<Registry>,
        api: Arc<T>,
    ) -> Result<Self, RegistryError> {
        let api = registry.register(api)?;
        let globals = registry.register(Arc::new(Globals))?;
        let root = registry.register(Arc::new(ApiRoot::new(api.clone(), globals)))?;
        Ok(Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            root,
            api,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn root(&self) -> &ObjectRef {
        &self.root
    }

    pub fn api(&self) -> &ObjectRef {
        &self.api
    }

    pub fn resolve(&self, target: Target) -> Result<ObjectRef, RegistryError> {
        match target {
            Target::Root => Ok(self.root.clone()),
            Target::Object(id) => self.registry.lookup(id),
        }
    }

    /// Dispatch a raw body against `target` and return the raw response body.
    pub fn handle(&self, target: Target, body: &[u8]) -> String {
        match self.resolve(target) {
            Ok(obj) => self.dispatcher.handle(&obj, body),
            Err(e) => {
                warn!("Request for unknown target {:?}: {}", target, e);
                unknown_target(Fault::from(e))
            }
        }
    }

    /// Dispatch using the sub-path of the delivery route.
    pub fn handle_path(&self, sub_path: Option<&str>, body: &[u8]) -> String {
        match Target::parse(sub_path) {
            Ok(target) => self.handle(target, body),
            Err(fault) => unknown_target(fault),
        }
    }
}

fn unknown_target(fault: Fault) -> String {
    let resp = ResponseEnvelope::error(
        None,
        RpcErrorKind::InvalidRequest,
        fault.exception,
        fault.message,
    );
    serde_json::to_string(&resp).unwrap_or_default()
}
