//! objrpc - JSON-RPC 2.0 with remote object references.
//!
//! A server exposes live objects under stable ids. Objects cross the wire as
//! `hash:<id>` strings in ordinary params and results, and clients reach them
//! through proxies resolved against each object's interface descriptor.
//!
//! - [`server`]: registry, capability-described objects, dispatcher, `globals`
//! - [`client`]: proxies, deferred batches, `sqlref` resolution, transports
//!
//! # Example
//!
//! ```rust
//! use objrpc::demo::DemoApi;
//! use objrpc::{ClientCache, Loopback, ProxyBuilder, Registry, Server};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(Registry::new());
//! let server = Server::with_registry(registry.clone(), DemoApi::new(&registry)?)?;
//! let transport = Loopback::new("mem://api", Arc::new(server));
//!
//! let root = ProxyBuilder::new("mem://api")
//!     .transport(Arc::new(transport))
//!     .cache(Arc::new(ClientCache::new()))
//!     .connect()?;
//! let api = root.get("api")?.into_proxy().ok_or("api is not an object")?;
//! let sum = api.call("add", [40, 2])?;
//! assert_eq!(sum.as_i64(), Some(42));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod interface;
pub mod protocol;
pub mod server;

pub use client::{
    Arg, Batch, ClientCache, Flavor, HttpTransport, LazyRecord, Loopback, Member, Method, Peek,
    Proxy, ProxyBuilder, Reply, Thunk, Transport, NO_ARGS,
};
pub use config::{ClientConfig, ProtocolConfig, ServerConfig};
pub use error::{
    ClientError, Fault, RegistryError, RemoteException, Result, RpcErrorKind, TransportError,
};
pub use interface::InterfaceDescriptor;
pub use server::{
    CallContext, Capabilities, Exposed, ObjectRef, Registry, RemoteObject, Server, Target, Value,
};
