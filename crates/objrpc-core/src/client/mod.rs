//! Client side: proxies, batches, reference resolution and transports.
//!
//! The client is synchronous. Every remote operation blocks the calling
//! thread until the transport returns.

mod batch;
mod builder;
mod cache;
mod proxy;
mod resolver;
mod transport;

pub use batch::{Batch, Peek, Thunk};
pub use builder::ProxyBuilder;
pub use cache::ClientCache;
pub use proxy::{Arg, Member, Method, Proxy, NO_ARGS};
pub use resolver::{Flavor, LazyRecord, Reply};
pub use transport::{HttpTransport, Loopback, Transport};
