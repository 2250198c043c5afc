//! Builder for connecting a [`Proxy`].

use super::cache::ClientCache;
use super::proxy::{Proxy, Session};
use super::resolver::Flavor;
use super::transport::{HttpTransport, Transport};
use crate::error::Result;
use std::sync::Arc;

/// Builder for [`Proxy`] connections.
///
/// # Example
///
/// ```rust,no_run
/// use objrpc::ProxyBuilder;
///
/// # fn main() -> objrpc::Result<()> {
/// let api = ProxyBuilder::new("http://127.0.0.1:8000/api")
///     .resolve_sqlrefs(true)
///     .connect()?;
/// let counter = api.get("api")?;
/// # Ok(())
/// # }
/// ```
pub struct ProxyBuilder {
    base: String,
    sub_path: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<ClientCache>>,
    flavor: Flavor,
}

impl ProxyBuilder {
    /// Create a builder for the delivery route at `base_endpoint`.
    pub fn new(base_endpoint: impl Into<String>) -> Self {
        Self {
            base: base_endpoint.into(),
            sub_path: None,
            transport: None,
            cache: None,
            flavor: Flavor::Plain,
        }
    }

    /// Connect to the object at `base/<sub_path>` instead of the API root.
    pub fn sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    /// Connect to registered object `id`.
    pub fn object(self, id: u64) -> Self {
        self.sub_path(id.to_string())
    }

    /// Transport to send requests through.
    ///
    /// Default: a new [`HttpTransport`] with its own cookie session.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Cache store to share.
    ///
    /// Default: [`ClientCache::global`].
    pub fn cache(mut self, cache: Arc<ClientCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve embedded `sqlref` values and send `__meta__` records by
    /// reference.
    ///
    /// Default: `false`
    pub fn resolve_sqlrefs(mut self, enable: bool) -> Self {
        self.flavor = if enable { Flavor::SqlRef } else { Flavor::Plain };
        self
    }

    /// Fetch the interface and build the proxy.
    pub fn connect(self) -> Result<Proxy> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let cache = self.cache.unwrap_or_else(ClientCache::global);
        let session = Session::new(self.base, transport, cache, self.flavor);
        Proxy::open(session, self.sub_path.as_deref())
    }
}
