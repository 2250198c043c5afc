//! Centralized configuration for objrpc.
//!
//! Protocol constants shared by the dispatcher and the client, plus the
//! defaults used by the HTTP binding.

use std::time::Duration;

/// Wire protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Prefix of the wire token that stands in for a registered live object.
    pub const REFERENCE_PREFIX: &'static str = "hash:";
    /// Pseudo-method returning the interface descriptor of the target.
    pub const INTERFACE_METHOD: &'static str = "__interface__";
    /// Key marking an embedded auxiliary reference.
    pub const SQLREF_KEY: &'static str = "sqlref";
    /// Key carrying `{name, id}` on records that may be sent as auxiliary references.
    pub const META_KEY: &'static str = "__meta__";
    /// Remote method that materializes auxiliary references.
    pub const AUXILIARY_LOOKUP_METHOD: &'static str = "api.database.get";
    pub const GLOBALS_GETATTR: &'static str = "globals.getattr";
    pub const GLOBALS_SETATTR: &'static str = "globals.setattr";
}

/// Client defaults.
pub struct ClientConfig;

impl ClientConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "objrpc/0.3";
}

/// HTTP binding defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_BASE_PATH: &'static str = "/api";
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    /// Largest request body accepted by the HTTP binding (bytes).
    pub const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;
}
