//! Server configuration.

use savesync_core::CoreConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Default lifetime of an identity token.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the save server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Storage roots, lease lifetime and upload limits.
    pub core: CoreConfig,
    /// Secret key for identity tokens.
    pub auth_secret: Vec<u8>,
    /// Identity token lifetime.
    pub token_expiry: Duration,
    /// Whether new accounts may be registered.
    pub allow_register: bool,
}

impl ServerConfig {
    /// Creates a configuration with the given address and default settings.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            core: CoreConfig::default(),
            auth_secret: Vec::new(),
            token_expiry: DEFAULT_TOKEN_EXPIRY,
            allow_register: false,
        }
    }

    /// Sets the core configuration.
    pub fn with_core(mut self, core: CoreConfig) -> Self {
        self.core = core;
        self
    }

    /// Sets the secret used to sign identity tokens.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = secret;
        self
    }

    /// Sets the identity token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Enables or disables account registration.
    pub fn with_register(mut self, allow: bool) -> Self {
        self.allow_register = allow;
        self
    }

    /// Sets the largest accepted upload in bytes.
    pub fn with_max_upload_size(mut self, bytes: u64) -> Self {
        self.core = self.core.max_upload_size(bytes);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
