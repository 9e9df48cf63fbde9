//! Configuration for the token server.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// OAuth protocol constants.
pub mod oauth {
    use std::time::Duration;

    /// Token endpoint path.
    pub const TOKEN_PATH: &str = "/oauth2/token";

    /// Access token lifetime (1 hour).
    pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

    /// Length of generated access token strings.
    pub const TOKEN_LENGTH: usize = 8;

    /// Token type reported in successful responses.
    pub const TOKEN_TYPE: &str = "bearer";
}

/// Defaults used when nothing is configured.
pub mod defaults {
    /// Listen address.
    pub const ADDRESS: &str = "127.0.0.1:8443";

    /// Database file.
    pub const DATABASE: &str = "oauth.redb";
}

/// Transport security settings.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Wrap the listener in TLS.
    pub enabled: bool,

    /// PEM certificate chain.
    pub certificate_file: Option<PathBuf>,

    /// PEM private key matching the certificate.
    pub key_file: Option<PathBuf>,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, `host:port`.
    pub address: String,

    /// Transport security.
    pub tls: TlsConfig,
}

/// Identity store settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// redb database file holding the client, user and token tables.
    pub path: PathBuf,
}

/// Server configuration. Loaded once at start and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,

    /// Identity store settings.
    pub database: DatabaseConfig,

    /// Lifetime of issued access tokens.
    pub token_lifetime: Duration,
}

impl Config {
    /// Create a configuration for a plain (non-TLS) listener.
    #[must_use]
    pub fn new(address: impl Into<String>, database: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig { address: address.into(), tls: TlsConfig::default() },
            database: DatabaseConfig { path: database.into() },
            token_lifetime: oauth::ACCESS_TOKEN_LIFETIME,
        }
    }

    /// Enable TLS with the given certificate and key files.
    #[must_use]
    pub fn with_tls(mut self, certificate_file: Option<PathBuf>, key_file: Option<PathBuf>) -> Self {
        self.server.tls = TlsConfig { enabled: true, certificate_file, key_file };
        self
    }

    /// Create a test configuration bound to an ephemeral localhost port.
    #[must_use]
    pub fn for_testing(database: &Path) -> Self {
        Self::new("127.0.0.1:0", database)
    }

    /// Check if TLS is enabled.
    #[must_use]
    pub const fn tls_enabled(&self) -> bool {
        self.server.tls.enabled
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(defaults::ADDRESS, defaults::DATABASE)
    }
}
