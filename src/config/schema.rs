//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::address::AddressOptions;
use crate::observability::logging::LogFormat;
use crate::tls::configuration::{DefaultFlavor, TlsVersion};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind target, limits).
    pub listener: ListenerConfig,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host to bind; defaults to all interfaces when only a port is given.
    pub host: Option<String>,

    /// Port to bind; 0 picks an ephemeral port.
    pub port: Option<u16>,

    /// Filesystem socket path. Mutually exclusive with host/port.
    pub unix_path: Option<PathBuf>,

    /// Use the native transport (required for filesystem sockets).
    pub native_transport: bool,

    /// Bind timeout in milliseconds.
    pub bind_timeout_ms: u64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn address_options(&self) -> AddressOptions {
        AddressOptions {
            host: self.host.clone(),
            port: self.port,
            unix_path: self.unix_path.clone(),
        }
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            unix_path: None,
            native_transport: true,
            bind_timeout_ms: 5_000,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to the default certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Path to the default private key (PEM).
    pub key_path: PathBuf,

    /// IANA cipher suite names; empty means provider defaults.
    #[serde(default)]
    pub cipher_suites: Vec<String>,

    /// Allowed protocol versions ("1.2", "1.3"); empty means both.
    #[serde(default)]
    pub protocol_versions: Vec<TlsVersion>,

    /// Explicit ALPN list; overrides the flavor's defaults.
    #[serde(default)]
    pub alpn: Option<Vec<String>>,

    /// Flavor applied to every configuration.
    #[serde(default)]
    pub flavor: DefaultFlavor,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Per-domain overrides, matched by SNI.
    #[serde(default)]
    pub sni: Vec<SniEntry>,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

/// Certificate override for one domain pattern (`host` or `*.parent`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SniEntry {
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Track live connections so shutdown can drain them.
    pub track_connections: bool,

    /// How long shutdown waits for live connections, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            track_connections: true,
            drain_timeout_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Log all connection traffic at trace level.
    pub wiretap: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            wiretap: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.listener.native_transport);
        assert!(config.tls.is_none());
    }

    #[test]
    fn full_document() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            host = "127.0.0.1"
            port = 8443
            max_connections = 64

            [tls]
            cert_path = "certs/default.pem"
            key_path = "certs/default.key"
            protocol_versions = ["1.3"]
            flavor = "h2"

            [[tls.sni]]
            domain = "*.test.com"
            cert_path = "certs/test.pem"
            key_path = "certs/test.key"

            [shutdown]
            drain_timeout_ms = 1500

            [observability]
            log_format = "json"
            wiretap = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, Some(8443));
        let tls = config.tls.unwrap();
        assert_eq!(tls.protocol_versions, vec![TlsVersion::Tls13]);
        assert_eq!(tls.flavor, DefaultFlavor::H2);
        assert_eq!(tls.handshake_timeout_ms, 10_000);
        assert_eq!(tls.sni[0].domain, "*.test.com");
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_millis(1500));
        assert!(config.shutdown.track_connections);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
