//! A single TLS configuration: certificate material plus handshake policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::ring::{cipher_suite, default_provider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Handshake timeout applied when none is configured.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol flavor a configuration is tuned for.
///
/// The flavor only drives the default ALPN list; an explicit ALPN list
/// always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultFlavor {
    #[default]
    None,
    Tcp,
    Http11,
    H2,
}

impl DefaultFlavor {
    /// ALPN protocols advertised for this flavor.
    pub fn alpn_protocols(self) -> Vec<Vec<u8>> {
        match self {
            DefaultFlavor::None | DefaultFlavor::Tcp => Vec::new(),
            DefaultFlavor::Http11 => vec![b"http/1.1".to_vec()],
            DefaultFlavor::H2 => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        }
    }
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

/// Details of a completed handshake, as seen from either side.
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    /// Server name requested through SNI, if any.
    pub hostname: Option<String>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub protocol_version: Option<String>,
    pub cipher_suite: Option<String>,
    /// Certificates presented by the peer (populated on the client side).
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

/// Callback run once a handshake using this configuration completes.
pub type HandshakeHook = Arc<dyn Fn(&HandshakeInfo) + Send + Sync>;

/// An immutable, cheaply clonable TLS configuration.
#[derive(Clone)]
pub struct TlsConfiguration {
    server_config: Arc<ServerConfig>,
    certificate: CertificateDer<'static>,
    flavor: DefaultFlavor,
    explicit_alpn: bool,
    handshake_timeout: Duration,
    on_handshake: Option<HandshakeHook>,
}

impl TlsConfiguration {
    /// Start building a configuration from a certificate chain (leaf first) and its key.
    pub fn builder(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> TlsConfigurationBuilder {
        TlsConfigurationBuilder {
            cert_chain,
            key,
            cipher_suites: Vec::new(),
            versions: Vec::new(),
            alpn: None,
            flavor: DefaultFlavor::None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            on_handshake: None,
        }
    }

    /// The rustls configuration installed into the handshake engine.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }

    /// Leaf certificate presented to clients.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    pub fn flavor(&self) -> DefaultFlavor {
        self.flavor
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Run the handshake-completion hook, if one is set.
    pub fn notify_handshake(&self, info: &HandshakeInfo) {
        if let Some(hook) = &self.on_handshake {
            hook(info);
        }
    }

    /// Copy of this configuration re-tagged with `flavor`.
    ///
    /// The rustls config is copied rather than shared so the original keeps
    /// its ALPN list.
    pub fn with_flavor(&self, flavor: DefaultFlavor) -> Self {
        let mut server_config = (*self.server_config).clone();
        if !self.explicit_alpn {
            server_config.alpn_protocols = flavor.alpn_protocols();
        }
        Self {
            server_config: Arc::new(server_config),
            certificate: self.certificate.clone(),
            flavor,
            explicit_alpn: self.explicit_alpn,
            handshake_timeout: self.handshake_timeout,
            on_handshake: self.on_handshake.clone(),
        }
    }
}

impl fmt::Debug for TlsConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfiguration")
            .field("flavor", &self.flavor)
            .field("alpn", &self.server_config.alpn_protocols)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("on_handshake", &self.on_handshake.is_some())
            .finish()
    }
}

/// Accumulates the inputs of a [`TlsConfiguration`].
pub struct TlsConfigurationBuilder {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    cipher_suites: Vec<String>,
    versions: Vec<TlsVersion>,
    alpn: Option<Vec<Vec<u8>>>,
    flavor: DefaultFlavor,
    handshake_timeout: Duration,
    on_handshake: Option<HandshakeHook>,
}

impl TlsConfigurationBuilder {
    /// Restrict the cipher suites by IANA name. Empty means provider defaults.
    pub fn cipher_suites<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cipher_suites = names.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the protocol versions. Empty means TLS 1.2 and 1.3.
    pub fn protocol_versions(mut self, versions: &[TlsVersion]) -> Self {
        self.versions = versions.to_vec();
        self
    }

    /// Explicit ALPN list, overriding whatever the flavor implies.
    pub fn alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn = Some(protocols);
        self
    }

    pub fn flavor(mut self, flavor: DefaultFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn on_handshake<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandshakeInfo) + Send + Sync + 'static,
    {
        self.on_handshake = Some(Arc::new(hook));
        self
    }

    /// Validate the inputs and build the rustls server config.
    pub fn build(self) -> Result<TlsConfiguration> {
        let certificate = self
            .cert_chain
            .first()
            .cloned()
            .ok_or_else(|| Error::config("certificate chain is empty"))?;

        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake timeout must be greater than zero"));
        }

        let mut provider = default_provider();
        if !self.cipher_suites.is_empty() {
            provider.cipher_suites = resolve_cipher_suites(&self.cipher_suites)?;
        }

        let versions = resolve_protocol_versions(&self.versions);
        let mut server_config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&versions)
            .map_err(|e| Error::config(format!("invalid protocol/cipher combination: {e}")))?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain, self.key)
            .map_err(|e| Error::config(format!("invalid certificate or key: {e}")))?;

        let explicit_alpn = self.alpn.is_some();
        server_config.alpn_protocols = self
            .alpn
            .unwrap_or_else(|| self.flavor.alpn_protocols());

        Ok(TlsConfiguration {
            server_config: Arc::new(server_config),
            certificate,
            flavor: self.flavor,
            explicit_alpn,
            handshake_timeout: self.handshake_timeout,
            on_handshake: self.on_handshake,
        })
    }
}

fn resolve_protocol_versions(versions: &[TlsVersion]) -> Vec<&'static SupportedProtocolVersion> {
    if versions.is_empty() {
        return vec![&rustls::version::TLS13, &rustls::version::TLS12];
    }
    versions
        .iter()
        .map(|v| match v {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        })
        .collect()
}

/// Map IANA cipher suite names onto the ring provider's suites.
pub(crate) fn resolve_cipher_suites(names: &[String]) -> Result<Vec<SupportedCipherSuite>> {
    let known: &[(&str, SupportedCipherSuite)] = &[
        ("TLS_AES_256_GCM_SHA384", cipher_suite::TLS13_AES_256_GCM_SHA384),
        ("TLS_AES_128_GCM_SHA256", cipher_suite::TLS13_AES_128_GCM_SHA256),
        ("TLS_CHACHA20_POLY1305_SHA256", cipher_suite::TLS13_CHACHA20_POLY1305_SHA256),
        (
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        ),
        (
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        ),
        (
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
            cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        ),
        (
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        ),
        (
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ),
        (
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
            cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        ),
    ];

    names
        .iter()
        .map(|name| {
            let normalized = name.trim().to_uppercase().replace('-', "_");
            known
                .iter()
                .find(|(n, _)| *n == normalized)
                .map(|(_, suite)| *suite)
                .ok_or_else(|| Error::config(format!("unknown cipher suite '{name}'")))
        })
        .collect()
}
