//! Turning the `[tls]` section into a registry.

use std::time::Duration;

use crate::config::schema::TlsConfig;
use crate::error::Result;
use crate::tls::configuration::TlsConfiguration;
use crate::tls::pem::load_pem_pair;
use crate::tls::registry::TlsRegistry;

fn configuration(
    tls: &TlsConfig,
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> Result<TlsConfiguration> {
    let (chain, key) = load_pem_pair(cert_path, key_path)?;
    let mut builder = TlsConfiguration::builder(chain, key)
        .cipher_suites(tls.cipher_suites.iter().cloned())
        .protocol_versions(&tls.protocol_versions)
        .flavor(tls.flavor)
        .handshake_timeout(Duration::from_millis(tls.handshake_timeout_ms));
    if let Some(alpn) = &tls.alpn {
        builder = builder.alpn_protocols(alpn.iter().map(|p| p.as_bytes().to_vec()).collect());
    }
    builder.build()
}

/// Load every certificate named by `tls` and freeze them into a registry.
///
/// Each SNI entry shares the cipher, version, ALPN and timeout settings of
/// the default configuration.
pub fn build_registry(tls: &TlsConfig) -> Result<TlsRegistry> {
    let mut builder = TlsRegistry::builder();
    builder.set_default(configuration(tls, &tls.cert_path, &tls.key_path)?);
    for entry in &tls.sni {
        builder.add(
            &entry.domain,
            configuration(tls, &entry.cert_path, &entry.key_path)?,
        )?;
    }
    let registry = builder.build()?;
    tracing::info!(
        domains = registry.len(),
        flavor = ?tls.flavor,
        "TLS registry built"
    );
    Ok(registry)
}
