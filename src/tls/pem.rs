//! Certificate and key loading from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use crate::error::{Error, Result};

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    // Basic validation
    if !path.exists() {
        return Err(Error::config(format!(
            "{what} file not found: {}",
            path.display()
        )));
    }
    let file = File::open(path)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
    Ok(BufReader::new(file))
}

/// Load a certificate chain (leaf first).
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "Certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::config(format!(
            "{}: no certificates found in file",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1).
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path, "Private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?
        .ok_or_else(|| {
            Error::config(format!("{}: no private key found in file", path.display()))
        })
}

/// Load a certificate chain together with its key.
pub fn load_pem_pair(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;
    tracing::debug!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        chain_len = certs.len(),
        "Loaded certificate and key"
    );
    Ok((certs, key))
}

/// Load trust anchors for verifying a server.
pub fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots
            .add(cert)
            .map_err(|e| Error::config(format!("invalid CA certificate: {e}")))?;
    }
    Ok(roots)
}
