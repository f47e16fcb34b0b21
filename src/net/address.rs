//! Bind/connect targets and endpoint identities.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One side of a connection, or a bound listener address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Inet(SocketAddr),
    /// Filesystem socket; unnamed peers have no path.
    Unix(Option<PathBuf>),
}

impl Endpoint {
    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Inet(addr) => Some(*addr),
            Endpoint::Unix(_) => None,
        }
    }

    /// Port of an inet endpoint, 0 otherwise.
    pub fn port(&self) -> u16 {
        self.as_inet().map(|a| a.port()).unwrap_or(0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet(addr) => write!(f, "{addr}"),
            Endpoint::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Endpoint::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Inet(addr)
    }
}

/// A resolved target to bind to or connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    Inet { host: String, port: u16 },
    Unix(PathBuf),
}

impl BindTarget {
    pub fn inet(host: impl Into<String>, port: u16) -> Self {
        BindTarget::Inet {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        BindTarget::Unix(path.as_ref().to_path_buf())
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // bracket bare IPv6 hosts
            BindTarget::Inet { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            BindTarget::Inet { host, port } => write!(f, "{host}:{port}"),
            BindTarget::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl From<&Endpoint> for BindTarget {
    fn from(endpoint: &Endpoint) -> Self {
        match endpoint {
            Endpoint::Inet(addr) => BindTarget::inet(addr.ip().to_string(), addr.port()),
            Endpoint::Unix(Some(path)) => BindTarget::Unix(path.clone()),
            Endpoint::Unix(None) => BindTarget::Unix(PathBuf::new()),
        }
    }
}

/// Address settings as a user supplies them, before validation.
///
/// Host/port and a filesystem socket are mutually exclusive. Mixing them is
/// rejected by [`AddressOptions::target`] before anything touches the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix_path: Option<PathBuf>,
}

impl AddressOptions {
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";

    pub fn target(&self) -> Result<BindTarget> {
        match &self.unix_path {
            Some(path) => {
                if self.host.is_some() {
                    return Err(Error::config(format!(
                        "domain socket {} cannot be combined with a host",
                        path.display()
                    )));
                }
                if self.port.is_some() {
                    return Err(Error::config(format!(
                        "domain socket {} cannot be combined with a port",
                        path.display()
                    )));
                }
                if path.as_os_str().is_empty() {
                    return Err(Error::config("domain socket path must not be empty"));
                }
                Ok(BindTarget::Unix(path.clone()))
            }
            None => Ok(BindTarget::Inet {
                host: self
                    .host
                    .clone()
                    .unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
                port: self.port.unwrap_or(0),
            }),
        }
    }
}
