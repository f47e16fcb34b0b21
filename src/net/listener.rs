//! Listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to a host/port or a filesystem socket
//! - Accept incoming connections as boxed byte streams
//! - Enforce max_connections limit via semaphore
//! - Remove the socket file once a filesystem listener is released

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::net::address::{BindTarget, Endpoint};
use crate::net::connection::BoxedStream;

/// Which socket implementation a server or client runs on.
///
/// Filesystem sockets are only available on the native transport of a unix
/// platform; the portable transport is inet-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Native,
    Portable,
}

impl Transport {
    pub fn from_native(prefer_native: bool) -> Self {
        if prefer_native {
            Transport::Native
        } else {
            Transport::Portable
        }
    }

    pub fn supports_domain_sockets(self) -> bool {
        cfg!(unix) && self == Transport::Native
    }
}

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
}

/// A bound listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    inner: Inner,
    local: Endpoint,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind `target`. Fails with `Error::Bind` if the address is unavailable
    /// or the transport cannot serve it.
    pub async fn bind(target: &BindTarget, transport: Transport, max_connections: usize) -> Result<Self> {
        let bind_error = |source: io::Error| Error::Bind {
            target: target.to_string(),
            source,
        };

        let (inner, local) = match target {
            BindTarget::Inet { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .await
                    .map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                (Inner::Tcp(listener), Endpoint::Inet(local))
            }
            BindTarget::Unix(path) => {
                if !transport.supports_domain_sockets() {
                    return Err(bind_error(io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("{transport:?} transport does not support domain sockets"),
                    )));
                }
                Self::bind_unix(path).map_err(bind_error)?
            }
        };

        tracing::info!(
            address = %local,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    #[cfg(unix)]
    fn bind_unix(path: &std::path::Path) -> io::Result<(Inner, Endpoint)> {
        let listener = tokio::net::UnixListener::bind(path)?;
        Ok((
            Inner::Unix {
                listener,
                path: path.to_path_buf(),
            },
            Endpoint::Unix(Some(path.to_path_buf())),
        ))
    }

    #[cfg(not(unix))]
    fn bind_unix(_path: &std::path::Path) -> io::Result<(Inner, Endpoint)> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "domain sockets are not available on this platform",
        ))
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(BoxedStream, Endpoint, ConnectionPermit)> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "connection limit closed"))?;

        let (stream, peer): (BoxedStream, Endpoint) = match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                configure_tcp(&stream);
                (Box::new(stream), Endpoint::Inet(addr))
            }
            #[cfg(unix)]
            Inner::Unix { listener, .. } => {
                let (stream, addr) = listener.accept().await?;
                let peer = Endpoint::Unix(addr.as_pathname().map(|p| p.to_path_buf()));
                (Box::new(stream), peer)
            }
        };

        tracing::debug!(
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Inner::Unix { path, .. } = &self.inner {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
        tracing::debug!(address = %self.local, "Listener released");
    }
}

pub(crate) fn configure_tcp(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }
}

/// Resolve an inet target to the first matching socket address.
pub(crate) async fn resolve_inet(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address for {host}")))
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let listener = Listener::bind(&BindTarget::inet("127.0.0.1", 0), Transport::Native, 4)
            .await
            .unwrap();
        assert_ne!(listener.local_endpoint().port(), 0);
        assert_eq!(listener.max_connections(), 4);
    }

    #[tokio::test]
    async fn address_in_use_is_a_bind_error() {
        let first = Listener::bind(&BindTarget::inet("127.0.0.1", 0), Transport::Native, 1)
            .await
            .unwrap();
        let port = first.local_endpoint().port();
        let err = Listener::bind(&BindTarget::inet("127.0.0.1", port), Transport::Native, 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn portable_transport_rejects_domain_sockets() {
        let err = Listener::bind(&BindTarget::unix("/tmp/never-bound.sock"), Transport::Portable, 1)
            .await
            .err()
            .unwrap();
        match err {
            Error::Bind { source, .. } => assert_eq!(source.kind(), io::ErrorKind::Unsupported),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn permits_track_accepted_connections() {
        let listener = Listener::bind(&BindTarget::inet("127.0.0.1", 0), Transport::Native, 2)
            .await
            .unwrap();
        let addr = listener.local_endpoint().as_inet().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();

        let (_stream, peer, permit) = listener.accept().await.unwrap();
        assert!(matches!(peer, Endpoint::Inet(_)));
        assert_eq!(listener.available_permits(), 1);
        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn socket_file_removed_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listener.sock");
        let listener = Listener::bind(&BindTarget::unix(&path), Transport::Native, 1)
            .await
            .unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
