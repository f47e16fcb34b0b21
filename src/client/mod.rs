//! Client runtime.
//!
//! # Data Flow
//! ```text
//! TcpClient::connect_now
//!     → connect (host/port or filesystem socket)
//!     → Connected → transport stages → TLS handshake with SNI (optional)
//!     → pipeline hooks
//!     → Configured → Connection handed to the caller
//! ```
//!
//! Connections made by a client go through the same lifecycle, observers
//! and pipeline hooks as accepted ones.

pub mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::lifecycle::checked_deadline;
use crate::net::address::{AddressOptions, BindTarget, Endpoint};
use crate::net::connection::{BoxedStream, Connection, ConnectionIdentity, ConnectionLifecycle, ConnectionObserver};
use crate::net::group::ConnectionGroup;
use crate::net::listener::{configure_tcp, resolve_inet, Transport};
use crate::net::pipeline::Pipeline;
use crate::tls::configuration::HandshakeInfo;

pub use tls::ClientTls;

/// Host used when only a port is given.
pub const DEFAULT_REMOTE_HOST: &str = "localhost";

/// Builder for outgoing connections.
#[derive(Clone, Debug)]
pub struct TcpClient {
    remote: AddressOptions,
    transport: Transport,
    tls: Option<ClientTls>,
    pipeline: Pipeline,
    group: Option<ConnectionGroup>,
}

impl TcpClient {
    pub fn new() -> Self {
        Self {
            remote: AddressOptions::default(),
            transport: Transport::Native,
            tls: None,
            pipeline: Pipeline::new(),
            group: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.remote.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.remote.port = Some(port);
        self
    }

    pub fn remote_address(self, addr: SocketAddr) -> Self {
        self.host(addr.ip().to_string()).port(addr.port())
    }

    /// Connect to a filesystem socket. Cannot be combined with host/port.
    pub fn unix_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.remote.unix_path = Some(path.into());
        self
    }

    pub fn run_on_native(mut self, prefer_native: bool) -> Self {
        self.transport = Transport::from_native(prefer_native);
        self
    }

    pub fn secure(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn wiretap(mut self, enabled: bool) -> Self {
        self.pipeline.set_wiretap(enabled);
        self
    }

    pub fn observe<O>(mut self, observer: O) -> Self
    where
        O: ConnectionObserver + 'static,
    {
        self.pipeline.observe(Arc::new(observer));
        self
    }

    /// Stage wrapping the connected stream ahead of TLS.
    pub fn do_on_transport<F>(mut self, stage: F) -> Self
    where
        F: Fn(BoxedStream) -> BoxedStream + Send + Sync + 'static,
    {
        self.pipeline.on_transport(Arc::new(stage));
        self
    }

    pub fn do_on_connected<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Connection) + Send + Sync + 'static,
    {
        self.pipeline.on_connection(Arc::new(hook));
        self
    }

    pub fn connection_group(mut self, group: ConnectionGroup) -> Self {
        self.group = Some(group);
        self
    }

    fn target(&self) -> Result<BindTarget> {
        let target = match self.remote.target()? {
            BindTarget::Inet { port: 0, .. } => {
                return Err(Error::config("remote port is required"));
            }
            BindTarget::Inet { port, .. } if self.remote.host.is_none() => {
                BindTarget::inet(DEFAULT_REMOTE_HOST, port)
            }
            target => target,
        };
        Ok(target)
    }

    /// Connect, run the TLS handshake if configured, attach the pipeline.
    ///
    /// `timeout` bounds the connect and the handshake together.
    pub async fn connect_now(&self, timeout: Duration) -> Result<Connection> {
        let deadline = checked_deadline(timeout)?;
        let target = self.target()?;

        tokio::time::timeout_at(deadline, self.establish(target))
            .await
            .map_err(|_| Error::Timeout {
                operation: "connect",
                timeout,
            })?
    }

    async fn establish(&self, target: BindTarget) -> Result<Connection> {
        let (stream, local, remote) = connect_stream(&target, self.transport).await?;
        let lifecycle = ConnectionLifecycle::new(
            ConnectionIdentity::new(local, remote),
            self.pipeline.observers().clone(),
            self.group.clone(),
        );
        lifecycle.connected();
        tracing::debug!(connection = %lifecycle.identity(), "Connection established");
        let stream = self.pipeline.wrap_transport(stream);

        let mut connection = match &self.tls {
            Some(tls) => {
                let host = match &target {
                    BindTarget::Inet { host, .. } => Some(host.as_str()),
                    BindTarget::Unix(_) => None,
                };
                match handshake(tls, host, stream).await {
                    Ok((stream, info)) => {
                        let mut connection = Connection::new(stream, Arc::clone(&lifecycle));
                        connection.set_tls(info);
                        connection
                    }
                    Err(e) => {
                        lifecycle.report_error(&e);
                        lifecycle.dispose();
                        return Err(e);
                    }
                }
            }
            None => Connection::new(stream, Arc::clone(&lifecycle)),
        };

        self.pipeline.apply(&mut connection);
        lifecycle.configured();
        Ok(connection)
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_stream(target: &BindTarget, transport: Transport) -> Result<(BoxedStream, Endpoint, Endpoint)> {
    match target {
        BindTarget::Inet { host, port } => {
            let addr = resolve_inet(host, *port).await?;
            let stream = TcpStream::connect(addr).await?;
            configure_tcp(&stream);
            let local = stream.local_addr()?;
            let stream: BoxedStream = Box::new(stream);
            Ok((stream, Endpoint::Inet(local), Endpoint::Inet(addr)))
        }
        BindTarget::Unix(path) => {
            if !transport.supports_domain_sockets() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("{transport:?} transport does not support domain sockets"),
                )));
            }
            connect_unix(path).await
        }
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<(BoxedStream, Endpoint, Endpoint)> {
    let stream: BoxedStream = Box::new(tokio::net::UnixStream::connect(path).await?);
    Ok((
        stream,
        Endpoint::Unix(None),
        Endpoint::Unix(Some(path.to_path_buf())),
    ))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path) -> Result<(BoxedStream, Endpoint, Endpoint)> {
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "domain sockets are not available on this platform",
    )))
}

async fn handshake(tls: &ClientTls, host: Option<&str>, stream: BoxedStream) -> Result<(BoxedStream, HandshakeInfo)> {
    let (requested, server_name) = tls.resolve_server_name(host)?;
    let connector = TlsConnector::from(tls.config());
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Handshake(e.to_string()))?;

    let (_, session) = stream.get_ref();
    let info = HandshakeInfo {
        hostname: Some(requested),
        alpn_protocol: session.alpn_protocol().map(<[u8]>::to_vec),
        protocol_version: session.protocol_version().map(|v| format!("{v:?}")),
        cipher_suite: session
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        peer_certificates: session
            .peer_certificates()
            .map(|certs| certs.to_vec())
            .unwrap_or_default(),
    };
    tracing::debug!(
        server_name = info.hostname.as_deref().unwrap_or("-"),
        protocol = info.protocol_version.as_deref().unwrap_or("-"),
        "TLS session established"
    );
    let stream: BoxedStream = Box::new(stream);
    Ok((stream, info))
}
