//! Server configuration and binding.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::ServerConfig;
use crate::config::tls::build_registry;
use crate::error::{Error, Result};
use crate::lifecycle::{checked_deadline, Shutdown};
use crate::net::address::{AddressOptions, BindTarget};
use crate::net::connection::{BoxedStream, Connection, ConnectionObserver};
use crate::net::group::ConnectionGroup;
use crate::net::listener::{Listener, Transport};
use crate::net::pipeline::{handler, Handler, Pipeline};
use crate::observability::metrics::MetricsObserver;
use crate::server::accept::{accept_loop, discard_handler, AcceptContext};
use crate::server::handle::DisposableServer;
use crate::tls::registry::TlsRegistry;
use crate::tls::sni::SniResolver;

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Builder for a TCP (or filesystem socket) server.
///
/// ```no_run
/// # async fn run() -> tcp_runtime::Result<()> {
/// use std::time::Duration;
/// use tcp_runtime::TcpServer;
///
/// let server = TcpServer::new()
///     .host("127.0.0.1")
///     .port(0)
///     .track_connections()
///     .handle(|mut conn| async move {
///         let (mut r, mut w) = tokio::io::split(&mut conn);
///         tokio::io::copy(&mut r, &mut w).await.map(|_| ())
///     })
///     .bind_now(Duration::from_secs(5))
///     .await?;
/// server.dispose_now(Duration::from_secs(5)).await
/// # }
/// ```
#[derive(Clone)]
pub struct TcpServer {
    address: AddressOptions,
    transport: Transport,
    registry: Option<Arc<TlsRegistry>>,
    pipeline: Pipeline,
    group: Option<ConnectionGroup>,
    max_connections: usize,
    handler: Option<Handler>,
}

impl TcpServer {
    pub fn new() -> Self {
        Self {
            address: AddressOptions::default(),
            transport: Transport::Native,
            registry: None,
            pipeline: Pipeline::new(),
            group: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            handler: None,
        }
    }

    /// Server preconfigured from a validated config file. TLS material is
    /// loaded here; the handler still has to be set.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let mut server = Self::new()
            .address_options(config.listener.address_options())
            .run_on_native(config.listener.native_transport)
            .max_connections(config.listener.max_connections)
            .wiretap(config.observability.wiretap);
        if let Some(tls) = &config.tls {
            server = server.secure(build_registry(tls)?);
        }
        if config.shutdown.track_connections {
            server = server.track_connections();
        }
        if config.observability.metrics_enabled {
            server = server.observe(MetricsObserver);
        }
        Ok(server)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.address.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.address.port = Some(port);
        self
    }

    pub fn bind_address(self, addr: SocketAddr) -> Self {
        self.host(addr.ip().to_string()).port(addr.port())
    }

    /// Listen on a filesystem socket. Cannot be combined with host/port.
    pub fn unix_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.address.unix_path = Some(path.into());
        self
    }

    pub fn address_options(mut self, options: AddressOptions) -> Self {
        self.address = options;
        self
    }

    /// Prefer the native transport (required for filesystem sockets).
    pub fn run_on_native(mut self, prefer_native: bool) -> Self {
        self.transport = Transport::from_native(prefer_native);
        self
    }

    /// Serve TLS, choosing the configuration per connection by SNI.
    pub fn secure(self, registry: TlsRegistry) -> Self {
        self.secure_shared(Arc::new(registry))
    }

    pub fn secure_shared(mut self, registry: Arc<TlsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn no_tls(mut self) -> Self {
        self.registry = None;
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

    /// Stage wrapping each accepted stream ahead of TLS. With TLS enabled the
    /// stage sees raw records; stages registered first sit closest to the
    /// socket.
    pub fn do_on_transport<F>(mut self, stage: F) -> Self
    where
        F: Fn(BoxedStream) -> BoxedStream + Send + Sync + 'static,
    {
        self.pipeline.on_transport(Arc::new(stage));
        self
    }

    /// Hook run on each connection after TLS, before the handler.
    pub fn do_on_connection<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Connection) + Send + Sync + 'static,
    {
        self.pipeline.on_connection(Arc::new(hook));
        self
    }

    /// Track live connections in `group` so disposal can drain them.
    pub fn connection_group(mut self, group: ConnectionGroup) -> Self {
        self.group = Some(group);
        self
    }

    /// Track live connections in a fresh group.
    pub fn track_connections(self) -> Self {
        self.connection_group(ConnectionGroup::new())
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn handle<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        self.handler = Some(handler(f));
        self
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind and start accepting.
    ///
    /// Configuration problems (conflicting address settings, an overflowing
    /// timeout) fail before anything touches the network.
    pub async fn bind_now(self, timeout: Duration) -> Result<DisposableServer> {
        self.bind_with(timeout, |target, transport, max| async move {
            Listener::bind(&target, transport, max).await
        })
        .await
    }

    /// `bind_now` with the listener acquisition step supplied by the caller.
    async fn bind_with<B, Fut>(self, timeout: Duration, bind: B) -> Result<DisposableServer>
    where
        B: FnOnce(BindTarget, Transport, usize) -> Fut,
        Fut: Future<Output = Result<Listener>>,
    {
        let deadline = checked_deadline(timeout)?;
        let target = self.address.target()?;
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than zero"));
        }

        let listener = tokio::time::timeout_at(deadline, bind(target, self.transport, self.max_connections))
            .await
            .map_err(|_| Error::Timeout {
                operation: "bind",
                timeout,
            })??;

        let local = listener.local_endpoint().clone();
        let context = Arc::new(AcceptContext {
            resolver: self.registry.map(SniResolver::new),
            pipeline: self.pipeline,
            group: self.group.clone(),
            handler: self.handler.unwrap_or_else(discard_handler),
        });

        tracing::info!(
            address = %local,
            secure = context.resolver.is_some(),
            tracked = self.group.is_some(),
            "Server started"
        );

        let shutdown = Shutdown::new();
        let accept_task = tokio::spawn(accept_loop(listener, context, shutdown.subscribe()));
        Ok(DisposableServer::new(local, shutdown, accept_task, self.group))
    }
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("address", &self.address)
            .field("transport", &self.transport)
            .field("secure", &self.registry.is_some())
            .field("pipeline", &self.pipeline)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
