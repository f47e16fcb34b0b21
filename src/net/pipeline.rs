//! Per-connection pipeline shared by servers and clients.
//!
//! A pipeline is the ordered set of things attached to every new connection
//! before it is handed over: observers, transport stages that wrap the raw
//! stream ahead of TLS, the optional wiretap stage and user hooks that may
//! wrap or replace the (decrypted) byte stream.
//!
//! ```text
//! socket → transport stages → TLS (optional) → wiretap → connection hooks → handler
//! ```

use std::future::Future;
use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::net::connection::{BoxedStream, Connection, ConnectionObserver, Observers};
use crate::net::wiretap::Wiretap;

/// Stage wrapping the raw transport stream, applied before any TLS handshake.
pub type StreamStage = Arc<dyn Fn(BoxedStream) -> BoxedStream + Send + Sync>;

/// Hook run once per connection after TLS and before the handler.
pub type ConnectionHook = Arc<dyn Fn(&mut Connection) + Send + Sync>;

/// Protocol handler. Owns the connection until the returned future resolves.
pub type Handler = Arc<dyn Fn(Connection) -> BoxFuture<'static, io::Result<()>> + Send + Sync>;

/// Box an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    Arc::new(move |connection| f(connection).boxed())
}

#[derive(Clone, Default)]
pub struct Pipeline {
    observers: Observers,
    transport_stages: Vec<StreamStage>,
    hooks: Vec<ConnectionHook>,
    wiretap: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.push(observer);
    }

    pub fn on_transport(&mut self, stage: StreamStage) {
        self.transport_stages.push(stage);
    }

    pub fn on_connection(&mut self, hook: ConnectionHook) {
        self.hooks.push(hook);
    }

    pub fn set_wiretap(&mut self, enabled: bool) {
        self.wiretap = enabled;
    }

    pub fn wiretap(&self) -> bool {
        self.wiretap
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Wrap a freshly accepted or connected stream with every transport
    /// stage, first registered innermost.
    pub(crate) fn wrap_transport(&self, stream: BoxedStream) -> BoxedStream {
        self.transport_stages
            .iter()
            .fold(stream, |stream, stage| stage(stream))
    }

    /// Attach the wiretap (innermost) and then every hook, in order.
    pub(crate) fn apply(&self, connection: &mut Connection) {
        if self.wiretap {
            let label = connection.id().to_string();
            connection.map_stream(Wiretap::stage(label));
        }
        for hook in &self.hooks {
            hook(connection);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("observers", &self.observers.len())
            .field("transport_stages", &self.transport_stages.len())
            .field("hooks", &self.hooks.len())
            .field("wiretap", &self.wiretap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::Endpoint;
    use crate::net::connection::{ConnectionIdentity, ConnectionLifecycle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_run_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new();
        for expected in 0..2 {
            let calls = Arc::clone(&calls);
            pipeline.on_connection(Arc::new(move |_conn: &mut Connection| {
                assert_eq!(calls.fetch_add(1, Ordering::SeqCst), expected);
            }));
        }
        pipeline.set_wiretap(true);

        let lifecycle = ConnectionLifecycle::new(
            ConnectionIdentity::new(
                Endpoint::Inet("127.0.0.1:1".parse().unwrap()),
                Endpoint::Inet("127.0.0.1:2".parse().unwrap()),
            ),
            pipeline.observers().clone(),
            None,
        );
        let (stream, _peer) = tokio::io::duplex(16);
        let mut connection = Connection::new(Box::new(stream), lifecycle);
        pipeline.apply(&mut connection);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transport_stages_wrap_first_registered_innermost() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        for id in 0..3 {
            let order = Arc::clone(&order);
            pipeline.on_transport(Arc::new(move |stream: BoxedStream| {
                order.lock().unwrap().push(id);
                stream
            }));
        }

        let (stream, _peer) = tokio::io::duplex(16);
        let _wrapped = pipeline.wrap_transport(Box::new(stream));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
