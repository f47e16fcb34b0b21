//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Connected → Configured → Disconnecting → Disposed)
//! - Generate unique connection IDs for tracing
//! - Broadcast transitions to observers, in order, exactly once each
//! - Register with / deregister from the live-connection group
//!
//! `Active` is not a separate state: a connection is active from
//! `Configured` until `Disconnecting`.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;

use crate::error::Error;
use crate::net::address::Endpoint;
use crate::net::group::ConnectionGroup;
use crate::tls::configuration::HandshakeInfo;
use crate::tls::sni::SniCompletion;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who a connection is: its id plus the address pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub id: ConnectionId,
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl ConnectionIdentity {
    pub fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self {
            id: ConnectionId::new(),
            local,
            remote,
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} <-> {}", self.id, self.local, self.remote)
    }
}

/// Observable connection states, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted or established; nothing attached yet.
    Connected = 1,
    /// Pipeline (stages, TLS, handler) attached.
    Configured = 2,
    /// One of the peers started closing, possibly only one half.
    Disconnecting = 3,
    /// Terminal.
    Disposed = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Configured => "configured",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disposed => "disposed",
        }
    }

    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ConnectionState::Connected),
            2 => Some(ConnectionState::Configured),
            3 => Some(ConnectionState::Disconnecting),
            4 => Some(ConnectionState::Disposed),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener for connection events.
///
/// Called synchronously on the connection's own task; keep it cheap.
pub trait ConnectionObserver: Send + Sync {
    fn on_state_change(&self, identity: &ConnectionIdentity, state: ConnectionState);

    /// Per-connection failure (handshake, I/O). The server keeps running.
    fn on_error(&self, _identity: &ConnectionIdentity, _error: &Error) {}

    /// TLS negotiation finished on a server connection.
    fn on_sni_completion(&self, _identity: &ConnectionIdentity, _completion: &SniCompletion) {}
}

impl<F> ConnectionObserver for F
where
    F: Fn(&ConnectionIdentity, ConnectionState) + Send + Sync,
{
    fn on_state_change(&self, identity: &ConnectionIdentity, state: ConnectionState) {
        self(identity, state)
    }
}

/// Ordered list of observers, shared by every connection of a server or client.
#[derive(Clone, Default)]
pub struct Observers {
    list: Vec<Arc<dyn ConnectionObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn ConnectionObserver>) {
        self.list.push(observer);
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn state_change(&self, identity: &ConnectionIdentity, state: ConnectionState) {
        for observer in &self.list {
            observer.on_state_change(identity, state);
        }
    }

    fn error(&self, identity: &ConnectionIdentity, error: &Error) {
        for observer in &self.list {
            observer.on_error(identity, error);
        }
    }

    fn sni_completion(&self, identity: &ConnectionIdentity, completion: &SniCompletion) {
        for observer in &self.list {
            observer.on_sni_completion(identity, completion);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("len", &self.list.len()).finish()
    }
}

/// Per-connection state machine.
///
/// Shared between the connection handle and the task driving it; the live
/// group only holds a weak reference.
pub struct ConnectionLifecycle {
    identity: ConnectionIdentity,
    observers: Observers,
    group: Option<ConnectionGroup>,
    phase: AtomicU8,
    disposed: watch::Sender<bool>,
    close: watch::Sender<bool>,
}

impl ConnectionLifecycle {
    pub fn new(
        identity: ConnectionIdentity,
        observers: Observers,
        group: Option<ConnectionGroup>,
    ) -> Arc<Self> {
        let (disposed, _) = watch::channel(false);
        let (close, _) = watch::channel(false);
        Arc::new(Self {
            identity,
            observers,
            group,
            phase: AtomicU8::new(0),
            disposed,
            close,
        })
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn id(&self) -> ConnectionId {
        self.identity.id
    }

    /// Last state delivered, `None` before `Connected`.
    pub fn state(&self) -> Option<ConnectionState> {
        ConnectionState::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == Some(ConnectionState::Disposed)
    }

    /// Move forward to `next`. Returns false if `next` (or a later state) was
    /// already delivered.
    fn advance(&self, next: ConnectionState) -> bool {
        let next = next as u8;
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            // nothing before Connected, nothing twice, never backwards
            if current >= next || (current == 0 && next != ConnectionState::Connected as u8) {
                return false;
            }
            match self
                .phase
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        tracing::trace!(connection = %self.identity, state = %state, "Connection state changed");
        self.observers.state_change(&self.identity, state);
    }

    /// Fire `Connected` and join the live group.
    pub fn connected(self: &Arc<Self>) {
        if self.advance(ConnectionState::Connected) {
            if let Some(group) = &self.group {
                group.insert(self);
            }
            self.publish(ConnectionState::Connected);
        }
    }

    pub fn configured(&self) {
        if self.advance(ConnectionState::Configured) {
            self.publish(ConnectionState::Configured);
        }
    }

    /// Fire `Disconnecting`; later close events are ignored.
    pub fn disconnecting(&self) {
        if self.advance(ConnectionState::Disconnecting) {
            self.publish(ConnectionState::Disconnecting);
        }
    }

    /// Fire `Disposed` (preceded by `Disconnecting` if it never fired), leave
    /// the group and release every disposal waiter.
    pub fn dispose(&self) {
        self.disconnecting();
        if self.advance(ConnectionState::Disposed) {
            if let Some(group) = &self.group {
                group.remove(self.identity.id);
            }
            self.publish(ConnectionState::Disposed);
            self.disposed.send_replace(true);
        }
    }

    pub fn report_error(&self, error: &Error) {
        tracing::debug!(connection = %self.identity, error = %error, "Connection error");
        self.observers.error(&self.identity, error);
    }

    pub fn report_sni(&self, completion: &SniCompletion) {
        self.observers.sni_completion(&self.identity, completion);
    }

    /// Resolves once the connection is disposed (immediately if it already is).
    pub fn on_dispose(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.disposed.subscribe();
        async move {
            let _ = rx.wait_for(|disposed| *disposed).await;
        }
    }

    /// Ask the task driving this connection to abandon it.
    pub fn request_close(&self) {
        self.close.send_replace(true);
    }

    /// Resolves once [`ConnectionLifecycle::request_close`] was called.
    pub fn close_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.close.subscribe();
        async move {
            let requested = rx.wait_for(|close| *close).await.is_ok();
            if !requested {
                // sender gone: nobody can ask any more
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Byte stream that can sit in a connection pipeline.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// An established connection handed to handlers.
///
/// Reads and writes go through the pipeline's outermost stage. Reaching EOF
/// on the inbound half, or shutting down the outbound half, moves the
/// lifecycle to `Disconnecting`; the other half keeps working. Dropping the
/// connection closes the transport and disposes it.
pub struct Connection {
    stream: Option<BoxedStream>,
    lifecycle: Arc<ConnectionLifecycle>,
    tls: Option<HandshakeInfo>,
    sni: Option<SniCompletion>,
    inbound_closed: bool,
    outbound_closed: bool,
}

impl Connection {
    pub(crate) fn new(stream: BoxedStream, lifecycle: Arc<ConnectionLifecycle>) -> Self {
        Self {
            stream: Some(stream),
            lifecycle,
            tls: None,
            sni: None,
            inbound_closed: false,
            outbound_closed: false,
        }
    }

    pub(crate) fn set_tls(&mut self, info: HandshakeInfo) {
        self.tls = Some(info);
    }

    pub(crate) fn set_sni(&mut self, completion: SniCompletion) {
        self.sni = Some(completion);
    }

    pub fn id(&self) -> ConnectionId {
        self.lifecycle.id()
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        self.lifecycle.identity()
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.lifecycle.identity().local
    }

    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.lifecycle.identity().remote
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycle> {
        &self.lifecycle
    }

    /// Handshake details when the connection is secured.
    pub fn tls(&self) -> Option<&HandshakeInfo> {
        self.tls.as_ref()
    }

    /// SNI negotiation result (server side only).
    pub fn sni(&self) -> Option<&SniCompletion> {
        self.sni.as_ref()
    }

    pub fn is_inbound_closed(&self) -> bool {
        self.inbound_closed
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound_closed
    }

    /// Wrap or replace the current byte stream with another stage.
    pub fn map_stream<F>(&mut self, stage: F)
    where
        F: FnOnce(BoxedStream) -> BoxedStream,
    {
        if let Some(stream) = self.stream.take() {
            self.stream = Some(stage(stream));
        }
    }

    /// Resolves once this connection is disposed.
    pub fn on_dispose(&self) -> impl Future<Output = ()> + Send + 'static {
        self.lifecycle.on_dispose()
    }

    fn stream_mut(&mut self) -> io::Result<&mut BoxedStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection stream detached"))
    }

    fn close_inbound(&mut self) {
        if !self.inbound_closed {
            self.inbound_closed = true;
            tracing::debug!(connection = %self.lifecycle.identity(), "Inbound half closed");
            self.lifecycle.disconnecting();
        }
    }

    fn close_outbound(&mut self) {
        if !self.outbound_closed {
            self.outbound_closed = true;
            tracing::debug!(connection = %self.lifecycle.identity(), "Outbound half closed");
            self.lifecycle.disconnecting();
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let wanted = buf.remaining() > 0;
        let before = buf.filled().len();
        let stream = match this.stream_mut() {
            Ok(stream) => stream,
            Err(e) => return Poll::Ready(Err(e)),
        };
        match Pin::new(stream).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if wanted && buf.filled().len() == before {
                    this.close_inbound();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.close_inbound();
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let stream = match this.stream_mut() {
            Ok(stream) => stream,
            Err(e) => return Poll::Ready(Err(e)),
        };
        match Pin::new(stream).poll_write(cx, data) {
            Poll::Ready(Err(e)) => {
                this.close_outbound();
                Poll::Ready(Err(e))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stream_mut() {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let stream = match this.stream_mut() {
            Ok(stream) => stream,
            Err(e) => return Poll::Ready(Err(e)),
        };
        match Pin::new(stream).poll_shutdown(cx) {
            Poll::Ready(result) => {
                this.close_outbound();
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // release the transport before announcing disposal
        drop(self.stream.take());
        self.lifecycle.dispose();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("identity", self.lifecycle.identity())
            .field("state", &self.lifecycle.state())
            .field("sni", &self.sni)
            .finish()
    }
}
