//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use tcp_runtime::net::{BoxedStream, ConnectionIdentity};
use tcp_runtime::{
    ClientTls, Connection, ConnectionObserver, ConnectionState, Error, SniCompletion, TcpClient,
    TlsConfiguration,
};

/// Self-signed certificate chain and key for `name`.
pub fn material(name: &str) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    (vec![cert.der().clone()], key.into())
}

/// TLS configuration presenting a fresh self-signed certificate for `name`.
pub fn configuration(name: &str) -> TlsConfiguration {
    let (chain, key) = material(name);
    TlsConfiguration::builder(chain, key)
        .handshake_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Client that trusts anything, connecting to `addr`.
pub fn insecure_client(addr: SocketAddr, server_name: Option<&str>) -> TcpClient {
    let mut tls = ClientTls::insecure().unwrap();
    if let Some(name) = server_name {
        tls = tls.server_name(name);
    }
    TcpClient::new().remote_address(addr).secure(tls)
}

/// Echo every byte back, then close the outbound half once the peer does.
pub async fn echo(mut connection: Connection) -> io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let n = connection.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        connection.write_all(&buf[..n]).await?;
    }
    connection.shutdown().await
}

#[derive(Default)]
struct Recorded {
    states: Vec<ConnectionState>,
    errors: Vec<String>,
    completions: Vec<SniCompletion>,
}

/// Observer keeping every event it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.inner.lock().unwrap().states.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().unwrap().errors.clone()
    }

    pub fn completions(&self) -> Vec<SniCompletion> {
        self.inner.lock().unwrap().completions.clone()
    }

    pub fn count(&self, state: ConnectionState) -> usize {
        self.states().iter().filter(|s| **s == state).count()
    }

    /// Wait until `state` has been seen `times` times.
    pub async fn wait_for(&self, state: ConnectionState, times: usize) {
        wait_until(|| self.count(state) >= times).await;
    }
}

impl ConnectionObserver for Recorder {
    fn on_state_change(&self, _identity: &ConnectionIdentity, state: ConnectionState) {
        self.inner.lock().unwrap().states.push(state);
    }

    fn on_error(&self, _identity: &ConnectionIdentity, error: &Error) {
        self.inner.lock().unwrap().errors.push(error.to_string());
    }

    fn on_sni_completion(&self, _identity: &ConnectionIdentity, completion: &SniCompletion) {
        self.inner.lock().unwrap().completions.push(completion.clone());
    }
}

/// Poll `condition` every 10ms; panic after five seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within 5s");
}

/// Stream stage copying every inbound byte into a shared buffer.
pub struct Tap {
    inner: BoxedStream,
    seen: Arc<Mutex<Vec<u8>>>,
}

impl Tap {
    pub fn stage(seen: Arc<Mutex<Vec<u8>>>) -> impl Fn(BoxedStream) -> BoxedStream + Send + Sync + 'static {
        move |inner: BoxedStream| -> BoxedStream {
            Box::new(Tap {
                inner,
                seen: Arc::clone(&seen),
            })
        }
    }
}

impl AsyncRead for Tap {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.seen.lock().unwrap().extend_from_slice(&buf.filled()[before..]);
        }
        poll
    }
}

impl AsyncWrite for Tap {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
