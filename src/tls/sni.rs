//! Server-side SNI resolution.
//!
//! The ClientHello is read before any configuration is chosen. The requested
//! server name selects a [`TlsConfiguration`] from the registry and that
//! configuration's full rustls config (certificate, versions, suites, ALPN)
//! drives the rest of the handshake.
//!
//! ```text
//! AwaitingHello → Resolved → HandshakeInProgress → Completed | Failed
//! ```

use std::fmt;
use std::sync::Arc;

use rustls::server::Acceptor;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::error::{Error, Result};
use crate::net::connection::{BoxedStream, ConnectionLifecycle};
use crate::tls::configuration::{HandshakeInfo, TlsConfiguration};
use crate::tls::registry::{Match, Resolution, TlsRegistry};

/// Progress of one server handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingHello,
    Resolved,
    HandshakeInProgress,
    Completed,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeState::AwaitingHello => "awaiting hello",
            HandshakeState::Resolved => "resolved",
            HandshakeState::HandshakeInProgress => "handshake in progress",
            HandshakeState::Completed => "completed",
            HandshakeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// "Negotiation completed" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniCompletion {
    /// Server name the client asked for, if any.
    pub hostname: Option<String>,
    /// Registry entry that served the handshake.
    pub matched: Match,
}

/// Output of a successful server handshake.
pub struct Secured {
    pub stream: BoxedStream,
    pub info: HandshakeInfo,
    pub completion: SniCompletion,
}

/// Picks a TLS configuration per connection from the requested server name.
#[derive(Debug, Clone)]
pub struct SniResolver {
    registry: Arc<TlsRegistry>,
}

impl SniResolver {
    pub fn new(registry: Arc<TlsRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TlsRegistry> {
        &self.registry
    }

    /// Configuration selection. No server name means the default.
    pub fn select(&self, hostname: Option<&str>) -> Resolution<'_> {
        self.registry.lookup(hostname)
    }

    /// Run the server handshake on `stream`.
    ///
    /// The ClientHello must arrive within the default configuration's
    /// handshake timeout; the remainder is bounded by the timeout of the
    /// configuration that was selected.
    pub async fn accept(&self, stream: BoxedStream, lifecycle: &ConnectionLifecycle) -> Result<Secured> {
        let mut tracker = Tracker::new(lifecycle);

        let hello_timeout = self.registry.default_configuration().handshake_timeout();
        let acceptor = LazyConfigAcceptor::new(Acceptor::default(), stream);
        let start = match tokio::time::timeout(hello_timeout, acceptor).await {
            Ok(Ok(start)) => start,
            Ok(Err(e)) => return Err(tracker.fail(e.to_string())),
            Err(_) => {
                return Err(tracker.fail(format!("no ClientHello within {hello_timeout:?}")));
            }
        };

        let hostname = start.client_hello().server_name().map(str::to_owned);
        let resolution = self.select(hostname.as_deref());
        let configuration: TlsConfiguration = resolution.configuration.clone();
        tracker.advance(HandshakeState::Resolved);
        tracing::debug!(
            connection = %lifecycle.identity(),
            hostname = hostname.as_deref().unwrap_or("-"),
            matched = ?resolution.matched,
            "SNI resolved"
        );

        tracker.advance(HandshakeState::HandshakeInProgress);
        let timeout = configuration.handshake_timeout();
        let tls = match tokio::time::timeout(timeout, start.into_stream(configuration.server_config())).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(tracker.fail(e.to_string())),
            Err(_) => return Err(tracker.fail(format!("handshake not finished within {timeout:?}"))),
        };
        tracker.advance(HandshakeState::Completed);

        let info = server_handshake_info(&tls, hostname.clone());
        configuration.notify_handshake(&info);

        let completion = SniCompletion {
            hostname,
            matched: resolution.matched,
        };
        lifecycle.report_sni(&completion);

        Ok(Secured {
            stream: Box::new(tls),
            info,
            completion,
        })
    }
}

fn server_handshake_info(tls: &TlsStream<BoxedStream>, hostname: Option<String>) -> HandshakeInfo {
    let (_, session) = tls.get_ref();
    HandshakeInfo {
        hostname,
        alpn_protocol: session.alpn_protocol().map(<[u8]>::to_vec),
        protocol_version: session.protocol_version().map(|v| format!("{v:?}")),
        cipher_suite: session
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        peer_certificates: session
            .peer_certificates()
            .map(|certs| certs.to_vec())
            .unwrap_or_default(),
    }
}

struct Tracker<'a> {
    state: HandshakeState,
    lifecycle: &'a ConnectionLifecycle,
}

impl<'a> Tracker<'a> {
    fn new(lifecycle: &'a ConnectionLifecycle) -> Self {
        Self {
            state: HandshakeState::AwaitingHello,
            lifecycle,
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        tracing::trace!(connection = %self.lifecycle.identity(), from = %self.state, to = %next, "Handshake progressed");
        self.state = next;
    }

    fn fail(&mut self, reason: String) -> Error {
        let at = self.state;
        self.advance(HandshakeState::Failed);
        tracing::warn!(connection = %self.lifecycle.identity(), state = %at, reason = %reason, "TLS handshake failed");
        Error::Handshake(format!("{at}: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::Endpoint;
    use crate::net::connection::{ConnectionIdentity, Observers};
    use crate::tls::registry::DomainPattern;
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn configuration(name: &str, timeout: Duration) -> TlsConfiguration {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
        TlsConfiguration::builder(vec![cert.der().clone()], key.into())
            .handshake_timeout(timeout)
            .build()
            .unwrap()
    }

    fn resolver(timeout: Duration) -> SniResolver {
        let mut builder = TlsRegistry::builder();
        builder.set_default(configuration("default", timeout));
        builder
            .add("*.test.com", configuration("a.test.com", timeout))
            .unwrap();
        SniResolver::new(Arc::new(builder.build().unwrap()))
    }

    fn lifecycle() -> Arc<ConnectionLifecycle> {
        ConnectionLifecycle::new(
            ConnectionIdentity::new(
                Endpoint::Inet("127.0.0.1:1".parse().unwrap()),
                Endpoint::Inet("127.0.0.1:2".parse().unwrap()),
            ),
            Observers::new(),
            None,
        )
    }

    #[test]
    fn select_follows_registry() {
        let resolver = resolver(Duration::from_secs(1));
        assert_eq!(resolver.select(None).matched, Match::Default);
        assert_eq!(resolver.select(Some("test.com")).matched, Match::Default);
        assert_eq!(
            resolver.select(Some("a.test.com")).matched,
            Match::Wildcard(DomainPattern::parse("*.test.com").unwrap())
        );
    }

    #[tokio::test]
    async fn garbage_hello_fails_handshake() {
        let resolver = resolver(Duration::from_secs(1));
        let (server, mut client) = tokio::io::duplex(1024);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let lifecycle = lifecycle();
        let err = resolver.accept(Box::new(server), &lifecycle).await.err().unwrap();
        assert!(matches!(err, Error::Handshake(msg) if msg.starts_with("awaiting hello")));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let resolver = resolver(Duration::from_millis(30));
        let (server, _client) = tokio::io::duplex(1024);

        let lifecycle = lifecycle();
        let err = resolver.accept(Box::new(server), &lifecycle).await.err().unwrap();
        assert!(matches!(err, Error::Handshake(msg) if msg.contains("no ClientHello")));
    }
}
