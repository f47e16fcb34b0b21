//! Server-side SNI selection and TLS handshake outcomes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::RootCertStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tcp_runtime::tls::{DefaultFlavor, DomainPattern, Match, TlsConfiguration};
use tcp_runtime::{
    ClientTls, Connection, ConnectionState, DisposableServer, Error, TcpClient, TcpServer,
    TlsRegistry,
};

mod common;
use common::{Recorder, Tap};

const TIMEOUT: Duration = Duration::from_secs(2);

async fn serve(registry: TlsRegistry, recorder: &Recorder) -> DisposableServer {
    TcpServer::new()
        .host("127.0.0.1")
        .port(0)
        .secure(registry)
        .observe(recorder.clone())
        .track_connections()
        .handle(common::echo)
        .bind_now(TIMEOUT)
        .await
        .unwrap()
}

fn wildcard_registry(default: &TlsConfiguration, wildcard: &TlsConfiguration) -> TlsRegistry {
    let mut builder = TlsRegistry::builder();
    builder.set_default(default.clone());
    builder.add("*.test.com", wildcard.clone()).unwrap();
    builder.build().unwrap()
}

async fn ping(connection: &mut Connection) {
    connection.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    connection.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ping");
}

fn presented(connection: &Connection) -> Vec<u8> {
    let tls = connection.tls().expect("client connection is secured");
    tls.peer_certificates[0].as_ref().to_vec()
}

#[tokio::test]
async fn apex_name_gets_default_configuration() {
    let default = common::configuration("default.local");
    let wildcard = common::configuration("*.test.com");
    let recorder = Recorder::new();
    let server = serve(wildcard_registry(&default, &wildcard), &recorder).await;

    let mut connection = common::insecure_client(server.address().unwrap(), Some("test.com"))
        .connect_now(TIMEOUT)
        .await
        .unwrap();
    ping(&mut connection).await;

    assert_eq!(presented(&connection), default.certificate().as_ref());
    let completions = recorder.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].hostname.as_deref(), Some("test.com"));
    assert_eq!(completions[0].matched, Match::Default);

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn subdomain_gets_wildcard_configuration() {
    let default = common::configuration("default.local");
    let wildcard = common::configuration("*.test.com");
    let recorder = Recorder::new();
    let server = serve(wildcard_registry(&default, &wildcard), &recorder).await;

    let mut connection = common::insecure_client(server.address().unwrap(), Some("a.test.com"))
        .connect_now(TIMEOUT)
        .await
        .unwrap();
    ping(&mut connection).await;

    assert_eq!(presented(&connection), wildcard.certificate().as_ref());
    let completions = recorder.completions();
    assert_eq!(completions[0].hostname.as_deref(), Some("a.test.com"));
    assert_eq!(
        completions[0].matched,
        Match::Wildcard(DomainPattern::parse("*.test.com").unwrap())
    );

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn missing_server_name_gets_default_configuration() {
    let default = common::configuration("default.local");
    let wildcard = common::configuration("*.test.com");
    let recorder = Recorder::new();
    let server = serve(wildcard_registry(&default, &wildcard), &recorder).await;

    // IP addresses are never sent as SNI
    let mut connection = common::insecure_client(server.address().unwrap(), None)
        .connect_now(TIMEOUT)
        .await
        .unwrap();
    ping(&mut connection).await;

    assert_eq!(presented(&connection), default.certificate().as_ref());
    let completions = recorder.completions();
    assert_eq!(completions[0].hostname, None);
    assert_eq!(completions[0].matched, Match::Default);

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn selected_configuration_runs_its_handshake_hook() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);
    let (chain, key) = common::material("api.example.org");
    let api = TlsConfiguration::builder(chain, key)
        .on_handshake(move |info| {
            hook_seen.lock().unwrap().push(info.hostname.clone());
        })
        .build()
        .unwrap();

    let mut builder = TlsRegistry::builder();
    builder.set_default(common::configuration("default.local"));
    builder.add("api.example.org", api).unwrap();
    let recorder = Recorder::new();
    let server = serve(builder.build().unwrap(), &recorder).await;

    let mut connection =
        common::insecure_client(server.address().unwrap(), Some("api.example.org"))
            .connect_now(TIMEOUT)
            .await
            .unwrap();
    ping(&mut connection).await;

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[Some("api.example.org".to_string())]
    );

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn flavor_controls_negotiated_alpn() {
    let registry = TlsRegistry::single(common::configuration("default.local"))
        .with_default_flavor(DefaultFlavor::H2);
    let recorder = Recorder::new();
    let server = serve(registry, &recorder).await;

    let tls = ClientTls::insecure()
        .unwrap()
        .server_name("default.local")
        .alpn_protocols(vec![b"h2".to_vec()]);
    let mut connection = TcpClient::new()
        .remote_address(server.address().unwrap())
        .secure(tls)
        .connect_now(TIMEOUT)
        .await
        .unwrap();
    ping(&mut connection).await;

    let info = connection.tls().unwrap();
    assert_eq!(info.alpn_protocol.as_deref(), Some(&b"h2"[..]));

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn garbage_hello_fails_only_that_connection() {
    let recorder = Recorder::new();
    let server = serve(
        TlsRegistry::single(common::configuration("default.local")),
        &recorder,
    )
    .await;

    let mut raw = TcpStream::connect(server.address().unwrap()).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\nHost: test.com\r\n\r\n")
        .await
        .unwrap();
    let mut sink = Vec::new();
    let _ = raw.read_to_end(&mut sink).await;

    recorder.wait_for(ConnectionState::Disposed, 1).await;
    assert_eq!(
        recorder.states(),
        vec![
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disposed,
        ]
    );
    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("TLS handshake failed"), "{}", errors[0]);
    assert!(recorder.completions().is_empty());

    // the server keeps accepting
    let mut connection = common::insecure_client(server.address().unwrap(), Some("test.com"))
        .connect_now(TIMEOUT)
        .await
        .unwrap();
    ping(&mut connection).await;

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn untrusted_certificate_fails_client_handshake() {
    let server_side = Recorder::new();
    let server = serve(
        TlsRegistry::single(common::configuration("default.local")),
        &server_side,
    )
    .await;

    let client_side = Recorder::new();
    let tls = ClientTls::with_roots(RootCertStore::empty())
        .unwrap()
        .server_name("default.local");
    let err = TcpClient::new()
        .remote_address(server.address().unwrap())
        .secure(tls)
        .observe(client_side.clone())
        .connect_now(TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Handshake(_)), "{err}");
    assert_eq!(
        client_side.states(),
        vec![
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disposed,
        ]
    );
    assert_eq!(client_side.errors().len(), 1);

    server_side.wait_for(ConnectionState::Disposed, 1).await;
    assert!(!server_side.states().contains(&ConnectionState::Configured));
    server.dispose_now(TIMEOUT).await.unwrap();
}

/// First byte of a TLS handshake record.
const HANDSHAKE_RECORD: u8 = 0x16;

#[tokio::test]
async fn transport_stages_see_records_while_hooks_see_plaintext() {
    let server_raw = Arc::new(Mutex::new(Vec::new()));
    let server_plain = Arc::new(Mutex::new(Vec::new()));
    let plain = Arc::clone(&server_plain);
    let server = TcpServer::new()
        .host("127.0.0.1")
        .port(0)
        .secure(TlsRegistry::single(common::configuration("default.local")))
        .do_on_transport(Tap::stage(Arc::clone(&server_raw)))
        .do_on_connection(move |connection| connection.map_stream(Tap::stage(Arc::clone(&plain))))
        .track_connections()
        .handle(common::echo)
        .bind_now(TIMEOUT)
        .await
        .unwrap();

    let client_raw = Arc::new(Mutex::new(Vec::new()));
    let mut connection = common::insecure_client(server.address().unwrap(), Some("default.local"))
        .do_on_transport(Tap::stage(Arc::clone(&client_raw)))
        .connect_now(TIMEOUT)
        .await
        .unwrap();
    ping(&mut connection).await;

    assert_eq!(server_raw.lock().unwrap().first(), Some(&HANDSHAKE_RECORD));
    assert_eq!(client_raw.lock().unwrap().first(), Some(&HANDSHAKE_RECORD));
    assert_eq!(server_plain.lock().unwrap().as_slice(), b"ping");
    assert!(!server_raw.lock().unwrap().windows(4).any(|w| w == b"ping"));

    drop(connection);
    server.dispose_now(TIMEOUT).await.unwrap();
}
