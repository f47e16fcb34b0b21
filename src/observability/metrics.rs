//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count connection state transitions and failures
//! - Track live connections
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `tcp_runtime_connections_total` (counter): transitions by `state`
//! - `tcp_runtime_active_connections` (gauge): connected but not yet disposed
//! - `tcp_runtime_handshake_failures_total` (counter): failed TLS handshakes
//! - `tcp_runtime_connection_errors_total` (counter): other per-connection errors
//! - `tcp_runtime_sni_resolutions_total` (counter): handshakes by `match` kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Collection is an ordinary connection observer

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{Error, Result};
use crate::net::connection::{ConnectionIdentity, ConnectionObserver, ConnectionState};
use crate::tls::registry::Match;
use crate::tls::sni::SniCompletion;

/// Observer feeding the connection metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl ConnectionObserver for MetricsObserver {
    fn on_state_change(&self, _identity: &ConnectionIdentity, state: ConnectionState) {
        counter!("tcp_runtime_connections_total", "state" => state.as_str()).increment(1);
        match state {
            ConnectionState::Connected => gauge!("tcp_runtime_active_connections").increment(1.0),
            ConnectionState::Disposed => gauge!("tcp_runtime_active_connections").decrement(1.0),
            _ => {}
        }
    }

    fn on_error(&self, _identity: &ConnectionIdentity, error: &Error) {
        match error {
            Error::Handshake(_) => counter!("tcp_runtime_handshake_failures_total").increment(1),
            _ => counter!("tcp_runtime_connection_errors_total").increment(1),
        }
    }

    fn on_sni_completion(&self, _identity: &ConnectionIdentity, completion: &SniCompletion) {
        counter!("tcp_runtime_sni_resolutions_total", "match" => match_label(&completion.matched))
            .increment(1);
    }
}

fn match_label(matched: &Match) -> &'static str {
    match matched {
        Match::Exact(_) => "exact",
        Match::Wildcard(_) => "wildcard",
        Match::Default => "default",
    }
}

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::config(format!("metrics exporter: {e}")))?;

    describe_counter!(
        "tcp_runtime_connections_total",
        "Connection state transitions by state"
    );
    describe_gauge!(
        "tcp_runtime_active_connections",
        "Connections that are connected and not yet disposed"
    );
    describe_counter!(
        "tcp_runtime_handshake_failures_total",
        "TLS handshakes that failed"
    );
    describe_counter!(
        "tcp_runtime_connection_errors_total",
        "Per-connection errors other than handshake failures"
    );
    describe_counter!(
        "tcp_runtime_sni_resolutions_total",
        "Completed server handshakes by registry match kind"
    );

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::Endpoint;
    use crate::tls::registry::DomainPattern;

    #[test]
    fn match_labels() {
        assert_eq!(match_label(&Match::Default), "default");
        assert_eq!(
            match_label(&Match::Wildcard(DomainPattern::parse("*.test.com").unwrap())),
            "wildcard"
        );
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        let identity = ConnectionIdentity::new(Endpoint::Unix(None), Endpoint::Unix(None));
        let observer = MetricsObserver;
        observer.on_state_change(&identity, ConnectionState::Connected);
        observer.on_state_change(&identity, ConnectionState::Disposed);
        observer.on_error(&identity, &Error::Handshake("bad record".into()));
    }
}
