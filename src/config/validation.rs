//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Detect conflicting address settings and malformed SNI patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Files are not opened here; missing certificates surface when the
//!   registry is built

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;
use crate::lifecycle::deadline::MAX_TIMEOUT;
use crate::observability::logging::parse_filter;
use crate::tls::registry::DomainPattern;

/// One semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_timeout(errors: &mut Vec<ValidationError>, field: &str, millis: u64) {
    if millis == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    } else if std::time::Duration::from_millis(millis) > MAX_TIMEOUT {
        errors.push(ValidationError::new(field, "too large"));
    }
}

/// Validate `config`, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if let Err(e) = listener.address_options().target() {
        errors.push(ValidationError::new("listener", e.to_string()));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }
    check_timeout(&mut errors, "listener.bind_timeout_ms", listener.bind_timeout_ms);

    if let Some(tls) = &config.tls {
        check_timeout(&mut errors, "tls.handshake_timeout_ms", tls.handshake_timeout_ms);
        if tls.alpn.as_ref().is_some_and(|alpn| alpn.iter().any(String::is_empty)) {
            errors.push(ValidationError::new("tls.alpn", "protocol names must not be empty"));
        }

        let mut seen = HashSet::new();
        for (i, entry) in tls.sni.iter().enumerate() {
            let field = format!("tls.sni[{i}].domain");
            match DomainPattern::parse(&entry.domain) {
                Ok(pattern) => {
                    if !seen.insert(pattern.clone()) {
                        errors.push(ValidationError::new(field, format!("duplicate pattern '{pattern}'")));
                    }
                }
                Err(e) => errors.push(ValidationError::new(field, e.to_string())),
            }
        }
    }

    check_timeout(&mut errors, "shutdown.drain_timeout_ms", config.shutdown.drain_timeout_ms);

    let observability = &config.observability;
    if let Err(e) = parse_filter(&observability.log_level) {
        errors.push(ValidationError::new("observability.log_level", e.to_string()));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{SniEntry, TlsConfig};

    fn tls(domains: &[&str]) -> TlsConfig {
        TlsConfig {
            cert_path: "default.pem".into(),
            key_path: "default.key".into(),
            cipher_suites: Vec::new(),
            protocol_versions: Vec::new(),
            alpn: None,
            flavor: Default::default(),
            handshake_timeout_ms: 1_000,
            sni: domains
                .iter()
                .map(|d| SniEntry {
                    domain: d.to_string(),
                    cert_path: "x.pem".into(),
                    key_path: "x.key".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.host = Some("127.0.0.1".into());
        config.listener.unix_path = Some("/tmp/server.sock".into());
        config.listener.max_connections = 0;
        config.shutdown.drain_timeout_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["listener", "listener.max_connections", "shutdown.drain_timeout_ms"]
        );
    }

    #[test]
    fn sni_patterns_are_checked() {
        let config = ServerConfig {
            tls: Some(tls(&["*.test.com", "", "*.TEST.com.", "a.*.com"])),
            ..Default::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field, "tls.sni[1].domain");
        assert!(errors[1].message.contains("duplicate"));
        assert_eq!(errors[2].field, "tls.sni[3].domain");
    }

    #[test]
    fn transport_capability_is_left_to_bind() {
        let mut config = ServerConfig::default();
        config.listener.unix_path = Some("/tmp/server.sock".into());
        config.listener.native_transport = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn bad_metrics_address() {
        let mut config = ServerConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_err());
    }
}
