//! TLS subsystem.
//!
//! # Data Flow
//! ```text
//! PEM files (pem.rs)
//!     → TlsConfiguration (configuration.rs: rustls ServerConfig + metadata)
//!     → TlsRegistry (registry.rs: default + per-domain patterns, frozen)
//!     → SniResolver (sni.rs: ClientHello → configuration → handshake)
//! ```

pub mod configuration;
pub mod pem;
pub mod registry;
pub mod sni;

pub use configuration::{
    DefaultFlavor, HandshakeHook, HandshakeInfo, TlsConfiguration, TlsConfigurationBuilder,
    TlsVersion, DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use registry::{DomainPattern, Match, Resolution, TlsRegistry, TlsRegistryBuilder};
pub use sni::{HandshakeState, Secured, SniCompletion, SniResolver};
