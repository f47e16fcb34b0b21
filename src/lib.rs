//! TCP server/client runtime with connection lifecycle tracking, SNI-driven
//! TLS configuration and graceful shutdown.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod tls;

pub use client::{ClientTls, TcpClient};
pub use config::schema::ServerConfig;
pub use error::{Error, Result};
pub use lifecycle::Shutdown;
pub use net::{Connection, ConnectionGroup, ConnectionIdentity, ConnectionObserver, ConnectionState};
pub use server::{DisposableServer, TcpServer};
pub use tls::{SniCompletion, SniResolver, TlsConfiguration, TlsRegistry};
