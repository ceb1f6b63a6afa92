//! juicity-server: QUIC proxy server for the juicity protocol
//!
//! Clients authenticate each QUIC connection once over a unidirectional
//! control stream, then open one bidirectional stream per TCP connection or
//! UDP session they want relayed. The server dials the destinations itself.

pub mod auth;
pub mod benign;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod credentials;
pub mod dialer;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod tls;

pub use config::ServerConfig;
pub use congestion::CongestionControl;
pub use credentials::CredentialStore;
pub use dialer::{Dialer, DirectDialer};
pub use error::{AuthError, ConfigError, ServerError, StreamError};
pub use metrics::ServerMetrics;
pub use server::{Server, ServerOptions, AUTHENTICATION_FAILED};
