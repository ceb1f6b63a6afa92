//! Error types for each layer of the server

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use juicity_proto::{CommandType, ProtoError};
use thiserror::Error;
use uuid::Uuid;

use crate::benign;

/// Startup failures. The process must not start when any of these occur.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("parse uuid({id}): {source}")]
    InvalidUser {
        id: String,
        #[source]
        source: uuid::Error,
    },
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("parse send_through: {0}")]
    SendThrough(#[from] std::net::AddrParseError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of the one-time authentication on a connection's control stream.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unexpected version: {0:#04x}")]
    UnexpectedVersion(u8),
    #[error("unexpected cmd type: {0}")]
    UnexpectedCmdType(CommandType),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(Uuid),
    #[error("authentication timed out")]
    Timeout,
    #[error("accept control stream: {0}")]
    Connection(#[from] quinn::ConnectionError),
    #[error("read command: {0}")]
    Protocol(#[from] ProtoError),
    #[error("export keying material failed")]
    KeyingMaterial,
}

impl AuthError {
    /// The peer went away before authenticating; nothing worth a warning.
    pub fn is_benign(&self) -> bool {
        match self {
            AuthError::Connection(e) => benign::is_benign_close(e),
            _ => false,
        }
    }
}

/// Failures confined to a single data stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("read relay request: {0}")]
    Header(ProtoError),
    #[error("unexpected network: {0:#04x}")]
    UnexpectedNetwork(u8),
    #[error("connection cancelled before authentication succeeded")]
    Cancelled,
    #[error("dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("tcp relay error: {0}")]
    TcpRelay(#[source] io::Error),
    #[error("udp relay error: {0}")]
    UdpRelay(#[source] io::Error),
}

impl StreamError {
    /// Routine outcomes that are logged at debug level instead of warn.
    pub fn is_benign(&self) -> bool {
        match self {
            StreamError::Header(e) => e.is_eof(),
            StreamError::Cancelled => true,
            _ => false,
        }
    }
}

impl From<ProtoError> for StreamError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::UnexpectedNetwork(n) => StreamError::UnexpectedNetwork(n),
            other => StreamError::Header(other),
        }
    }
}

/// Listener-level failures; these stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("QUIC endpoint closed")]
    EndpointClosed,
}
