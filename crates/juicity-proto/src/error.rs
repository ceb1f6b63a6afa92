//! Wire-level errors

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown address type: {0:#04x}")]
    UnknownAddressType(u8),
    #[error("invalid domain name")]
    InvalidDomain,
    #[error("unexpected network: {0:#04x}")]
    UnexpectedNetwork(u8),
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

impl ProtoError {
    /// True when the peer finished the stream before a complete frame arrived.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtoError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl From<ProtoError> for io::Error {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
