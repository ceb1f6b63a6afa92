//! Control-stream commands
//!
//! Format: VER (1) || TYPE (1) || BODY
//!
//! The authenticate body is UUID (16) || TOKEN (32). It is the only command
//! a server accepts on the control stream; the other types are named so that
//! diagnostics can say what was sent instead.

use std::fmt;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::error::ProtoError;

/// The only protocol version this implementation speaks.
pub const VERSION_0: u8 = 0x00;

/// Length of an authentication token.
pub const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Authenticate,
    Connect,
    Packet,
    Dissociate,
    Heartbeat,
    Unknown(u8),
}

impl From<u8> for CommandType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => CommandType::Authenticate,
            0x01 => CommandType::Connect,
            0x02 => CommandType::Packet,
            0x03 => CommandType::Dissociate,
            0x04 => CommandType::Heartbeat,
            other => CommandType::Unknown(other),
        }
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        match value {
            CommandType::Authenticate => 0x00,
            CommandType::Connect => 0x01,
            CommandType::Packet => 0x02,
            CommandType::Dissociate => 0x03,
            CommandType::Heartbeat => 0x04,
            CommandType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Authenticate => f.write_str("authenticate"),
            CommandType::Connect => f.write_str("connect"),
            CommandType::Packet => f.write_str("packet"),
            CommandType::Dissociate => f.write_str("dissociate"),
            CommandType::Heartbeat => f.write_str("heartbeat"),
            CommandType::Unknown(v) => write!(f, "unknown({:#04x})", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHead {
    pub version: u8,
    pub kind: CommandType,
}

impl CommandHead {
    /// Read the command type that follows an already consumed version byte.
    pub async fn read_after_version<R>(version: u8, r: &mut R) -> Result<Self, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        let kind = CommandType::from(r.read_u8().await?);
        Ok(Self { version, kind })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.kind.into());
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub uuid: Uuid,
    pub token: [u8; TOKEN_LEN],
}

impl Authenticate {
    /// Read the authenticate body; the head must already be consumed.
    pub async fn read_body<R>(r: &mut R) -> Result<Self, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        let mut uuid = [0u8; 16];
        r.read_exact(&mut uuid).await?;
        let mut token = [0u8; TOKEN_LEN];
        r.read_exact(&mut token).await?;
        Ok(Self {
            uuid: Uuid::from_bytes(uuid),
            token,
        })
    }

    /// Encode the full command including its head.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 16 + TOKEN_LEN);
        CommandHead {
            version: VERSION_0,
            kind: CommandType::Authenticate,
        }
        .write_to(&mut buf);
        buf.put_slice(self.uuid.as_bytes());
        buf.put_slice(&self.token);
        buf
    }
}

// Tokens are credentials; keep them out of debug output.
impl fmt::Debug for Authenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticate")
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_authenticate_layout() {
        let auth = Authenticate {
            uuid: Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff),
            token: [7u8; TOKEN_LEN],
        };
        let encoded = auth.encode();
        assert_eq!(encoded.len(), 50);
        assert_eq!(&encoded[..2], &[VERSION_0, 0x00]);

        let mut r = encoded.as_slice();
        let version = r.read_u8().await.unwrap();
        let head = CommandHead::read_after_version(version, &mut r).await.unwrap();
        assert_eq!(head.kind, CommandType::Authenticate);
        let decoded = Authenticate::read_body(&mut r).await.unwrap();
        assert_eq!(decoded, auth);
    }

    #[tokio::test]
    async fn test_short_token_is_eof() {
        let mut body = vec![0u8; 16];
        body.extend_from_slice(&[1u8; 10]);
        let err = Authenticate::read_body(&mut body.as_slice()).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn test_command_type_names() {
        assert_eq!(CommandType::from(0x04), CommandType::Heartbeat);
        assert_eq!(CommandType::from(0x42).to_string(), "unknown(0x42)");
        assert_eq!(u8::from(CommandType::Dissociate), 0x03);
    }

    #[test]
    fn test_debug_hides_token() {
        let auth = Authenticate {
            uuid: Uuid::nil(),
            token: [0xab; TOKEN_LEN],
        };
        assert!(!format!("{:?}", auth).contains("171"));
    }
}
