//! Destination address codec
//!
//! Format: ATYP (1) || ADDR || PORT (2 bytes BE)
//!
//! | ATYP | ADDR                               |
//! |------|------------------------------------|
//! | 0x01 | IPv4, 4 bytes                      |
//! | 0x03 | domain, 1 byte length + UTF-8 name |
//! | 0x04 | IPv6, 16 bytes                     |

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtoError;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// A relay destination, either a literal socket address or a hostname
/// that the dialer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Socket(SocketAddr),
    Domain(String, u16),
}

impl Address {
    /// Read one address from the stream.
    pub async fn read_from<R>(r: &mut R) -> Result<Self, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = r.read_u8().await?;
        Self::read_with_type(atyp, r).await
    }

    /// Read the rest of an address whose type byte was already consumed.
    pub async fn read_with_type<R>(atyp: u8, r: &mut R) -> Result<Self, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        match atyp {
            ATYP_IPV4 => {
                let mut ip = [0u8; 4];
                r.read_exact(&mut ip).await?;
                let port = r.read_u16().await?;
                Ok(Address::Socket(SocketAddr::new(Ipv4Addr::from(ip).into(), port)))
            }
            ATYP_IPV6 => {
                let mut ip = [0u8; 16];
                r.read_exact(&mut ip).await?;
                let port = r.read_u16().await?;
                Ok(Address::Socket(SocketAddr::new(Ipv6Addr::from(ip).into(), port)))
            }
            ATYP_DOMAIN => {
                let len = r.read_u8().await? as usize;
                if len == 0 {
                    return Err(ProtoError::InvalidDomain);
                }
                let mut name = vec![0u8; len];
                r.read_exact(&mut name).await?;
                let name = String::from_utf8(name).map_err(|_| ProtoError::InvalidDomain)?;
                let port = r.read_u16().await?;
                Ok(Address::Domain(name, port))
            }
            other => Err(ProtoError::UnknownAddressType(other)),
        }
    }

    /// Append the encoded address to `buf`.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtoError> {
        match self {
            Address::Socket(SocketAddr::V4(addr)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Socket(SocketAddr::V6(addr)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Domain(name, port) => {
                if name.is_empty() || name.len() > u8::MAX as usize {
                    return Err(ProtoError::InvalidDomain);
                }
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    /// Size of the encoded form in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::Socket(SocketAddr::V4(_)) => 1 + 4 + 2,
            Address::Socket(SocketAddr::V6(_)) => 1 + 16 + 2,
            Address::Domain(name, _) => 1 + 1 + name.len() + 2,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Hostname part without the port; IPv6 literals are not bracketed.
    pub fn host(&self) -> String {
        match self {
            Address::Socket(addr) => addr.ip().to_string(),
            Address::Domain(name, _) => name.clone(),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<Address, ProtoError> {
        let mut r = bytes;
        Address::read_from(&mut r).await
    }

    #[tokio::test]
    async fn test_decode_ipv4() {
        let addr = decode(&[0x01, 127, 0, 0, 1, 0x1f, 0x90]).await.unwrap();
        assert_eq!(addr, Address::Socket("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_decode_domain() {
        let mut bytes = vec![0x03, 11];
        bytes.extend_from_slice(b"example.com");
        bytes.extend_from_slice(&80u16.to_be_bytes());
        let addr = decode(&bytes).await.unwrap();
        assert_eq!(addr, Address::Domain("example.com".into(), 80));
        assert_eq!(addr.to_string(), "example.com:80");
        assert_eq!(addr.encoded_len(), bytes.len());
    }

    #[tokio::test]
    async fn test_ipv6_display_is_bracketed() {
        let addr = Address::Socket("[::1]:53".parse().unwrap());
        let mut buf = Vec::new();
        addr.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), addr.encoded_len());
        assert_eq!(decode(&buf).await.unwrap().to_string(), "[::1]:53");
        assert_eq!(addr.host(), "::1");
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let err = decode(&[0x02, 0, 0]).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnknownAddressType(0x02)));
    }

    #[tokio::test]
    async fn test_truncated_is_eof() {
        let err = decode(&[0x01, 10, 0]).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_empty_domain_rejected() {
        let err = decode(&[0x03, 0, 0, 80]).await.unwrap_err();
        assert!(matches!(err, ProtoError::InvalidDomain));

        let mut buf = Vec::new();
        assert!(Address::Domain(String::new(), 80).write_to(&mut buf).is_err());
        assert!(Address::Domain("a".repeat(256), 80).write_to(&mut buf).is_err());
    }
}
