//! Relay-request header carried at the start of every data stream
//!
//! Format: NETWORK (1) || ADDRESS

use std::fmt;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::address::Address;
use crate::error::ProtoError;

pub const NETWORK_TCP: u8 = 0x01;
pub const NETWORK_UDP: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

impl TryFrom<u8> for Network {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            NETWORK_TCP => Ok(Network::Tcp),
            NETWORK_UDP => Ok(Network::Udp),
            other => Err(ProtoError::UnexpectedNetwork(other)),
        }
    }
}

impl From<Network> for u8 {
    fn from(value: Network) -> Self {
        match value {
            Network::Tcp => NETWORK_TCP,
            Network::Udp => NETWORK_UDP,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed header of one data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub network: Network,
    pub destination: Address,
}

impl RelayRequest {
    pub fn new(network: Network, destination: Address) -> Self {
        Self {
            network,
            destination,
        }
    }

    pub async fn read_from<R>(r: &mut R) -> Result<Self, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        let network = Network::try_from(r.read_u8().await?)?;
        let destination = Address::read_from(r).await?;
        Ok(Self {
            network,
            destination,
        })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtoError> {
        buf.put_u8(self.network.into());
        self.destination.write_to(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_request() {
        let req = RelayRequest::new(Network::Tcp, Address::Domain("example.com".into(), 80));
        let mut buf = Vec::new();
        req.write_to(&mut buf).unwrap();
        assert_eq!(buf[0], NETWORK_TCP);

        let decoded = RelayRequest::read_from(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.network.to_string(), "tcp");
    }

    #[tokio::test]
    async fn test_unexpected_network_stops_before_address() {
        let bytes = [0x02u8, 0x01, 1, 1, 1, 1, 0, 53];
        let mut r = &bytes[..];
        let err = RelayRequest::read_from(&mut r).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnexpectedNetwork(0x02)));
        assert_eq!(r.len(), bytes.len() - 1);
    }
}
