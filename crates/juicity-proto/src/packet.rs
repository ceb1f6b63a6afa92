//! UDP-over-stream packet framing
//!
//! Format: ADDRESS || LENGTH (2 bytes BE) || PAYLOAD
//!
//! Client to server, ADDRESS names the destination; server to client it
//! names the peer the datagram came from.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::address::Address;
use crate::error::ProtoError;

/// Largest payload one frame can carry.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Reads framed datagrams from the receive half of a stream.
pub struct PacketReader<R> {
    inner: R,
}

impl<R> PacketReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next datagram, or `None` when the peer finished the stream on a
    /// frame boundary.
    pub async fn read_packet(&mut self) -> Result<Option<(Address, Bytes)>, ProtoError> {
        let atyp = match self.inner.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let addr = Address::read_with_type(atyp, &mut self.inner).await?;
        let len = self.inner.read_u16().await? as usize;
        let mut payload = BytesMut::zeroed(len);
        self.inner.read_exact(&mut payload).await?;
        Ok(Some((addr, payload.freeze())))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes framed datagrams to the send half of a stream.
pub struct PacketWriter<W> {
    inner: W,
    buf: BytesMut,
}

impl<W> PacketWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(2048),
        }
    }

    pub async fn write_packet(&mut self, addr: &Address, payload: &[u8]) -> Result<(), ProtoError> {
        if payload.len() > MAX_PACKET_SIZE {
            return Err(ProtoError::PacketTooLarge(payload.len()));
        }
        self.buf.clear();
        self.buf.reserve(addr.encoded_len() + 2 + payload.len());
        addr.write_to(&mut self.buf)?;
        self.buf.put_u16(payload.len() as u16);
        self.buf.put_slice(payload);
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtoError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_frames_then_clean_eof() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = PacketWriter::new(client);
        let a: Address = "10.0.0.1:53".parse::<std::net::SocketAddr>().unwrap().into();
        let b = Address::Domain("dns.example".into(), 5353);
        writer.write_packet(&a, b"first").await.unwrap();
        writer.write_packet(&b, b"").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = PacketReader::new(server);
        assert_eq!(reader.read_packet().await.unwrap(), Some((a, Bytes::from_static(b"first"))));
        assert_eq!(reader.read_packet().await.unwrap(), Some((b, Bytes::new())));
        assert_eq!(reader.read_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_eof_error() {
        let mut bytes = Vec::new();
        Address::Domain("x.y".into(), 1).write_to(&mut bytes).unwrap();
        bytes.put_u16(10);
        bytes.put_slice(b"short");
        let mut reader = PacketReader::new(bytes.as_slice());
        let err = reader.read_packet().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let mut writer = PacketWriter::new(Vec::new());
        let addr = Address::Domain("x.y".into(), 1);
        let payload = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            writer.write_packet(&addr, &payload).await,
            Err(ProtoError::PacketTooLarge(_))
        ));
        assert!(writer.into_inner().is_empty());
    }

    /// Property: any sequence of datagrams framed onto one stream is read back
    /// in order with destinations and payloads intact.
    #[test]
    fn prop_packet_sequence_preserved() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        proptest!(|(
            packets in prop::collection::vec(
                (any::<[u8; 4]>(), 1u16..=u16::MAX, prop::collection::vec(any::<u8>(), 0..=512)),
                1..=16,
            ),
        )| {
            rt.block_on(async {
                let mut wire = Vec::new();
                {
                    let mut writer = PacketWriter::new(&mut wire);
                    for (ip, port, payload) in &packets {
                        let addr = Address::Socket((*ip, *port).into());
                        writer.write_packet(&addr, payload).await.unwrap();
                    }
                }
                let mut reader = PacketReader::new(wire.as_slice());
                for (ip, port, payload) in &packets {
                    let (addr, data) = reader.read_packet().await.unwrap().unwrap();
                    assert_eq!(addr, Address::Socket((*ip, *port).into()));
                    assert_eq!(&data[..], &payload[..]);
                }
                assert!(reader.read_packet().await.unwrap().is_none());
            });
        });
    }
}
