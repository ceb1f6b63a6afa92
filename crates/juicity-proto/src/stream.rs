//! Duplex adapter over the two halves of a data stream

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::ProtoError;
use crate::packet::{PacketReader, PacketWriter};
use crate::request::RelayRequest;

/// One data stream: a receive half and a send half presented as a single
/// `AsyncRead + AsyncWrite`. The relay-request header is consumed with
/// [`StreamConn::read_request`] before any payload is relayed.
pub struct StreamConn<R, W> {
    recv: R,
    send: W,
}

impl<R, W> StreamConn<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(recv: R, send: W) -> Self {
        Self { recv, send }
    }

    /// Consume the relay-request header at the head of the stream.
    pub async fn read_request(&mut self) -> Result<RelayRequest, ProtoError> {
        RelayRequest::read_from(&mut self.recv).await
    }

    /// Treat the rest of the stream as a framed datagram channel.
    pub fn into_packet_conn(self) -> (PacketReader<R>, PacketWriter<W>) {
        (PacketReader::new(self.recv), PacketWriter::new(self.send))
    }

    /// Borrowing variant of [`StreamConn::into_packet_conn`].
    pub fn packet_conn(&mut self) -> (PacketReader<&mut R>, PacketWriter<&mut W>) {
        (PacketReader::new(&mut self.recv), PacketWriter::new(&mut self.send))
    }

    pub fn into_parts(self) -> (R, W) {
        (self.recv, self.send)
    }
}

impl<R, W> AsyncRead for StreamConn<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().recv).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for StreamConn<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().send).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::request::Network;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_header_then_payload() {
        let mut wire = Vec::new();
        RelayRequest::new(Network::Tcp, Address::Domain("example.com".into(), 443))
            .write_to(&mut wire)
            .unwrap();
        wire.extend_from_slice(b"GET / HTTP/1.1\r\n");

        let mut out = Vec::new();
        let mut conn = StreamConn::new(wire.as_slice(), &mut out);
        let req = conn.read_request().await.unwrap();
        assert_eq!(req.destination.to_string(), "example.com:443");

        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"GET / HTTP/1.1\r\n");

        conn.write_all(b"HTTP/1.1 200 OK").await.unwrap();
        drop(conn);
        assert_eq!(out, b"HTTP/1.1 200 OK");
    }
}
