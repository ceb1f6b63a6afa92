//! Per-stream dispatch
//!
//! Every data stream is parsed, held at the authentication gate, then handed
//! to the TCP or UDP relay. Nothing is dialed for a stream until the gate
//! has opened for its connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use juicity_proto::{Network, RelayRequest, StreamConn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::benign;
use crate::dialer::Dialer;
use crate::error::StreamError;
use crate::gate::AuthGate;
use crate::metrics::ServerMetrics;
use crate::relay;

/// Everything a stream task needs from its connection.
#[derive(Clone)]
pub struct StreamContext {
    pub gate: AuthGate,
    pub dialer: Arc<dyn Dialer>,
    pub fwmark: Option<u32>,
    pub remote: SocketAddr,
    pub metrics: Arc<ServerMetrics>,
    pub udp_idle: Duration,
}

/// Serve one data stream to completion. The send half is finished on every
/// path out.
pub async fn handle_stream<R, W>(recv: R, send: W, ctx: &StreamContext) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut conn = StreamConn::new(recv, send);
    let result = dispatch(&mut conn, ctx).await;
    let _ = conn.shutdown().await;
    result
}

async fn dispatch<R, W>(conn: &mut StreamConn<R, W>, ctx: &StreamContext) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = match conn.read_request().await {
        Ok(request) => request,
        Err(e) => {
            // A malformed header is only reported once the connection has
            // authenticated. Before that it ends as cancelled.
            let err = StreamError::from(e);
            if !err.is_benign() {
                ctx.gate.wait().await?;
            }
            return Err(err);
        }
    };
    let user = ctx.gate.wait().await?;
    ctx.metrics.record_stream(request.network.as_str());

    match request.network {
        Network::Tcp => relay_tcp(conn, &request, user, ctx).await,
        Network::Udp => relay_udp(conn, &request, user, ctx).await,
    }
}

async fn relay_tcp<R, W>(
    conn: &mut StreamConn<R, W>,
    request: &RelayRequest,
    user: Uuid,
    ctx: &StreamContext,
) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let target = &request.destination;
    let remote = match ctx.dialer.dial_tcp(target, ctx.fwmark).await {
        Ok(remote) => remote,
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            debug!(remote = %ctx.remote, %user, %target, "dial timed out");
            return Ok(());
        }
        Err(source) => {
            return Err(StreamError::Dial {
                target: target.to_string(),
                source,
            })
        }
    };
    debug!(remote = %ctx.remote, %user, %target, network = "tcp", "relaying");

    match relay::relay_tcp(conn, remote).await {
        Ok((up, down)) => {
            ctx.metrics.record_relayed(up, down);
            Ok(())
        }
        Err(e) if benign::is_benign_io(&e) => {
            debug!(remote = %ctx.remote, %target, error = %e, "tcp relay ended");
            Ok(())
        }
        Err(e) => Err(StreamError::TcpRelay(e)),
    }
}

async fn relay_udp<R, W>(
    conn: &mut StreamConn<R, W>,
    request: &RelayRequest,
    user: Uuid,
    ctx: &StreamContext,
) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    debug!(remote = %ctx.remote, %user, target = %request.destination, network = "udp", "relaying");
    let (mut reader, mut writer) = conn.packet_conn();
    let result = relay::relay_udp(
        ctx.dialer.clone(),
        &mut reader,
        &mut writer,
        ctx.fwmark,
        ctx.udp_idle,
    )
    .await;

    match result {
        Ok((up, down)) => {
            ctx.metrics.record_relayed(up, down);
            Ok(())
        }
        Err(e) if benign::is_benign_io(&e) => {
            debug!(remote = %ctx.remote, error = %e, "udp relay ended");
            Ok(())
        }
        Err(e) => Err(StreamError::UdpRelay(e)),
    }
}
