//! Relay executors
//!
//! TCP streams are spliced to the outbound connection. UDP sessions carry
//! framed datagrams for any number of destinations. Each destination is
//! served by its own task, which dials, owns the connected socket, and frames
//! replies back onto the stream through a single writer. A destination task
//! that idles out releases its socket; the next datagram for it redials.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use juicity_proto::{Address, PacketReader, PacketWriter, MAX_PACKET_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::debug;

use crate::dialer::Dialer;

/// A UDP session with no traffic in either direction for this long ends.
pub const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

const REPLY_QUEUE: usize = 128;

/// Datagrams held for one destination while it is being dialed. Overflow is
/// dropped.
const PENDING_QUEUE: usize = 64;

/// Splice `local` and `remote` until both directions finish.
/// Returns `(upload, download)` byte counts.
pub async fn relay_tcp<S>(local: &mut S, mut remote: TcpStream) -> io::Result<(u64, u64)>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy_bidirectional(local, &mut remote).await
}

/// Relay framed datagrams between the stream and their destinations.
///
/// Ends cleanly when the client finishes its side of the stream, and with
/// `TimedOut` after `idle` without traffic. A destination that cannot be
/// dialed or written to only loses its own datagrams; a slow dial never holds
/// up other destinations. A destination with no traffic for `idle` is
/// released while the session goes on.
/// Returns `(upload, download)` payload byte counts.
pub async fn relay_udp<R, W>(
    dialer: Arc<dyn Dialer>,
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    mark: Option<u32>,
    idle: Duration,
) -> io::Result<(u64, u64)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<(Address, Bytes)>(REPLY_QUEUE);
    let (released_tx, mut released_rx) = mpsc::unbounded_channel::<Address>();
    let mut destinations = JoinSet::new();
    let uploaded = Arc::new(AtomicU64::new(0));
    let downloaded = AtomicU64::new(0);
    let activity = AtomicU64::new(0);

    let upstream = async {
        let mut sessions: HashMap<Address, mpsc::Sender<Bytes>> = HashMap::new();
        while let Some((dest, payload)) = reader.read_packet().await? {
            activity.fetch_add(1, Ordering::Relaxed);

            while let Ok(gone) = released_rx.try_recv() {
                if sessions.get(&gone).is_some_and(|queue| queue.is_closed()) {
                    sessions.remove(&gone);
                }
            }
            while destinations.try_join_next().is_some() {}

            let payload = match sessions.get(&dest) {
                Some(queue) => match queue.try_send(payload) {
                    Ok(()) => continue,
                    Err(TrySendError::Full(_)) => {
                        debug!(target = %dest, "udp destination backlogged, dropping datagram");
                        continue;
                    }
                    Err(TrySendError::Closed(payload)) => payload,
                },
                None => payload,
            };

            let (queue, pending) = mpsc::channel(PENDING_QUEUE);
            // Fresh queue with room to spare.
            let _ = queue.try_send(payload);
            sessions.insert(dest.clone(), queue);
            destinations.spawn(serve_destination(Destination {
                dialer: dialer.clone(),
                target: dest,
                mark,
                pending,
                replies: tx.clone(),
                released: released_tx.clone(),
                uploaded: uploaded.clone(),
                idle,
            }));
        }
        Ok::<(), io::Error>(())
    };

    let downstream = async {
        while let Some((from, payload)) = rx.recv().await {
            activity.fetch_add(1, Ordering::Relaxed);
            writer.write_packet(&from, &payload).await?;
            downloaded.fetch_add(payload.len() as u64, Ordering::Relaxed);
        }
        Ok::<(), io::Error>(())
    };

    let watchdog = async {
        let mut seen = activity.load(Ordering::Relaxed);
        loop {
            tokio::time::sleep(idle).await;
            let now = activity.load(Ordering::Relaxed);
            if now == seen {
                return io::Error::new(io::ErrorKind::TimedOut, "udp session idle");
            }
            seen = now;
        }
    };

    let result = tokio::select! {
        r = upstream => r,
        r = downstream => r,
        e = watchdog => Err(e),
    };
    destinations.shutdown().await;
    result?;

    Ok((
        uploaded.load(Ordering::Relaxed),
        downloaded.load(Ordering::Relaxed),
    ))
}

/// One destination of a UDP session.
struct Destination {
    dialer: Arc<dyn Dialer>,
    target: Address,
    mark: Option<u32>,
    pending: mpsc::Receiver<Bytes>,
    replies: mpsc::Sender<(Address, Bytes)>,
    released: mpsc::UnboundedSender<Address>,
    uploaded: Arc<AtomicU64>,
    idle: Duration,
}

/// Dial the destination, then forward datagrams both ways until it fails,
/// sits idle, or the session goes away. The socket is dropped before the
/// session is told the destination is released.
async fn serve_destination(mut dest: Destination) {
    forward(&mut dest).await;
    dest.pending.close();
    let _ = dest.released.send(dest.target);
}

async fn forward(dest: &mut Destination) {
    let socket = match dest.dialer.dial_udp(&dest.target, dest.mark).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(target = %dest.target, error = %e, "udp dial failed, dropping datagrams");
            return;
        }
    };

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            datagram = dest.pending.recv() => {
                let Some(datagram) = datagram else { return };
                match socket.send(&datagram).await {
                    Ok(n) => {
                        dest.uploaded.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(e) => debug!(target = %dest.target, error = %e, "udp send failed, dropping datagram"),
                }
            }
            received = socket.recv(&mut buf) => {
                let n = match received {
                    Ok(n) => n,
                    Err(e) => {
                        debug!(peer = %dest.target, error = %e, "udp receive failed");
                        return;
                    }
                };
                let reply = (dest.target.clone(), Bytes::copy_from_slice(&buf[..n]));
                if dest.replies.send(reply).await.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep(dest.idle) => {
                debug!(target = %dest.target, "udp destination idle");
                return;
            }
        }
    }
}
