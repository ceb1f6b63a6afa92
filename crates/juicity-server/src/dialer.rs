//! Outbound dialing
//!
//! The server dials destinations on behalf of authenticated clients. A
//! dialer is shared by every connection and stream, so implementations must
//! be safe for concurrent use.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use juicity_proto::Address;
use tokio::net::{lookup_host, TcpSocket, TcpStream, UdpSocket};
use tracing::trace;

/// Upper bound on a single outbound dial, resolution included.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to `target`. A connect that does not finish in
    /// time fails with `io::ErrorKind::TimedOut`.
    async fn dial_tcp(&self, target: &Address, mark: Option<u32>) -> io::Result<TcpStream>;

    /// Open a UDP socket that exchanges datagrams with `target` only. Fails
    /// with `io::ErrorKind::TimedOut` when resolution does not finish in time.
    async fn dial_udp(&self, target: &Address, mark: Option<u32>) -> io::Result<UdpSocket>;
}

/// Dials straight from this host, optionally from a fixed source address.
#[derive(Debug, Clone)]
pub struct DirectDialer {
    bind_ip: Option<IpAddr>,
    connect_timeout: Duration,
}

impl DirectDialer {
    /// Dial from whatever source address the routing table picks.
    pub fn new() -> Self {
        Self {
            bind_ip: None,
            connect_timeout: DIAL_TIMEOUT,
        }
    }

    /// Dial every outbound socket from `ip`. Destinations that only resolve
    /// to the other address family cannot be reached.
    pub fn with_bind_ip(ip: IpAddr) -> Self {
        Self {
            bind_ip: Some(ip),
            connect_timeout: DIAL_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn bind_ip(&self) -> Option<IpAddr> {
        self.bind_ip
    }

    async fn resolve(&self, target: &Address) -> io::Result<Vec<SocketAddr>> {
        let candidates: Vec<SocketAddr> = match target {
            Address::Socket(addr) => vec![*addr],
            Address::Domain(host, port) => lookup_host((host.as_str(), *port)).await?.collect(),
        };
        let candidates: Vec<SocketAddr> = match self.bind_ip {
            Some(ip) => candidates
                .into_iter()
                .filter(|addr| addr.is_ipv4() == ip.is_ipv4())
                .collect(),
            None => candidates,
        };
        if candidates.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no usable address for {}", target),
            ));
        }
        Ok(candidates)
    }

    async fn connect_one(&self, addr: SocketAddr, mark: Option<u32>) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        apply_mark(&socket, mark)?;
        if let Some(ip) = self.bind_ip {
            socket.bind(SocketAddr::new(ip, 0))?;
        }
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Default for DirectDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial_tcp(&self, target: &Address, mark: Option<u32>) -> io::Result<TcpStream> {
        let attempt = async {
            let mut last_err = None;
            for addr in self.resolve(target).await? {
                match self.connect_one(addr, mark).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        trace!(%addr, error = %e, "connect attempt failed");
                        last_err = Some(e);
                    }
                }
            }
            Err::<TcpStream, io::Error>(
                last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
            )
        };
        tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("dial {} timed out", target))
            })?
    }

    async fn dial_udp(&self, target: &Address, mark: Option<u32>) -> io::Result<UdpSocket> {
        let attempt = async {
            let addr = self.resolve(target).await?[0];
            let local_ip = self.bind_ip.unwrap_or(if addr.is_ipv4() {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            });
            let socket = std::net::UdpSocket::bind(SocketAddr::new(local_ip, 0))?;
            socket.set_nonblocking(true)?;
            apply_mark(&socket, mark)?;
            let socket = UdpSocket::from_std(socket)?;
            socket.connect(addr).await?;
            Ok::<UdpSocket, io::Error>(socket)
        };
        tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("dial {} timed out", target))
            })?
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
fn apply_mark<S: std::os::fd::AsFd>(socket: &S, mark: Option<u32>) -> io::Result<()> {
    match mark {
        Some(mark) if mark != 0 => socket2::SockRef::from(socket).set_mark(mark),
        _ => Ok(()),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
fn apply_mark<S>(_socket: &S, _mark: Option<u32>) -> io::Result<()> {
    Ok(())
}
