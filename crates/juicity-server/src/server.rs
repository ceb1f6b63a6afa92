//! QUIC listener

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Endpoint, IdleTimeout, MtuDiscoveryConfig, ServerConfig as QuinnServerConfig, TransportConfig, VarInt};
use tracing::{debug, info, warn};

use crate::congestion::CongestionControl;
use crate::connection::{self, ConnectionContext};
use crate::credentials::CredentialStore;
use crate::dialer::{Dialer, DirectDialer};
use crate::error::{ConfigError, ServerError};
use crate::metrics::ServerMetrics;
use crate::relay::UDP_IDLE_TIMEOUT;
use crate::{auth, benign, tls};

/// Application protocol advertised in the TLS handshake.
pub const ALPN: &[u8] = b"h3";

/// Close code sent to a client that fails authentication.
pub const AUTHENTICATION_FAILED: VarInt = VarInt::from_u32(0xffff_fff1);

/// A handshake that has not completed by then is dropped.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub const STREAM_RECEIVE_WINDOW: u32 = 8 * 1024 * 1024;
pub const CONNECTION_RECEIVE_WINDOW: u32 = 20 * 1024 * 1024;

pub const DEFAULT_MAX_INCOMING_STREAMS: u64 = 100;

/// Initial congestion window, in packets of [`INITIAL_PACKET_SIZE`] bytes.
pub const INITIAL_CWND_PACKETS: u64 = 10;
pub const INITIAL_PACKET_SIZE: u64 = 1200;

/// Everything needed to build a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub users: HashMap<String, String>,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub congestion_control: String,
    pub fwmark: u32,
    pub send_through: Option<String>,
    pub max_incoming_streams: u64,
}

pub struct Server {
    credentials: Arc<CredentialStore>,
    crypto: Arc<quinn::crypto::rustls::QuicServerConfig>,
    congestion_control: CongestionControl,
    dialer: Arc<dyn Dialer>,
    fwmark: Option<u32>,
    max_incoming_streams: u64,
    auth_timeout: Duration,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// Build the server. Fails on a malformed user id, unreadable
    /// certificate or key, or an unparsable `send_through` address.
    pub fn new(options: ServerOptions) -> Result<Self, ConfigError> {
        let credentials = CredentialStore::from_config(&options.users)?;
        let cert_chain = tls::load_cert_chain(&options.certificate)?;
        let key = tls::load_private_key(&options.private_key)?;
        let crypto = tls::server_crypto(cert_chain, key, &[ALPN])?;

        let dialer = match options.send_through.as_deref() {
            Some(ip) => DirectDialer::with_bind_ip(ip.parse::<IpAddr>()?),
            None => DirectDialer::new(),
        };
        let metrics = ServerMetrics::new()
            .map_err(|e| ConfigError::Invalid(format!("metrics registry: {}", e)))?;

        Ok(Self {
            credentials: Arc::new(credentials),
            crypto,
            congestion_control: CongestionControl::parse(&options.congestion_control),
            dialer: Arc::new(dialer),
            fwmark: (options.fwmark != 0).then_some(options.fwmark),
            max_incoming_streams: options.max_incoming_streams.max(1),
            auth_timeout: auth::AUTHENTICATE_TIMEOUT,
            metrics: Arc::new(metrics),
        })
    }

    /// Replace the outbound dialer.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Advertised stream limit: the configured limit plus 10% headroom.
    pub fn max_open_incoming_streams(&self) -> u64 {
        self.max_incoming_streams + self.max_incoming_streams.div_ceil(10)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let streams = VarInt::from_u64(self.max_open_incoming_streams()).unwrap_or(VarInt::MAX);

        let mut transport = TransportConfig::default();
        transport
            .max_concurrent_bidi_streams(streams)
            .max_concurrent_uni_streams(streams)
            .stream_receive_window(VarInt::from_u32(STREAM_RECEIVE_WINDOW))
            .receive_window(VarInt::from_u32(CONNECTION_RECEIVE_WINDOW))
            .keep_alive_interval(Some(KEEP_ALIVE_INTERVAL))
            .mtu_discovery_config(Some(MtuDiscoveryConfig::default()))
            .datagram_receive_buffer_size(None);
        if let Ok(idle) = IdleTimeout::try_from(MAX_IDLE_TIMEOUT) {
            transport.max_idle_timeout(Some(idle));
        }
        self.congestion_control
            .apply(&mut transport, INITIAL_CWND_PACKETS * INITIAL_PACKET_SIZE);
        transport
    }

    fn quinn_config(&self) -> QuinnServerConfig {
        let mut config = QuinnServerConfig::with_crypto(self.crypto.clone());
        config.transport_config(Arc::new(self.transport_config()));
        config
    }

    /// Open the QUIC endpoint on `addr` without accepting yet.
    pub fn bind(&self, addr: SocketAddr) -> Result<Endpoint, ServerError> {
        Endpoint::server(self.quinn_config(), addr).map_err(|source| ServerError::Bind { addr, source })
    }

    /// Listen on `addr` and serve until the endpoint fails.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<(), ServerError> {
        let endpoint = self.bind(addr)?;
        self.serve_endpoint(endpoint).await
    }

    /// Accept connections on an already bound endpoint. Each connection
    /// runs on its own task; only the endpoint closing ends the loop.
    pub async fn serve_endpoint(self: Arc<Self>, endpoint: Endpoint) -> Result<(), ServerError> {
        if let Ok(local) = endpoint.local_addr() {
            info!(
                listen = %local,
                congestion_control = %self.congestion_control,
                users = self.credentials.len(),
                "juicity server listening"
            );
        }

        let shared = Arc::new(ConnectionContext {
            credentials: self.credentials.clone(),
            dialer: self.dialer.clone(),
            fwmark: self.fwmark,
            metrics: self.metrics.clone(),
            auth_timeout: self.auth_timeout,
            udp_idle: UDP_IDLE_TIMEOUT,
        });

        while let Some(incoming) = endpoint.accept().await {
            let shared = shared.clone();
            tokio::spawn(async move {
                let remote = incoming.remote_address();
                let connecting = match incoming.accept() {
                    Ok(connecting) => connecting,
                    Err(e) => {
                        debug!(%remote, error = %e, "refused connection");
                        return;
                    }
                };
                let conn = match tokio::time::timeout(ACCEPT_TIMEOUT, connecting).await {
                    Ok(Ok(conn)) => conn,
                    Ok(Err(e)) => {
                        debug!(%remote, error = %e, "handshake failed");
                        return;
                    }
                    Err(_) => {
                        debug!(%remote, "handshake timed out");
                        return;
                    }
                };

                debug!(%remote, "accepted connection");
                shared.metrics.record_connection_opened();
                let result = connection::handle_connection(conn, shared.clone()).await;
                shared.metrics.record_connection_closed();
                match result {
                    Ok(()) => {}
                    Err(e) if benign::is_benign_close(&e) => {
                        debug!(%remote, reason = %e, "connection closed");
                    }
                    Err(e) => warn!(%remote, error = %e, "handle connection"),
                }
            });
        }

        Err(ServerError::EndpointClosed)
    }
}
