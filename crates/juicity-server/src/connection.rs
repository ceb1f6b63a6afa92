//! Connection orchestration
//!
//! One task per QUIC connection accepts data streams while a second task
//! authenticates the connection over its control stream. The two meet at
//! the connection's [`AuthGate`].

use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, ConnectionError};
use tracing::{debug, warn};

use crate::auth;
use crate::benign;
use crate::credentials::CredentialStore;
use crate::dialer::Dialer;
use crate::dispatch::{self, StreamContext};
use crate::error::AuthError;
use crate::gate::AuthGate;
use crate::metrics::ServerMetrics;
use crate::server::AUTHENTICATION_FAILED;

/// State shared by every connection of one server.
pub struct ConnectionContext {
    pub credentials: Arc<CredentialStore>,
    pub dialer: Arc<dyn Dialer>,
    pub fwmark: Option<u32>,
    pub metrics: Arc<ServerMetrics>,
    pub auth_timeout: Duration,
    pub udp_idle: Duration,
}

/// Drive one connection until it closes.
///
/// Returns `Ok` for a routine end: the peer closed, the connection idled
/// out, or it was torn down after failing authentication.
pub async fn handle_connection(
    conn: Connection,
    shared: Arc<ConnectionContext>,
) -> Result<(), ConnectionError> {
    let remote = conn.remote_address();
    let gate = AuthGate::new();
    let _guard = gate.drop_guard();

    tokio::spawn(run_auth(conn.clone(), gate.clone(), shared.clone()));

    let ctx = StreamContext {
        gate: gate.clone(),
        dialer: shared.dialer.clone(),
        fwmark: shared.fwmark,
        remote,
        metrics: shared.metrics.clone(),
        udp_idle: shared.udp_idle,
    };

    loop {
        let (send, recv) = tokio::select! {
            _ = gate.closed() => return Ok(()),
            stream = conn.accept_bi() => match stream {
                Ok(stream) => stream,
                Err(e) if benign::is_benign_close(&e) => {
                    debug!(%remote, reason = %e, "connection closed");
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatch::handle_stream(recv, send, &ctx).await {
                if e.is_benign() {
                    debug!(remote = %ctx.remote, error = %e, "stream ended");
                } else {
                    ctx.metrics.record_stream_error();
                    warn!(remote = %ctx.remote, error = %e, "handle stream");
                }
            }
        });
    }
}

/// Authenticate `conn` and publish the outcome on `gate`.
async fn run_auth(conn: Connection, gate: AuthGate, shared: Arc<ConnectionContext>) {
    let remote = conn.remote_address();
    let attempt = async {
        let mut control = conn.accept_uni().await?;
        auth::authenticate(&mut control, &conn, &shared.credentials).await
    };
    let outcome = tokio::time::timeout(shared.auth_timeout, attempt)
        .await
        .unwrap_or(Err(AuthError::Timeout));

    match outcome {
        Ok(user) => {
            debug!(%remote, %user, "authenticated");
            gate.accept(user);
        }
        Err(e) => {
            if e.is_benign() {
                debug!(%remote, error = %e, "connection closed before authentication");
            } else {
                shared.metrics.record_auth_failure();
                warn!(%remote, error = %e, "authentication failed");
            }
            gate.reject();
            conn.close(AUTHENTICATION_FAILED, b"");
        }
    }
}
