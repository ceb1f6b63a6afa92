//! HTTP endpoints for health checks and metrics scraping

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, Router},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::ServerMetrics;

pub fn router(metrics: Arc<ServerMetrics>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Bind `addr` and serve [`router`] in the background.
pub async fn spawn(
    addr: SocketAddr,
    metrics: Arc<ServerMetrics>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server for health/metrics listening on {}", listener.local_addr()?);
    let app = router(metrics);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    }))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn metrics_handler(State(metrics): State<Arc<ServerMetrics>>) -> impl IntoResponse {
    match metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).await.unwrap();
        resp
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let metrics = Arc::new(ServerMetrics::new().unwrap());
        metrics.record_connection_opened();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(metrics)).await.unwrap();
        });

        let health = get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("OK"));

        let scrape = get(addr, "/metrics").await;
        assert!(scrape.contains("juicity_active_connections 1"));
    }
}
