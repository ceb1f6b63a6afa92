//! Metrics collection and export

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder,
};

/// Server-wide counters. Cheap to update from any task.
pub struct ServerMetrics {
    connections_total: Counter,
    active_connections: Gauge,
    auth_failures_total: Counter,
    streams_total: CounterVec,
    stream_errors_total: Counter,
    relayed_bytes_total: CounterVec,
    registry: Registry,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "juicity_connections_total",
            "Total number of QUIC connections established",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let active_connections = Gauge::with_opts(Opts::new(
            "juicity_active_connections",
            "Number of open QUIC connections",
        ))?;
        registry.register(Box::new(active_connections.clone()))?;

        let auth_failures_total = Counter::with_opts(Opts::new(
            "juicity_auth_failures_total",
            "Total number of connections that failed authentication",
        ))?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        let streams_total = CounterVec::new(
            Opts::new("juicity_streams_total", "Total number of relayed streams"),
            &["network"],
        )?;
        registry.register(Box::new(streams_total.clone()))?;

        let stream_errors_total = Counter::with_opts(Opts::new(
            "juicity_stream_errors_total",
            "Total number of streams that ended with an error",
        ))?;
        registry.register(Box::new(stream_errors_total.clone()))?;

        let relayed_bytes_total = CounterVec::new(
            Opts::new("juicity_relayed_bytes_total", "Total bytes relayed"),
            &["direction"],
        )?;
        registry.register(Box::new(relayed_bytes_total.clone()))?;

        Ok(Self {
            connections_total,
            active_connections,
            auth_failures_total,
            streams_total,
            stream_errors_total,
            relayed_bytes_total,
            registry,
        })
    }

    pub fn record_connection_opened(&self) {
        self.connections_total.inc();
        self.active_connections.inc();
    }

    pub fn record_connection_closed(&self) {
        self.active_connections.dec();
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures_total.inc();
    }

    pub fn record_stream(&self, network: &str) {
        self.streams_total.with_label_values(&[network]).inc();
    }

    pub fn record_stream_error(&self) {
        self.stream_errors_total.inc();
    }

    /// `upload` is client to destination, `download` the reverse.
    pub fn record_relayed(&self, upload: u64, download: u64) {
        self.relayed_bytes_total
            .with_label_values(&["upload"])
            .inc_by(upload as f64);
        self.relayed_bytes_total
            .with_label_values(&["download"])
            .inc_by(download as f64);
    }

    pub fn connections_total(&self) -> f64 {
        self.connections_total.get()
    }

    pub fn active_connections(&self) -> f64 {
        self.active_connections.get()
    }

    pub fn auth_failures(&self) -> f64 {
        self.auth_failures_total.get()
    }

    /// Export Prometheus format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();
        assert_eq!(metrics.connections_total(), 2.0);
        assert_eq!(metrics.active_connections(), 1.0);
    }

    #[test]
    fn test_export_contains_labels() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.record_stream("tcp");
        metrics.record_relayed(10, 20);
        metrics.record_auth_failure();

        let text = metrics.export().unwrap();
        assert!(text.contains("juicity_streams_total{network=\"tcp\"} 1"));
        assert!(text.contains("juicity_relayed_bytes_total{direction=\"download\"} 20"));
        assert!(text.contains("juicity_auth_failures_total 1"));
    }
}
