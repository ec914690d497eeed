//! Prometheus metrics registry for the exporter.

use log::error;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

use super::runner::Sample;

type FloatGauge = Gauge<f64, AtomicU64>;

/// Gauges for the latest speed test observation. Metric names are part of
/// the scrape contract and must not change.
pub struct Metrics {
    registry: Registry,
    server_id: Gauge,
    jitter_ms: FloatGauge,
    ping_ms: FloatGauge,
    download_bps: FloatGauge,
    upload_bps: FloatGauge,
    status: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let server_id = Gauge::default();
        registry.register(
            "speedtest_server_id",
            "Speedtest server ID used to test",
            server_id.clone(),
        );

        let jitter_ms = FloatGauge::default();
        registry.register(
            "speedtest_jitter_latency_milliseconds",
            "Speedtest current Jitter in ms",
            jitter_ms.clone(),
        );

        let ping_ms = FloatGauge::default();
        registry.register(
            "speedtest_ping_latency_milliseconds",
            "Speedtest current Ping in ms",
            ping_ms.clone(),
        );

        let download_bps = FloatGauge::default();
        registry.register(
            "speedtest_download_bits_per_second",
            "Speedtest current Download Speed in bit/s",
            download_bps.clone(),
        );

        let upload_bps = FloatGauge::default();
        registry.register(
            "speedtest_upload_bits_per_second",
            "Speedtest current Upload speed in bits/s",
            upload_bps.clone(),
        );

        let status = Gauge::default();
        registry.register(
            "speedtest_status",
            "Speedtest status for whether the scrape worked",
            status.clone(),
        );

        Self {
            registry,
            server_id,
            jitter_ms,
            ping_ms,
            download_bps,
            upload_bps,
            status,
        }
    }

    /// Publish one observation. A failed sample zeroes every gauge and
    /// drops the status to 0.
    pub fn record(&self, sample: &Sample) {
        self.server_id.set(sample.server_id);
        self.jitter_ms.set(sample.jitter_ms);
        self.ping_ms.set(sample.ping_ms);
        self.download_bps.set(sample.download_bps);
        self.upload_bps.set(sample.upload_bps);
        self.status.set(if sample.ok { 1 } else { 0 });
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
