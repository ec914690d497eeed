//! HTTP server exposing the exporter endpoints.
//!
//! Endpoints:
//! - `/metrics` - Prometheus metrics in text format; a scrape runs a speed
//!   test when the cached result has expired
//! - `/health` - liveness probe
//! - `/` - index page with links

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};

use super::metrics::Metrics;
use super::runner::{SpeedtestRunner, to_megabits};

/// Shared state for request handling: the gauges, the runner that feeds
/// them and the freshness deadline of the cached result.
pub struct ExporterState {
    metrics: Metrics,
    runner: Box<dyn SpeedtestRunner>,
    cache_timeout: Duration,
    fresh_until: Mutex<Option<Instant>>,
}

impl ExporterState {
    pub fn new(metrics: Metrics, runner: Box<dyn SpeedtestRunner>, cache_timeout: Duration) -> Self {
        Self {
            metrics,
            runner,
            cache_timeout,
            fresh_until: Mutex::new(None),
        }
    }

    /// Run a speed test if the cached result has expired, then render the
    /// registry. Concurrent scrapes serialise on the cache so at most one
    /// test runs at a time.
    async fn scrape(&self) -> String {
        let mut fresh_until = self.fresh_until.lock().await;

        let expired = fresh_until.is_none_or(|deadline| Instant::now() >= deadline);
        if expired {
            let sample = self.runner.run().await;
            info!(
                "Server={} Jitter={}ms Ping={}ms Download={} Upload={}",
                sample.server_id,
                sample.jitter_ms,
                sample.ping_ms,
                to_megabits(sample.download_bps),
                to_megabits(sample.upload_bps)
            );
            self.metrics.record(&sample);
            // A failed run is cached too, so a broken CLI is retried once
            // per cache window instead of on every scrape.
            *fresh_until = Some(Instant::now() + self.cache_timeout);
        }

        self.metrics.encode()
    }
}

/// HTTP server bound to its listen address.
pub struct ExporterServer {
    listener: TcpListener,
    state: Arc<ExporterState>,
}

impl ExporterServer {
    pub async fn bind(addr: SocketAddr, state: Arc<ExporterState>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind exporter server to {}", addr))?;

        info!("Exporter listening on http://{}", listener.local_addr()?);
        Ok(Self { listener, state })
    }

    /// The actual bound address (relevant when the configured port is 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    /// Serve until the shutdown channel fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Connection from {}", addr);

                            let io = TokioIo::new(stream);
                            let state = Arc::clone(&self.state);

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move {
                                        Ok::<_, Infallible>(handle_request(req, &state).await)
                                    }
                                });

                                if let Err(err) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    // Expected when clients disconnect early
                                    if !err.is_incomplete_message() {
                                        warn!("Error serving connection from {}: {}", addr, err);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Exporter shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Serve until ctrl-c.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let (tx, rx) = broadcast::channel(1);

        let shutdown_tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            let _ = shutdown_tx.send(());
        });

        self.run(rx).await
    }
}

async fn handle_request(req: Request<Incoming>, state: &ExporterState) -> Response<Full<Bytes>> {
    respond(req.method(), req.uri().path(), state).await
}

async fn respond(method: &Method, path: &str, state: &ExporterState) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return make_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "Method Not Allowed",
        );
    }

    match path {
        "/metrics" => {
            let body = state.scrape().await;
            make_response(
                StatusCode::OK,
                "text/plain; version=0.0.4; charset=utf-8",
                &body,
            )
        }
        "/health" | "/healthz" => make_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#,
        ),
        "/" => {
            let body = r#"<!DOCTYPE html>
<html>
<head><title>Speedtest Exporter</title></head>
<body>
<h1>Speedtest Exporter</h1>
<ul>
<li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
<li><a href="/health">/health</a> - Health check</li>
</ul>
</body>
</html>"#;
            make_response(StatusCode::OK, "text/html; charset=utf-8", body)
        }
        _ => make_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

fn make_response(status: StatusCode, content_type: &str, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Content-Length", body.len())
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response parts are valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::runner::{MockSpeedtestRunner, Sample};

    fn sample() -> Sample {
        Sample {
            server_id: 4302,
            jitter_ms: 1.25,
            ping_ms: 14.8,
            download_bps: 90_000_000.0,
            upload_bps: 20_000_000.0,
            ok: true,
        }
    }

    fn state_with(runner: MockSpeedtestRunner, cache_timeout: Duration) -> ExporterState {
        ExporterState::new(Metrics::new(), Box::new(runner), cache_timeout)
    }

    #[tokio::test]
    async fn test_metrics_scrape_runs_a_test() {
        let mut runner = MockSpeedtestRunner::new();
        runner.expect_run().times(1).returning(|| sample());

        let state = state_with(runner, Duration::from_secs(900));
        let response = respond(&Method::GET, "/metrics", &state).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cached_result_is_reused_within_timeout() {
        let mut runner = MockSpeedtestRunner::new();
        runner.expect_run().times(1).returning(|| sample());

        let state = state_with(runner, Duration::from_secs(900));
        state.scrape().await;
        let text = state.scrape().await;

        assert!(text.contains("speedtest_server_id 4302"));
        assert!(text.contains("speedtest_status 1"));
    }

    #[tokio::test]
    async fn test_expired_cache_triggers_a_new_run() {
        let mut runner = MockSpeedtestRunner::new();
        runner.expect_run().times(2).returning(|| sample());

        let state = state_with(runner, Duration::ZERO);
        state.scrape().await;
        state.scrape().await;
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = state_with(MockSpeedtestRunner::new(), Duration::from_secs(900));
        let response = respond(&Method::GET, "/health", &state).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_and_not_found() {
        let state = state_with(MockSpeedtestRunner::new(), Duration::from_secs(900));

        let response = respond(&Method::GET, "/", &state).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = respond(&Method::GET, "/nope", &state).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_get_is_rejected() {
        let state = state_with(MockSpeedtestRunner::new(), Duration::from_secs(900));
        let response = respond(&Method::POST, "/metrics", &state).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test_log::test(tokio::test)]
    async fn test_server_serves_metrics_over_http() {
        let mut runner = MockSpeedtestRunner::new();
        runner.expect_run().returning(|| sample());

        let state = Arc::new(state_with(runner, Duration::from_secs(900)));
        let server = ExporterServer::bind("127.0.0.1:0".parse().unwrap(), state)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(rx));

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("speedtest_download_bits_per_second"));
        assert!(body.contains("speedtest_status 1"));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
