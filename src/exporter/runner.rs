//! Speedtest CLI invocation and result parsing.
//!
//! The CLI writes a single JSON document to stdout. Errors are reported in
//! band (an `error` key, or a non-result record) and sometimes with a
//! non-zero exit status; either way the output is parsed and a failed run
//! collapses to the all-zero sample so a scrape never fails because the
//! CLI did.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{error, info};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// One speed test observation, in the units the gauges expose.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    pub server_id: i64,
    pub jitter_ms: f64,
    pub ping_ms: f64,
    pub download_bps: f64,
    pub upload_bps: f64,
    pub ok: bool,
}

impl Sample {
    /// The all-zero sample recorded when a run fails.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Bits per second to megabits, rounded to two decimals for log lines.
pub fn to_megabits(bits_per_sec: f64) -> f64 {
    (bits_per_sec * 1e-6 * 100.0).round() / 100.0
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeedtestRunner: Send + Sync {
    /// Run one speed test. Failures never propagate: a failed run yields
    /// [`Sample::failed`].
    async fn run(&self) -> Sample;
}

/// Runs the installed Speedtest CLI as a child process.
pub struct CliRunner {
    binary: PathBuf,
    server_id: Option<u32>,
    run_timeout: Duration,
}

impl CliRunner {
    pub fn new(binary: PathBuf, server_id: Option<u32>, run_timeout: Duration) -> Self {
        Self {
            binary,
            server_id,
            run_timeout,
        }
    }

    async fn run_once(&self) -> Result<Sample> {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--format=json-pretty",
            "--progress=no",
            "--accept-license",
            "--accept-gdpr",
        ]);
        if let Some(id) = self.server_id {
            cmd.arg(format!("--server-id={}", id));
        }
        // A timed-out run must not leave the child behind.
        cmd.kill_on_drop(true);

        let output = timeout(self.run_timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("speedtest timed out after {:?}", self.run_timeout))?
            .with_context(|| format!("Failed to run {:?}", self.binary))?;

        // On errors the CLI still writes JSON to stdout with a non-zero
        // exit status, so the status is ignored in favor of the payload.
        parse_output(&output.stdout)
    }
}

#[async_trait]
impl SpeedtestRunner for CliRunner {
    #[tracing::instrument(skip(self))]
    async fn run(&self) -> Sample {
        match self.run_once().await {
            Ok(sample) => sample,
            Err(e) => {
                error!("Speedtest run failed: {:#}", e);
                Sample::failed()
            }
        }
    }
}

#[derive(Deserialize)]
struct ResultPayload {
    server: ServerInfo,
    ping: PingInfo,
    download: Transfer,
    upload: Transfer,
}

#[derive(Deserialize)]
struct ServerInfo {
    id: i64,
}

#[derive(Deserialize)]
struct PingInfo {
    jitter: f64,
    latency: f64,
}

#[derive(Deserialize)]
struct Transfer {
    /// Bytes per second.
    bandwidth: f64,
}

fn bytes_to_bits(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0
}

fn parse_output(stdout: &[u8]) -> Result<Sample> {
    let value: serde_json::Value =
        serde_json::from_slice(stdout).context("Speedtest output is not JSON")?;

    if let Some(err) = value.get("error") {
        return Err(anyhow!("speedtest reported an error: {}", err));
    }

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "result" => {
            let payload: ResultPayload =
                serde_json::from_value(value).context("Malformed speedtest result")?;
            Ok(Sample {
                server_id: payload.server.id,
                jitter_ms: payload.ping.jitter,
                ping_ms: payload.ping.latency,
                download_bps: bytes_to_bits(payload.download.bandwidth),
                upload_bps: bytes_to_bits(payload.upload.bandwidth),
                ok: true,
            })
        }
        "log" => {
            let timestamp = value.get("timestamp").and_then(|t| t.as_str()).unwrap_or("");
            let message = value.get("message").and_then(|m| m.as_str()).unwrap_or("");
            info!("{} - {}", timestamp, message);
            Err(anyhow!("speedtest produced a log record but no result"))
        }
        _ => Err(anyhow!("speedtest output had no result")),
    }
}
