//! HTTP client for downloading release artifacts.
//!
//! Downloads are a single attempt: a failed or truncated transfer surfaces
//! as an error to the caller, which treats it as fatal. There is no retry
//! and no partial-success mode.

use anyhow::{Context, Result};
use log::debug;
use reqwest::Client;
use std::io::Write;

/// HTTP client for network retrieval of versioned artifacts.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Downloads a file from a URL, streaming chunks into a caller-supplied
    /// writer. Returns the number of bytes written. A non-success status is
    /// an error before the writer is created.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F) -> Result<u64>
    where
        W: Write,
        F: FnOnce() -> Result<W>,
    {
        debug!("Downloading file from {}...", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response
            .error_for_status()
            .context("Download request failed")?;

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
        }

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }
}
