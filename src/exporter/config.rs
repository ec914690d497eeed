//! Exporter configuration.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::provision::config::{BINARY_NAME, DEFAULT_INSTALL_DIR};

/// Account the exporter runs as when started privileged.
pub const DEFAULT_USER: &str = "speedtest";

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    /// How long a speed test result stays fresh between scrapes.
    pub cache_timeout: Duration,
    /// How long a single speed test run may take before it is killed.
    pub run_timeout: Duration,
    /// Optional upstream server id forwarded to the CLI.
    pub server_id: Option<u32>,
    /// Path of the provisioned speedtest executable.
    pub binary: PathBuf,
    pub user: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cache_timeout: Duration::from_secs(900),
            run_timeout: Duration::from_secs(90),
            server_id: None,
            binary: PathBuf::from(DEFAULT_INSTALL_DIR).join(BINARY_NAME),
            user: DEFAULT_USER.to_string(),
        }
    }
}

impl ServeConfig {
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_container_contract() {
        let config = ServeConfig::default();
        assert_eq!(config.bind_address().unwrap().port(), 8000);
        assert_eq!(config.cache_timeout, Duration::from_secs(900));
        assert_eq!(config.run_timeout, Duration::from_secs(90));
        assert_eq!(config.binary, PathBuf::from("/usr/local/bin/speedtest"));
        assert_eq!(config.user, "speedtest");
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let config = ServeConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(config.bind_address().is_err());
    }
}
