//! Provisioning configuration.
//!
//! Install path, working directory and owning account are explicit
//! configuration rather than embedded literals, so tests can point the
//! whole run at a scratch directory and a mock artifact server.

use std::path::PathBuf;

/// Vendor artifact repository for Speedtest CLI releases.
pub const DEFAULT_BASE_URL: &str = "https://install.speedtest.net/app/cli";

/// Where the executable lands; must be on the search path.
pub const DEFAULT_INSTALL_DIR: &str = "/usr/local/bin";

/// The application working directory handed to the service account.
pub const DEFAULT_APP_DIR: &str = "/app";

/// Name of the installed executable.
pub const BINARY_NAME: &str = "speedtest";

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Vendor release to install, e.g. "1.2.0". Fixed for a given build.
    pub version: String,
    /// Base URL of the artifact repository.
    pub base_url: String,
    pub install_dir: PathBuf,
    pub app_dir: PathBuf,
    /// Unprivileged account that ends up owning the executable and the
    /// application directory. `None` skips the ownership step (local runs
    /// outside a container build).
    pub owner: Option<String>,
}

impl ProvisionConfig {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            app_dir: PathBuf::from(DEFAULT_APP_DIR),
            owner: None,
        }
    }

    /// Download URL for the given vendor architecture token. Deterministic:
    /// the same version and token always produce the same URL.
    pub fn artifact_url(&self, vendor_arch: &str) -> String {
        format!(
            "{}/ookla-speedtest-{}-linux-{}.tgz",
            self.base_url.trim_end_matches('/'),
            self.version,
            vendor_arch
        )
    }

    /// Full path of the installed executable.
    pub fn install_path(&self) -> PathBuf {
        self.install_dir.join(BINARY_NAME)
    }
}
