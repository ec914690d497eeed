use thiserror::Error;

/// Fatal provisioning failures. Everything here aborts the run; cleanup of
/// temporary artifacts is best-effort and never surfaces as an error.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("unsupported architecture {0:?}: the vendor publishes no build for it")]
    UnsupportedArchitecture(String),

    #[error("failed to download artifact: {0}")]
    DownloadFailure(String),

    #[error("failed to unpack artifact: {0}")]
    UnpackFailure(String),

    #[error("service account {0:?} does not exist")]
    MissingAccount(String),
}
