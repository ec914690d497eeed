//! Build-time provisioning of the Speedtest CLI.
//!
//! A single sequential pass: resolve the host architecture to the vendor's
//! naming scheme, download the versioned archive, unpack it, install the
//! executable payload to the configured path and hand the application
//! directory to the service account. Temporary artifacts live in a scoped
//! [`Workspace`] that is released on every exit path.

pub mod arch;
pub mod config;
mod error;
mod workspace;

pub use config::ProvisionConfig;
pub use error::ProvisionError;
pub use workspace::Workspace;

use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::Client;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::archive;
use crate::http::HttpClient;
use crate::runtime::{Runtime, ServiceAccount};

use config::BINARY_NAME;

/// Fetch, unpack and install the Speedtest CLI for the running host.
///
/// Any failure before cleanup is fatal: no retry, no fallback version, no
/// partially installed executable. Cleanup itself is best-effort.
#[tracing::instrument(skip(runtime, config))]
pub async fn provision<R: Runtime + 'static>(runtime: &R, config: &ProvisionConfig) -> Result<()> {
    let raw_arch = arch::detect();
    let vendor_arch = arch::vendor_arch(raw_arch)?;
    let url = config.artifact_url(vendor_arch);

    info!(
        "Provisioning speedtest {} for {} (vendor arch {})",
        config.version, raw_arch, vendor_arch
    );

    // Resolve the owning account before touching the filesystem: a missing
    // account must fail the run with nothing installed.
    let owner = resolve_owner(runtime, config)?;

    let workspace = Workspace::create(runtime, "speedtest-provision")?;
    let archive_path = workspace
        .path()
        .join(format!("speedtest-{}.tgz", config.version));

    let client = HttpClient::new(Client::new());
    download_artifact(runtime, &client, &url, &archive_path).await?;

    let unpack_dir = workspace.path().join("unpacked");
    runtime
        .create_dir_all(&unpack_dir)
        .context("Failed to create unpack directory")?;
    archive::extract_tar_gz(runtime, &archive_path, &unpack_dir)
        .map_err(|e| ProvisionError::UnpackFailure(format!("{:#}", e)))?;

    let payload = locate_payload(runtime, &unpack_dir)?;
    debug!("Found executable payload at {:?}", payload);

    runtime
        .create_dir_all(&config.install_dir)
        .with_context(|| format!("Failed to create install directory {:?}", config.install_dir))?;
    let target = config.install_path();
    runtime
        .copy(&payload, &target)
        .with_context(|| format!("Failed to install executable at {:?}", target))?;
    runtime.set_permissions(&target, 0o755)?;

    if let Some(account) = &owner {
        runtime.chown(&target, account)?;
        runtime
            .create_dir_all(&config.app_dir)
            .with_context(|| format!("Failed to create app directory {:?}", config.app_dir))?;
        chown_tree(runtime, &config.app_dir, account)?;
        info!(
            "Handed {:?} and {:?} to account {}",
            target, config.app_dir, account.name
        );
    }

    info!("speedtest {} installed at {:?}", config.version, target);
    Ok(())
    // workspace drops here, releasing the archive and unpacked contents
}

fn resolve_owner<R: Runtime>(
    runtime: &R,
    config: &ProvisionConfig,
) -> Result<Option<ServiceAccount>> {
    match &config.owner {
        Some(name) => {
            let account = runtime
                .lookup_account(name)?
                .ok_or_else(|| ProvisionError::MissingAccount(name.clone()))?;
            Ok(Some(account))
        }
        None => Ok(None),
    }
}

/// Single-attempt retrieval of the artifact into the workspace.
async fn download_artifact<R: Runtime>(
    runtime: &R,
    client: &HttpClient,
    url: &str,
    dest: &Path,
) -> Result<(), ProvisionError> {
    info!("Downloading {}...", url);

    client
        .download_file(url, || {
            runtime
                .create_file(dest)
                .with_context(|| format!("Failed to create temporary file at {:?}", dest))
        })
        .await
        .map_err(|e| ProvisionError::DownloadFailure(format!("{}: {:#}", url, e)))?;

    info!("Download complete.");
    Ok(())
}

/// Find the executable payload in the unpacked contents.
///
/// The vendor archive carries the binary next to a man page and release
/// notes; the payload is the entry named like the installed binary, and it
/// must be a native executable.
fn locate_payload<R: Runtime + 'static>(
    runtime: &R,
    unpack_dir: &Path,
) -> Result<PathBuf, ProvisionError> {
    let mut pending = vec![unpack_dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = runtime.read_dir(&current).map_err(|e| {
            ProvisionError::UnpackFailure(format!("failed to scan unpacked contents: {:#}", e))
        })?;

        for entry in entries {
            if runtime.is_dir(&entry) {
                pending.push(entry);
            } else if entry.file_name().is_some_and(|name| name == BINARY_NAME) {
                if !is_native_executable(runtime, &entry) {
                    return Err(ProvisionError::UnpackFailure(format!(
                        "{:?} is not a native executable",
                        entry
                    )));
                }
                return Ok(entry);
            }
        }
    }

    Err(ProvisionError::UnpackFailure(format!(
        "archive does not contain a {} executable",
        BINARY_NAME
    )))
}

/// Check if a file is a native binary executable for this platform.
/// Uses goblin to parse the binary format; scripts and foreign-platform
/// binaries do not count.
fn is_native_executable<R: Runtime>(runtime: &R, path: &Path) -> bool {
    let mut file = match runtime.open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    let mut buffer = Vec::new();
    if file.read_to_end(&mut buffer).is_err() {
        return false;
    }

    matches!(goblin::Object::parse(&buffer), Ok(goblin::Object::Elf(_)))
}

/// Recursively hand ownership of a directory tree to the given account.
fn chown_tree<R: Runtime>(runtime: &R, root: &Path, account: &ServiceAccount) -> Result<()> {
    runtime.chown(root, account)?;
    if runtime.is_dir(root) {
        for entry in runtime.read_dir(root)? {
            chown_tree(runtime, &entry, account)?;
        }
    }
    Ok(())
}
