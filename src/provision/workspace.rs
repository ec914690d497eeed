//! Scoped temporary workspace for the downloaded archive and its unpacked
//! contents.
//!
//! The workspace is released on every exit path, including the error paths
//! from download and unpack failures. Release is best-effort: a failed
//! cleanup is logged and never fails provisioning.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::runtime::Runtime;

static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under the system temporary directory.
    pub fn create<R: Runtime>(runtime: &R, prefix: &str) -> Result<Self> {
        let root = runtime.temp_dir().join(format!(
            "{}-{}-{}",
            prefix,
            std::process::id(),
            WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        if runtime.exists(&root) {
            runtime.remove_dir_all(&root)?;
        }
        runtime
            .create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace at {:?}", root))?;

        debug!("Created workspace at {:?}", root);
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up workspace {:?}: {}", self.root, e);
            }
        } else {
            debug!("Removed workspace {:?}", self.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::fs;

    #[test]
    fn test_workspace_removed_on_drop() {
        let path;
        {
            let workspace = Workspace::create(&RealRuntime, "workspace-test").unwrap();
            path = workspace.path().to_path_buf();
            assert!(path.exists());

            fs::write(path.join("archive.tgz"), b"bytes").unwrap();
            fs::create_dir(path.join("unpacked")).unwrap();
            fs::write(path.join("unpacked").join("payload"), b"bytes").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_replaces_leftover_directory() {
        use crate::runtime::MockRuntime;

        // A leftover directory from a crashed run is removed before reuse.
        let mut runtime = MockRuntime::new();
        runtime
            .expect_temp_dir()
            .returning(|| PathBuf::from("/tmp/scratch"));
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_remove_dir_all()
            .times(1)
            .returning(|_| Ok(()));
        runtime.expect_create_dir_all().returning(|_| Ok(()));

        let workspace = Workspace::create(&runtime, "workspace-reuse").unwrap();
        assert!(workspace.path().starts_with("/tmp/scratch"));
    }

    #[test]
    fn test_distinct_workspaces_per_call() {
        let a = Workspace::create(&RealRuntime, "workspace-distinct").unwrap();
        let b = Workspace::create(&RealRuntime, "workspace-distinct").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
