//! Gzipped tarball extraction.
//!
//! The vendor ships every release as a `.tgz`, so this is the only archive
//! format the crate understands.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::path::{Component, Path};
use tar::{Archive, EntryType};

use crate::runtime::Runtime;

/// Extract a `.tar.gz`/`.tgz` archive into the given directory.
///
/// Entries with absolute or parent-escaping paths are skipped. Regular
/// files keep the mode recorded in the archive.
#[tracing::instrument(skip(runtime, archive_path, extract_to))]
pub fn extract_tar_gz<R: Runtime + 'static>(
    runtime: &R,
    archive_path: &Path,
    extract_to: &Path,
) -> Result<()> {
    debug!("Extracting tar.gz archive to {:?}...", extract_to);

    let file = runtime
        .open(archive_path)
        .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    for entry in archive
        .entries()
        .context("Failed to read archive entries")?
    {
        let mut entry = entry.context("Failed to read archive entry")?;
        let entry_path = entry
            .path()
            .context("Archive entry has an invalid path")?
            .to_path_buf();

        if !is_safe_entry_path(&entry_path) {
            debug!("Skipping entry with unsafe path: {:?}", entry_path);
            continue;
        }

        let full_path = extract_to.join(&entry_path);

        match entry.header().entry_type() {
            EntryType::Directory => {
                runtime.create_dir_all(&full_path)?;
            }
            EntryType::Regular => {
                if let Some(parent) = full_path.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest_file = runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest_file)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;

                if let Ok(mode) = entry.header().mode() {
                    runtime.set_permissions(&full_path, mode & 0o777)?;
                }
            }
            other => {
                debug!("Skipping unsupported entry type {:?}: {:?}", other, entry_path);
            }
        }
    }

    debug!("Extraction complete.");
    Ok(())
}

/// A path is safe when it stays inside the extraction directory.
fn is_safe_entry_path(path: &Path) -> bool {
    !path.is_absolute()
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use anyhow::Result;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn create_test_archive(path: &Path, files: HashMap<&str, &str>) -> Result<()> {
        let file = File::create(path)?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(enc);

        let mut header = tar::Header::new_gnu();
        for (f, content) in files.iter() {
            header.set_path(f)?;
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes())?;
        }

        tar.finish()?;
        Ok(())
    }

    #[test]
    fn test_extract_tar_gz() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("test.tgz");
        let extract_path = dir.path().join("extracted");
        fs::create_dir(&extract_path)?;

        create_test_archive(
            &archive_path,
            HashMap::from([("speedtest", "binary bytes"), ("speedtest.md", "docs")]),
        )?;

        extract_tar_gz(&RealRuntime, &archive_path, &extract_path)?;

        assert_eq!(
            fs::read_to_string(extract_path.join("speedtest"))?,
            "binary bytes"
        );
        assert_eq!(fs::read_to_string(extract_path.join("speedtest.md"))?, "docs");

        Ok(())
    }

    #[test]
    fn test_extract_preserves_mode() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("test.tgz");
        let extract_path = dir.path().join("extracted");
        fs::create_dir(&extract_path)?;

        let file = File::create(&archive_path)?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(enc);
        let mut header = tar::Header::new_gnu();
        header.set_path("speedtest")?;
        header.set_size(4);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append(&header, "exec".as_bytes())?;
        tar.finish()?;
        drop(tar);

        extract_tar_gz(&RealRuntime, &archive_path, &extract_path)?;

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(extract_path.join("speedtest"))?
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);

        Ok(())
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("broken.tgz");
        let extract_path = dir.path().join("extracted");
        fs::create_dir(&extract_path).unwrap();

        fs::write(&archive_path, b"this is not a gzip stream").unwrap();

        let result = extract_tar_gz(&RealRuntime, &archive_path, &extract_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_safe_entry_paths() {
        assert!(is_safe_entry_path(Path::new("speedtest")));
        assert!(is_safe_entry_path(Path::new("dir/speedtest")));
        assert!(!is_safe_entry_path(Path::new("/etc/passwd")));
        assert!(!is_safe_entry_path(Path::new("../escape")));
        assert!(!is_safe_entry_path(Path::new("dir/../../escape")));
    }
}
