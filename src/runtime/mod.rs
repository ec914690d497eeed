//! Runtime abstraction for system operations.
//!
//! This module provides a trait-based abstraction over system operations,
//! enabling dependency injection and testability.
//!
//! # Structure
//!
//! - `env` - Temporary directory and privilege information
//! - `fs` - File system operations (read, write, directory, permissions)
//! - `user` - Service account lookup, ownership and privilege changes

mod env;
mod fs;
mod user;

use anyhow::Result;
use std::path::{Path, PathBuf};

/// An unprivileged system account that owns the application's files and
/// runs the exporter process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn temp_dir(&self) -> PathBuf;

    // File System
    fn copy(&self, from: &Path, to: &Path) -> Result<u64>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    fn create_file(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>>;
    fn open(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send>>;

    /// Set file permissions (mode) on Unix systems.
    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;

    // Accounts and privileges
    fn is_privileged(&self) -> bool;

    /// Look up a system account by name. Returns `Ok(None)` if no such
    /// account exists.
    fn lookup_account(&self, name: &str) -> Result<Option<ServiceAccount>>;

    /// Change ownership of a single path to the given account.
    fn chown(&self, path: &Path, account: &ServiceAccount) -> Result<()>;

    /// Irreversibly switch the current process to the given account
    /// (supplementary groups, gid, then uid).
    fn become_account(&self, account: &ServiceAccount) -> Result<()>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn temp_dir(&self) -> PathBuf {
        self.temp_dir_impl()
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        self.copy_impl(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.create_dir_all_impl(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.remove_dir_all_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.is_dir_impl(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.read_dir_impl(path)
    }

    fn create_file(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>> {
        self.create_file_impl(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send>> {
        self.open_impl(path)
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        self.set_permissions_impl(path, mode)
    }

    fn is_privileged(&self) -> bool {
        self.is_privileged_impl()
    }

    fn lookup_account(&self, name: &str) -> Result<Option<ServiceAccount>> {
        self.lookup_account_impl(name)
    }

    fn chown(&self, path: &Path, account: &ServiceAccount) -> Result<()> {
        self.chown_impl(path, account)
    }

    fn become_account(&self, account: &ServiceAccount) -> Result<()> {
        self.become_account_impl(account)
    }
}
