//! Service account operations (lookup, ownership, privilege switching).

use anyhow::{Context, Result};
use log::debug;
use nix::unistd::{Gid, Uid, User, chown, setgid, setgroups, setuid};
use std::path::Path;

use super::{RealRuntime, ServiceAccount};

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn lookup_account_impl(&self, name: &str) -> Result<Option<ServiceAccount>> {
        let user = User::from_name(name)
            .with_context(|| format!("Failed to look up account {:?}", name))?;

        Ok(user.map(|u| ServiceAccount {
            name: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
        }))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn chown_impl(&self, path: &Path, account: &ServiceAccount) -> Result<()> {
        chown(
            path,
            Some(Uid::from_raw(account.uid)),
            Some(Gid::from_raw(account.gid)),
        )
        .with_context(|| format!("Failed to change ownership of {:?} to {}", path, account.name))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn become_account_impl(&self, account: &ServiceAccount) -> Result<()> {
        debug!("Switching process to account {}", account.name);

        let gid = Gid::from_raw(account.gid);

        // Group memberships must be shed before the uid changes, or the
        // process keeps root's supplementary groups.
        setgroups(&[gid])
            .with_context(|| format!("Failed to set groups for {}", account.name))?;
        setgid(gid).with_context(|| format!("Failed to set gid {}", account.gid))?;
        setuid(Uid::from_raw(account.uid))
            .with_context(|| format!("Failed to set uid {}", account.uid))?;

        Ok(())
    }
}
