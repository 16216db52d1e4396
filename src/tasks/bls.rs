//! Boot Loader Specification entries for live payloads.
//!
//! A live image ships the entries of the machine it was built on. They are
//! removed, `kernel-install` recreates one entry per installed kernel, and
//! the GRUB menu is regenerated from the fresh entries.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::{debug, info};

use super::{PayloadType, has_new_kernel_pkg, require_versions};
use crate::error::RsbootinstError;
use crate::runner::ProcessRunner;
use crate::storage::StorageSnapshot;

/// Directory holding BLS entries, relative to the target root.
const ENTRIES_DIR: &str = "boot/loader/entries";

/// Recreates the BLS entries of a live payload.
#[derive(Debug, Clone)]
pub struct CreateBlsEntriesTask {
    pub storage: Arc<StorageSnapshot>,
    pub sysroot: Utf8PathBuf,
    pub payload: PayloadType,
    pub kernel_versions: Vec<String>,
}

impl CreateBlsEntriesTask {
    pub fn new(
        storage: Arc<StorageSnapshot>,
        sysroot: impl Into<Utf8PathBuf>,
        payload: PayloadType,
        kernel_versions: Vec<String>,
    ) -> Self {
        Self {
            storage,
            sysroot: sysroot.into(),
            payload,
            kernel_versions,
        }
    }

    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if !self.payload.is_live() {
            debug!("{} payload installs its own boot entries", self.payload);
            return Ok(());
        }
        if has_new_kernel_pkg(&self.sysroot) {
            debug!("new-kernel-pkg manages the boot entries");
            return Ok(());
        }
        require_versions(&self.kernel_versions)?;

        self.remove_stale_entries(runner.dry_run())?;

        for version in &self.kernel_versions {
            info!("creating BLS entry for kernel {}", version);
            runner.run(
                &self.sysroot,
                "kernel-install",
                &[
                    "add".to_string(),
                    version.clone(),
                    format!("/lib/modules/{}/vmlinuz", version),
                ],
            )?;
        }

        let config = if self.storage.bootloader().is_efi() {
            "/etc/grub2-efi.cfg"
        } else {
            "/etc/grub2.cfg"
        };
        runner
            .run(
                &self.sysroot,
                "grub2-mkconfig",
                &["-o".to_string(), config.to_string()],
            )
            .context("failed to regenerate the boot menu")
    }

    /// Removes every entry that existed before `kernel-install` runs.
    fn remove_stale_entries(&self, dry_run: bool) -> Result<()> {
        let dir = self.sysroot.join(ENTRIES_DIR);
        if !dir.is_dir() {
            return Ok(());
        }

        let entries = fs::read_dir(&dir)
            .map_err(|e| RsbootinstError::io(format!("failed to read {}", dir), e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| RsbootinstError::io(format!("failed to read {}", dir), e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if dry_run {
                info!("would remove stale BLS entry {}", path.display());
                continue;
            }
            fs::remove_file(&path).map_err(|e| {
                RsbootinstError::io(format!("failed to remove {}", path.display()), e)
            })?;
            debug!("removed stale BLS entry {}", path.display());
        }
        Ok(())
    }
}
