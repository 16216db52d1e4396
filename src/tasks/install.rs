//! Boot loader installation.

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::{debug, info};

use crate::bootloader::{BootTarget, BootloaderMode};
use crate::runner::ProcessRunner;
use crate::storage::StorageSnapshot;

/// Completes the kernel arguments and writes the boot loader to the target.
#[derive(Debug, Clone)]
pub struct InstallBootloaderTask {
    pub storage: Arc<StorageSnapshot>,
    pub mode: BootloaderMode,
    pub sysroot: Utf8PathBuf,
}

impl InstallBootloaderTask {
    pub fn new(
        storage: Arc<StorageSnapshot>,
        mode: BootloaderMode,
        sysroot: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            storage,
            mode,
            sysroot: sysroot.into(),
        }
    }

    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if matches!(self.mode, BootloaderMode::Disabled | BootloaderMode::Skipped) {
            debug!("boot loader is {}, not installing it", self.mode);
            return Ok(());
        }

        let target = BootTarget::new(&self.storage, &self.sysroot);
        let mut loader = self.storage.bootloader();
        let kind = loader.kind();
        info!("writing boot loader {} to {}", kind, self.sysroot);

        loader
            .set_boot_args(&target)
            .context("failed to set the boot arguments")?;
        loader
            .write(&target, runner)
            .with_context(|| format!("failed to write boot loader {}", kind))
    }
}
