//! Late corrections run after the initrds are regenerated.

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::{debug, info};

use super::{ConfigureBootloaderTask, InstallBootloaderTask, PayloadType, TargetKind};
use crate::bootloader::BootloaderMode;
use crate::platform::Arch;
use crate::runner::ProcessRunner;
use crate::storage::StorageSnapshot;

/// Rewrites the boot loader when the root filesystem lives on btrfs.
///
/// The boot loader was first written before the btrfs volume topology was
/// final; configuring and installing it again picks up the final layout.
#[derive(Debug, Clone)]
pub struct FixBtrfsBootloaderTask {
    pub storage: Arc<StorageSnapshot>,
    pub mode: BootloaderMode,
    pub payload: PayloadType,
    pub kernel_versions: Vec<String>,
    pub sysroot: Utf8PathBuf,
    pub target: TargetKind,
}

impl FixBtrfsBootloaderTask {
    pub fn new(
        storage: Arc<StorageSnapshot>,
        mode: BootloaderMode,
        payload: PayloadType,
        kernel_versions: Vec<String>,
        sysroot: impl Into<Utf8PathBuf>,
        target: TargetKind,
    ) -> Self {
        Self {
            storage,
            mode,
            payload,
            kernel_versions,
            sysroot: sysroot.into(),
            target,
        }
    }

    /// Returns true if a btrfs volume or subvolume is mounted at `/`.
    pub fn root_on_btrfs(&self) -> bool {
        self.storage
            .devices()
            .mounted_at("/")
            .any(|d| d.kind.is_btrfs())
    }

    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if self.target == TargetKind::Directory {
            debug!("directory targets have no boot loader to fix");
            return Ok(());
        }
        if self.mode != BootloaderMode::Enabled {
            debug!("boot loader is {}, nothing to fix", self.mode);
            return Ok(());
        }
        if !self.root_on_btrfs() {
            debug!("root filesystem is not on btrfs");
            return Ok(());
        }

        info!("root filesystem is on btrfs, writing the boot loader again");
        ConfigureBootloaderTask::new(
            self.storage.clone(),
            self.mode,
            self.payload,
            self.kernel_versions.clone(),
            self.sysroot.clone(),
        )
        .run()
        .context("failed to reconfigure the boot loader")?;
        InstallBootloaderTask::new(self.storage.clone(), self.mode, self.sysroot.clone())
            .run(runner)
            .context("failed to reinstall the boot loader")
    }
}

/// Runs `zipl` once more on IBM Z.
///
/// The write step of the ZIPL boot loader is not reliable when the target
/// root is not the running system.
#[derive(Debug, Clone)]
pub struct FixZiplBootloaderTask {
    pub mode: BootloaderMode,
    pub sysroot: Utf8PathBuf,
    pub target: TargetKind,
    pub arch: Arch,
}

impl FixZiplBootloaderTask {
    pub fn new(
        mode: BootloaderMode,
        sysroot: impl Into<Utf8PathBuf>,
        target: TargetKind,
        arch: Arch,
    ) -> Self {
        Self {
            mode,
            sysroot: sysroot.into(),
            target,
            arch,
        }
    }

    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if self.mode != BootloaderMode::Enabled
            || self.target == TargetKind::Directory
            || !self.arch.is_s390()
        {
            debug!(
                mode = %self.mode,
                target = %self.target,
                arch = %self.arch,
                "zipl does not need to run again"
            );
            return Ok(());
        }

        info!("running zipl in {}", self.sysroot);
        runner.run(&self.sysroot, "zipl", &[])
    }
}
