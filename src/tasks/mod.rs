//! Installation tasks for the boot loader and the initial RAM disks.
//!
//! Each task is a plain data struct describing *what* to do for one step;
//! [`InstallationTask`] wraps them so the pipeline can run a heterogeneous,
//! ordered list through exhaustive pattern matching. Every task decides on
//! its own whether it applies (payload kind, boot loader mode, target kind)
//! and is a no-op otherwise.
//!
//! Adding a new task type requires:
//! 1. Creating the task struct with a `run(&self, runner)` method
//! 2. Adding a variant to `InstallationTask`
//! 3. Implementing the match arms in `name` and `run`

pub mod bls;
pub mod configure;
pub mod fixup;
pub mod initrd;
pub mod install;
pub mod rescue;

use anyhow::Result;
use camino::Utf8Path;
use serde::Deserialize;
use strum::Display;

pub use bls::CreateBlsEntriesTask;
pub use configure::ConfigureBootloaderTask;
pub use fixup::{FixBtrfsBootloaderTask, FixZiplBootloaderTask};
pub use initrd::RecreateInitrdsTask;
pub use install::InstallBootloaderTask;
pub use rescue::CreateRescueImagesTask;

use crate::error::RsbootinstError;
use crate::runner::ProcessRunner;

/// Location of the legacy kernel installation helper inside the target root.
pub(crate) const NEW_KERNEL_PKG: &str = "usr/sbin/new-kernel-pkg";

/// Kind of payload that populated the target root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PayloadType {
    /// Individual packages installed through a package transaction.
    Dnf,
    /// An ostree deployment; it manages its own boot entries.
    RpmOstree,
    /// A live filesystem image copied onto the target.
    LiveImage,
    /// The running live system copied onto the target.
    LiveOs,
}

impl PayloadType {
    /// Returns true for payloads copied from a pre-built filesystem image.
    ///
    /// Such payloads carry kernels whose post-install hooks never ran on the
    /// target, so initrds and boot entries have to be regenerated.
    pub fn is_live(self) -> bool {
        matches!(self, Self::LiveImage | Self::LiveOs)
    }
}

/// What the installation is written to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetKind {
    /// Block devices of the machine being installed.
    #[default]
    Hardware,
    /// A disk image file.
    Image,
    /// A plain directory, not backed by block devices.
    Directory,
}

/// Returns true if the legacy `new-kernel-pkg` helper is present in the target root.
pub(crate) fn has_new_kernel_pkg(sysroot: &Utf8Path) -> bool {
    sysroot.join(NEW_KERNEL_PKG).exists()
}

/// Fails with a validation error when no kernel version was supplied.
pub(crate) fn require_versions(versions: &[String]) -> Result<(), RsbootinstError> {
    if versions.is_empty() {
        return Err(RsbootinstError::Validation(
            "at least one kernel version is required".to_string(),
        ));
    }
    Ok(())
}

/// A single step of the boot loader installation.
#[derive(Debug, Clone)]
pub enum InstallationTask {
    CreateRescueImages(CreateRescueImagesTask),
    ConfigureBootloader(ConfigureBootloaderTask),
    InstallBootloader(InstallBootloaderTask),
    CreateBlsEntries(CreateBlsEntriesTask),
    RecreateInitrds(RecreateInitrdsTask),
    FixBtrfsBootloader(FixBtrfsBootloaderTask),
    FixZiplBootloader(FixZiplBootloaderTask),
}

impl InstallationTask {
    /// Returns a human-readable name for this task.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRescueImages(_) => "create rescue images",
            Self::ConfigureBootloader(_) => "configure the boot loader",
            Self::InstallBootloader(_) => "install the boot loader",
            Self::CreateBlsEntries(_) => "create BLS entries",
            Self::RecreateInitrds(_) => "recreate initrds",
            Self::FixBtrfsBootloader(_) => "fix the boot loader on btrfs",
            Self::FixZiplBootloader(_) => "rerun zipl",
        }
    }

    /// Runs the task.
    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        match self {
            Self::CreateRescueImages(task) => task.run(runner),
            Self::ConfigureBootloader(task) => task.run(),
            Self::InstallBootloader(task) => task.run(runner),
            Self::CreateBlsEntries(task) => task.run(runner),
            Self::RecreateInitrds(task) => task.run(runner),
            Self::FixBtrfsBootloader(task) => task.run(runner),
            Self::FixZiplBootloader(task) => task.run(runner),
        }
    }
}

macro_rules! impl_from_task {
    ($($task:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$task> for InstallationTask {
                fn from(task: $task) -> Self {
                    Self::$variant(task)
                }
            }
        )*
    };
}

impl_from_task! {
    CreateRescueImagesTask => CreateRescueImages,
    ConfigureBootloaderTask => ConfigureBootloader,
    InstallBootloaderTask => InstallBootloader,
    CreateBlsEntriesTask => CreateBlsEntries,
    RecreateInitrdsTask => RecreateInitrds,
    FixBtrfsBootloaderTask => FixBtrfsBootloader,
    FixZiplBootloaderTask => FixZiplBootloader,
}
