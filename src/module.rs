//! Boot loader orchestration.
//!
//! [`BootloaderModule`] owns the boot loader configuration and, once the
//! storage configuration is known, the [`StorageSnapshot`] holding the
//! resolved boot loader. It hands out the ordered task lists that install
//! the boot loader and regenerate the initial RAM disks.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{debug, info};

use crate::bootloader::{BootArgs, BootLoader, BootLoaderFactory, KernelArguments, ZiplSecureBoot};
use crate::config::{BootloaderConfig, StorageConfig};
use crate::error::RsbootinstError;
use crate::platform::{Arch, PlatformDetector};
use crate::storage::StorageSnapshot;
use crate::tasks::{
    ConfigureBootloaderTask, CreateBlsEntriesTask, CreateRescueImagesTask,
    FixBtrfsBootloaderTask, FixZiplBootloaderTask, InstallBootloaderTask, InstallationTask,
    PayloadType, RecreateInitrdsTask, TargetKind, require_versions,
};

/// Facts about the installation environment the tasks depend on.
#[derive(Debug, Clone)]
pub struct InstallEnvironment {
    /// Root of the installed system.
    pub sysroot: Utf8PathBuf,
    pub target: TargetKind,
    pub arch: Arch,
    /// Command line the installer itself was booted with.
    pub installer_args: KernelArguments,
}

impl InstallEnvironment {
    pub fn new(sysroot: impl Into<Utf8PathBuf>, target: TargetKind, arch: Arch) -> Self {
        Self {
            sysroot: sysroot.into(),
            target,
            arch,
            installer_args: KernelArguments::default(),
        }
    }

    #[must_use]
    pub fn with_installer_args(mut self, installer_args: KernelArguments) -> Self {
        self.installer_args = installer_args;
        self
    }
}

/// The boot loader module.
#[derive(Debug)]
pub struct BootloaderModule {
    config: BootloaderConfig,
    env: InstallEnvironment,
    storage: Option<Arc<StorageSnapshot>>,
}

impl BootloaderModule {
    pub fn new(config: BootloaderConfig, env: InstallEnvironment) -> Self {
        Self {
            config,
            env,
            storage: None,
        }
    }

    /// Resolves the configured boot loader and builds a snapshot of `storage` holding it.
    pub fn create_storage_snapshot(
        &self,
        storage: &StorageConfig,
        factory: &BootLoaderFactory,
        detector: &dyn PlatformDetector,
    ) -> Result<StorageSnapshot, RsbootinstError> {
        let bootloader = factory.create_boot_loader(&self.config.bootloader_type, detector)?;
        info!("using boot loader {}", bootloader.kind());

        let mut snapshot = StorageSnapshot::new(storage.devices.clone(), bootloader);
        if let Some(root) = &storage.root_device {
            snapshot = snapshot.with_root_device(root);
        }
        let boot_drive = storage.boot_drive.as_ref().or_else(|| {
            self.config
                .drives()
                .find(|name| storage.devices.get(name.as_str()).is_some())
        });
        if let Some(drive) = boot_drive {
            debug!("boot drive: {}", drive);
            snapshot = snapshot.with_boot_drive(drive);
        }
        Ok(snapshot)
    }

    /// Attaches the storage snapshot and applies the configured settings to its boot loader.
    pub fn on_storage_changed(&mut self, snapshot: impl Into<Arc<StorageSnapshot>>) {
        let snapshot = snapshot.into();
        {
            let mut loader = snapshot.bootloader();
            loader
                .boot_args_mut()
                .update(self.config.extra_arguments.iter().cloned());
            *loader.options_mut() = self.config.loader_options();
            debug!("storage snapshot attached, boot loader {}", loader.kind());
        }
        self.storage = Some(snapshot);
    }

    /// Returns the attached storage snapshot.
    pub fn storage(&self) -> Result<&Arc<StorageSnapshot>, RsbootinstError> {
        self.storage.as_ref().ok_or_else(|| {
            RsbootinstError::UnavailableStorage("no storage snapshot has been attached".to_string())
        })
    }

    /// Returns true if the resolved boot loader boots through UEFI.
    pub fn is_efi(&self) -> Result<bool, RsbootinstError> {
        Ok(self.storage()?.bootloader().is_efi())
    }

    /// Returns the kernel arguments accumulated by the resolved boot loader.
    pub fn arguments(&self) -> Result<BootArgs, RsbootinstError> {
        Ok(self.storage()?.bootloader().boot_args().clone())
    }

    /// Returns the boot menu timeout in seconds.
    pub fn timeout(&self) -> Result<Option<u32>, RsbootinstError> {
        Ok(self.storage()?.bootloader().options().timeout)
    }

    /// Returns true if a boot loader password was configured.
    pub fn is_password_set(&self) -> Result<bool, RsbootinstError> {
        Ok(self.storage()?.bootloader().options().is_password_set())
    }

    pub fn zipl_secure_boot(&self) -> Result<ZiplSecureBoot, RsbootinstError> {
        Ok(self.storage()?.bootloader().options().zipl_secure_boot)
    }

    /// Returns true if the boot loader found a Windows installation to chain-load.
    pub fn detect_windows(&self) -> Result<bool, RsbootinstError> {
        let storage = self.storage()?;
        let found = storage.bootloader().has_windows(storage.devices());
        Ok(found)
    }

    /// Returns the tasks that install the boot loader, in execution order.
    pub fn install_bootloader_with_tasks(
        &self,
        payload: PayloadType,
        kernel_versions: &[String],
    ) -> Result<Vec<InstallationTask>, RsbootinstError> {
        let storage = self.storage()?;
        require_versions(kernel_versions)?;
        let sysroot = &self.env.sysroot;
        let mode = self.config.mode;

        Ok(vec![
            CreateRescueImagesTask::new(sysroot.clone(), payload, kernel_versions.to_vec()).into(),
            ConfigureBootloaderTask::new(
                storage.clone(),
                mode,
                payload,
                kernel_versions.to_vec(),
                sysroot.clone(),
            )
            .into(),
            InstallBootloaderTask::new(storage.clone(), mode, sysroot.clone()).into(),
            CreateBlsEntriesTask::new(
                storage.clone(),
                sysroot.clone(),
                payload,
                kernel_versions.to_vec(),
            )
            .into(),
        ])
    }

    /// Returns the tasks that regenerate the initrds and fix up the boot loader, in order.
    pub fn generate_initramfs_with_tasks(
        &self,
        payload: PayloadType,
        kernel_versions: &[String],
    ) -> Result<Vec<InstallationTask>, RsbootinstError> {
        let storage = self.storage()?;
        require_versions(kernel_versions)?;
        let env = &self.env;
        let mode = self.config.mode;

        Ok(vec![
            RecreateInitrdsTask::new(
                env.sysroot.clone(),
                payload,
                kernel_versions.to_vec(),
                env.target,
                env.installer_args.clone(),
            )
            .into(),
            FixBtrfsBootloaderTask::new(
                storage.clone(),
                mode,
                payload,
                kernel_versions.to_vec(),
                env.sysroot.clone(),
                env.target,
            )
            .into(),
            FixZiplBootloaderTask::new(mode, env.sysroot.clone(), env.target, env.arch.clone())
                .into(),
        ])
    }
}
