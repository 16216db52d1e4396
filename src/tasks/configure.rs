//! Boot loader configuration: registering the installed kernel.

use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;
use tracing::{debug, info};

use super::{PayloadType, require_versions};
use crate::bootloader::{BootImage, BootloaderMode};
use crate::error::RsbootinstError;
use crate::storage::StorageSnapshot;

/// Registers the installed kernel as the default boot image.
#[derive(Debug, Clone)]
pub struct ConfigureBootloaderTask {
    pub storage: Arc<StorageSnapshot>,
    pub mode: BootloaderMode,
    pub payload: PayloadType,
    pub kernel_versions: Vec<String>,
    pub sysroot: Utf8PathBuf,
}

impl ConfigureBootloaderTask {
    pub fn new(
        storage: Arc<StorageSnapshot>,
        mode: BootloaderMode,
        payload: PayloadType,
        kernel_versions: Vec<String>,
        sysroot: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            storage,
            mode,
            payload,
            kernel_versions,
            sysroot: sysroot.into(),
        }
    }

    pub fn run(&self) -> Result<()> {
        if self.mode != BootloaderMode::Enabled {
            debug!("boot loader is {}, not configuring it", self.mode);
            return Ok(());
        }
        if self.payload == PayloadType::RpmOstree {
            debug!("boot entries are managed by the {} payload", self.payload);
            return Ok(());
        }

        require_versions(&self.kernel_versions)?;
        let root = self.storage.root_device().ok_or_else(|| {
            RsbootinstError::UnavailableStorage("no root device in the storage snapshot".to_string())
        })?;

        // Only the newest kernel gets an image; older ones are found by the loader itself.
        let Some(version) = self.kernel_versions.last() else {
            return Ok(());
        };
        let image = BootImage::linux(version.clone(), root.name.clone());
        info!(
            "adding boot image for kernel {} on {} in {}",
            image.version, image.device, self.sysroot
        );

        let mut loader = self.storage.bootloader();
        loader.add_image(image.clone());
        loader.set_default(image);
        Ok(())
    }
}
