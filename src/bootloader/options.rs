//! User-facing boot loader settings carried by every boot loader.

use serde::Deserialize;
use strum::Display;

/// Where the first stage of a BIOS boot loader is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BootloaderLocation {
    /// The master boot record of the boot drive.
    #[default]
    Mbr,
    /// The partition holding `/boot`.
    Partition,
}

/// Secure boot setting passed to zipl on IBM Z.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize)]
pub enum ZiplSecureBoot {
    #[default]
    #[serde(rename = "auto")]
    #[strum(serialize = "auto")]
    Auto,
    #[serde(rename = "1", alias = "on")]
    #[strum(serialize = "1")]
    Enabled,
    #[serde(rename = "0", alias = "off")]
    #[strum(serialize = "0")]
    Disabled,
}

/// Settings applied to the resolved boot loader when storage is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootLoaderOptions {
    pub location: BootloaderLocation,
    /// Leave the boot sector of the boot drive untouched.
    pub keep_mbr: bool,
    /// Register the firmware boot entry without moving it to the front of the boot order.
    pub keep_boot_order: bool,
    /// Seconds the boot menu waits before booting the default image.
    pub timeout: Option<u32>,
    /// Encrypted boot loader password.
    pub password: Option<String>,
    pub zipl_secure_boot: ZiplSecureBoot,
    /// Label of the firmware boot entry; defaults to `NAME` from `os-release`.
    pub product_name: Option<String>,
    /// Directory below `\EFI\`; defaults to `ID` from `os-release`.
    pub efi_dir: Option<String>,
}

impl BootLoaderOptions {
    pub fn is_password_set(&self) -> bool {
        self.password.is_some()
    }
}
