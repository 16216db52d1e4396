//! YAML profile describing one boot loader installation.
//!
//! A profile names the target root, what populated it (payload and kernel
//! versions), how the boot loader should be configured, how commands enter
//! the target root, and the storage layout the installer produced.

use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::str::FromStr;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::bootloader::{
    BootLoaderKind, BootLoaderOptions, BootloaderLocation, BootloaderMode, DEFAULT_NAME,
    KernelArguments, ZiplSecureBoot,
};
use crate::error::RsbootinstError;
use crate::isolation::IsolationConfig;
use crate::platform::{Arch, FixedPlatform, HostPlatformDetector, PlatformDetector, PlatformType};
use crate::storage::DeviceTree;
use crate::tasks::{PayloadType, TargetKind};

/// Where the installer's own kernel command line is read from by default.
pub const INSTALLER_CMDLINE_PATH: &str = "/proc/cmdline";

fn default_sysroot() -> Utf8PathBuf {
    Utf8PathBuf::from("/mnt/sysimage")
}

fn default_bootloader_type() -> String {
    DEFAULT_NAME.to_string()
}

/// Deserializes an optional value through its `FromStr` implementation.
fn deserialize_opt_from_str<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| s.parse::<T>().map_err(serde::de::Error::custom))
        .transpose()
}

fn deserialize_opt_arch<'de, D>(deserializer: D) -> Result<Option<Arch>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(|s| Arch::from_name(&s)))
}

/// Boot loader settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BootloaderConfig {
    #[serde(default)]
    pub mode: BootloaderMode,
    /// Variant identifier (e.g. `GRUB2`), or `DEFAULT` to use the machine's default.
    #[serde(rename = "type", default = "default_bootloader_type")]
    pub bootloader_type: String,
    /// Kernel arguments added to the installed system's command line.
    #[serde(default)]
    pub extra_arguments: Vec<String>,
    /// Directory below `\EFI\` holding the boot loader binaries.
    #[serde(default)]
    pub efi_dir: Option<String>,
    /// Label of the firmware boot entry.
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub preferred_location: BootloaderLocation,
    /// Boot drive used when `storage.boot_drive` is unset.
    #[serde(default)]
    pub drive: Option<String>,
    /// Candidate boot drives, most preferred first.
    #[serde(default)]
    pub drive_order: Vec<String>,
    #[serde(default)]
    pub keep_mbr: bool,
    #[serde(default)]
    pub keep_boot_order: bool,
    /// Boot menu timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub zipl_secure_boot: ZiplSecureBoot,
    /// Encrypted boot loader password.
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            mode: BootloaderMode::default(),
            bootloader_type: default_bootloader_type(),
            extra_arguments: Vec::new(),
            efi_dir: None,
            product_name: None,
            preferred_location: BootloaderLocation::default(),
            drive: None,
            drive_order: Vec::new(),
            keep_mbr: false,
            keep_boot_order: false,
            timeout: None,
            zipl_secure_boot: ZiplSecureBoot::default(),
            password: None,
        }
    }
}

impl BootloaderConfig {
    /// Checks that the boot loader type names a known variant.
    pub fn validate(&self) -> Result<(), RsbootinstError> {
        if self.bootloader_type != DEFAULT_NAME
            && BootLoaderKind::from_str(&self.bootloader_type).is_err()
        {
            return Err(RsbootinstError::Validation(format!(
                "unknown boot loader type '{}'",
                self.bootloader_type
            )));
        }
        if let Some(arg) = self.extra_arguments.iter().find(|a| a.trim().is_empty()) {
            return Err(RsbootinstError::Validation(format!(
                "extra boot argument '{}' is empty",
                arg
            )));
        }
        if let Some((i, drive)) = self
            .drive_order
            .iter()
            .enumerate()
            .find(|(i, d)| self.drive_order[..*i].contains(*d))
        {
            return Err(RsbootinstError::Validation(format!(
                "drive '{}' is listed twice in drive_order (position {})",
                drive,
                i + 1
            )));
        }
        if self.password.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(RsbootinstError::Validation(
                "boot loader password must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the drives the boot loader may be installed to, most preferred first.
    pub fn drives(&self) -> impl Iterator<Item = &String> {
        self.drive.iter().chain(self.drive_order.iter())
    }

    /// Returns the settings handed to the resolved boot loader.
    pub fn loader_options(&self) -> BootLoaderOptions {
        BootLoaderOptions {
            location: self.preferred_location,
            keep_mbr: self.keep_mbr,
            keep_boot_order: self.keep_boot_order,
            timeout: self.timeout,
            password: self.password.clone(),
            zipl_secure_boot: self.zipl_secure_boot,
            product_name: self.product_name.clone(),
            efi_dir: self.efi_dir.clone(),
        }
    }
}

/// Storage layout of the target.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub devices: DeviceTree,
    /// Device holding `/`; defaults to the device mounted there.
    #[serde(default)]
    pub root_device: Option<String>,
    /// Device the first stage of the boot loader is written to.
    #[serde(default)]
    pub boot_drive: Option<String>,
}

impl StorageConfig {
    /// Checks that every referenced device exists.
    pub fn validate(&self) -> Result<(), RsbootinstError> {
        let referenced = self.root_device.iter().chain(self.boot_drive.iter());
        for name in referenced {
            if self.devices.get(name).is_none() {
                return Err(RsbootinstError::Validation(format!(
                    "device '{}' is not defined in storage.devices",
                    name
                )));
            }
        }
        for device in self.devices.iter() {
            if let Some(parent) = device.parents.iter().find(|p| self.devices.get(p).is_none()) {
                return Err(RsbootinstError::Validation(format!(
                    "device '{}' has undefined parent '{}'",
                    device.name, parent
                )));
            }
        }
        Ok(())
    }
}

/// A boot loader installation profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Root of the installed system.
    #[serde(default = "default_sysroot")]
    pub sysroot: Utf8PathBuf,
    #[serde(default)]
    pub target: TargetKind,
    pub payload: PayloadType,
    /// Installed kernel versions; the last one becomes the default boot entry.
    pub kernel_versions: Vec<String>,
    #[serde(default)]
    pub bootloader: BootloaderConfig,
    #[serde(default)]
    pub isolation: IsolationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// The installer's own kernel command line; read from `/proc/cmdline` when unset.
    #[serde(default)]
    pub installer_cmdline: Option<String>,
    /// Overrides platform detection.
    #[serde(default, deserialize_with = "deserialize_opt_from_str")]
    pub platform: Option<PlatformType>,
    /// Overrides the CPU architecture.
    #[serde(default, deserialize_with = "deserialize_opt_arch")]
    pub arch: Option<Arch>,
}

impl Profile {
    /// Validates the profile.
    pub fn validate(&self) -> Result<(), RsbootinstError> {
        if !self.sysroot.is_absolute() {
            return Err(RsbootinstError::Validation(format!(
                "sysroot must be an absolute path, got '{}'",
                self.sysroot
            )));
        }
        if self.kernel_versions.is_empty() {
            return Err(RsbootinstError::Validation(
                "kernel_versions must list at least one kernel".to_string(),
            ));
        }
        if let Some(version) = self
            .kernel_versions
            .iter()
            .find(|v| v.is_empty() || v.contains('/') || v.chars().any(char::is_whitespace))
        {
            return Err(RsbootinstError::Validation(format!(
                "invalid kernel version '{}'",
                version
            )));
        }
        self.bootloader.validate()?;
        self.storage.validate()?;
        if let Some(drive) = self
            .bootloader
            .drives()
            .find(|d| self.storage.devices.get(d.as_str()).is_none())
        {
            return Err(RsbootinstError::Validation(format!(
                "boot loader drive '{}' is not defined in storage.devices",
                drive
            )));
        }
        Ok(())
    }

    /// Returns the CPU architecture of the target.
    pub fn arch(&self) -> Arch {
        self.arch.clone().unwrap_or_else(Arch::host)
    }

    /// Returns the platform detector for this profile.
    pub fn platform_detector(&self) -> Box<dyn PlatformDetector> {
        match &self.platform {
            Some(platform) => Box::new(FixedPlatform(platform.clone())),
            None => Box::new(HostPlatformDetector::new("/", self.arch())),
        }
    }

    /// Returns the installer's own kernel command line.
    pub fn installer_args(&self) -> KernelArguments {
        match &self.installer_cmdline {
            Some(cmdline) => KernelArguments::parse(cmdline),
            None => KernelArguments::from_file(Utf8Path::new(INSTALLER_CMDLINE_PATH)),
        }
    }
}

/// Loads a profile from a YAML file.
pub fn load_profile(path: &Utf8Path) -> Result<Profile> {
    let file = File::open(path)
        .map_err(|e| RsbootinstError::io(format!("failed to open profile {}", path), e))?;
    let reader = BufReader::new(file);
    let profile: Profile = serde_yaml::from_reader(reader)
        .map_err(|e| RsbootinstError::Config(format!("failed to parse {}: {}", path, e)))
        .with_context(|| format!("failed to load profile {}", path))?;
    debug!("loaded profile from {}", path);
    Ok(profile)
}
