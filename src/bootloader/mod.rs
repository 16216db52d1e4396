//! Boot loader abstraction.
//!
//! A [`BootLoader`] is one platform family's implementation of the boot
//! loader capability set. Which family is used is decided by the
//! [`BootLoaderFactory`]; the installation tasks only talk to the trait.
//!
//! All families share [`StandardBootLoader`], whose behavior is selected by
//! its [`BootLoaderKind`]. Tests substitute their own implementations of the
//! trait to observe how the tasks drive it.

mod args;
mod factory;
mod image;
mod options;
mod standard;

use anyhow::Result;
use camino::Utf8Path;
use serde::Deserialize;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

pub use args::{BootArgs, KernelArguments};
pub use factory::{BootLoaderFactory, DEFAULT_NAME};
pub use image::BootImage;
pub use options::{BootLoaderOptions, BootloaderLocation, ZiplSecureBoot};
pub use standard::StandardBootLoader;

use crate::runner::ProcessRunner;
use crate::storage::{Device, DeviceTree, StorageSnapshot};

/// Whether the boot loader is written at all during this run.
///
/// `Disabled` (the user turned it off) and `Skipped` (the platform or
/// payload cannot use it) have the same effect: nothing is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BootloaderMode {
    Disabled,
    #[default]
    Enabled,
    Skipped,
}

/// Boot loader implementation kind, one per platform family.
///
/// The string form is the variant identifier accepted by
/// [`BootLoaderFactory::resolve_by_name`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum BootLoaderKind {
    /// Platform-agnostic fallback; installs nothing.
    #[strum(serialize = "BootLoader")]
    Generic,
    #[strum(serialize = "GRUB2")]
    Grub2,
    #[strum(serialize = "EFIGRUB")]
    EfiGrub,
    #[strum(serialize = "MacEFIGRUB")]
    MacEfiGrub,
    #[strum(serialize = "IPSeriesGRUB2")]
    IpSeriesGrub2,
    #[strum(serialize = "PowerNVGRUB2")]
    PowerNvGrub2,
    #[strum(serialize = "ZIPL")]
    Zipl,
    #[strum(serialize = "EXTLINUX")]
    Extlinux,
    #[strum(serialize = "ArmEFIGRUB")]
    ArmEfiGrub,
    #[strum(serialize = "Aarch64EFIGRUB")]
    Aarch64EfiGrub,
}

impl BootLoaderKind {
    /// Returns the variant identifier.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Constructs a fresh boot loader of this kind.
    pub fn instantiate(self) -> Box<dyn BootLoader> {
        Box::new(StandardBootLoader::new(self))
    }

    /// Returns true for the UEFI variants.
    pub fn is_efi(self) -> bool {
        matches!(
            self,
            Self::EfiGrub | Self::MacEfiGrub | Self::ArmEfiGrub | Self::Aarch64EfiGrub
        )
    }

    /// Returns true for the variants built on GRUB 2.
    pub fn is_grub(self) -> bool {
        matches!(
            self,
            Self::Grub2
                | Self::IpSeriesGrub2
                | Self::PowerNvGrub2
                | Self::EfiGrub
                | Self::MacEfiGrub
                | Self::ArmEfiGrub
                | Self::Aarch64EfiGrub
        )
    }
}

/// What a boot loader operation needs to know about the target system.
#[derive(Debug, Clone, Copy)]
pub struct BootTarget<'a> {
    /// Root of the installed system.
    pub sysroot: &'a Utf8Path,
    /// The device graph.
    pub devices: &'a DeviceTree,
    /// Device holding the root filesystem.
    pub root_device: Option<&'a Device>,
    /// Device receiving the first stage (MBR, PReP partition, ...).
    pub boot_drive: Option<&'a Device>,
}

impl<'a> BootTarget<'a> {
    /// Builds the view of `storage` for a system installed at `sysroot`.
    pub fn new(storage: &'a StorageSnapshot, sysroot: &'a Utf8Path) -> Self {
        Self {
            sysroot,
            devices: storage.devices(),
            root_device: storage.root_device(),
            boot_drive: storage.boot_drive(),
        }
    }
}

/// Capability set of a boot loader.
pub trait BootLoader: Send + std::fmt::Debug {
    /// Returns the implementation kind.
    fn kind(&self) -> BootLoaderKind;

    /// Returns true if the boot loader boots through UEFI.
    fn is_efi(&self) -> bool {
        self.kind().is_efi()
    }

    /// Registers a boot image.
    fn add_image(&mut self, image: BootImage);

    /// Makes `image` the image booted by default.
    fn set_default(&mut self, image: BootImage);

    /// Returns the registered boot images.
    fn images(&self) -> &[BootImage];

    /// Returns the image booted by default.
    fn default_image(&self) -> Option<&BootImage>;

    /// Returns the accumulated kernel arguments.
    fn boot_args(&self) -> &BootArgs;

    /// Returns the accumulated kernel arguments for modification.
    fn boot_args_mut(&mut self) -> &mut BootArgs;

    /// Returns the user-facing settings.
    fn options(&self) -> &BootLoaderOptions;

    /// Returns the user-facing settings for modification.
    fn options_mut(&mut self) -> &mut BootLoaderOptions;

    /// Completes the kernel arguments from the target's storage configuration.
    fn set_boot_args(&mut self, target: &BootTarget<'_>) -> Result<()>;

    /// Writes the boot loader configuration into the target root.
    fn write_configuration(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()>;

    /// Installs the boot loader's binaries / first stage.
    fn install(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()>;

    /// Writes the configuration, then installs the boot loader.
    fn write(&mut self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()> {
        self.write_configuration(target, runner)?;
        self.install(target, runner)
    }

    /// Returns true if another operating system installation (Windows) was found.
    fn has_windows(&self, devices: &DeviceTree) -> bool;
}
