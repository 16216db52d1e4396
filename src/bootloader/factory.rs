//! Resolution of platforms and names to boot loader kinds.

use std::str::FromStr;
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{debug, warn};

use super::{BootLoader, BootLoaderKind};
use crate::error::RsbootinstError;
use crate::platform::{PlatformDetector, PlatformType};

/// Pseudo-name selecting the default boot loader for the machine.
pub const DEFAULT_NAME: &str = "DEFAULT";

/// Registry mapping hardware platforms and variant names to boot loader kinds.
///
/// The platform and name tables are fixed. The only mutable state is the
/// forced default, which replaces platform detection for the `DEFAULT`
/// pseudo-name. Each registry owns its own slot, so tests build isolated
/// instances; [`BootLoaderFactory::global`] is the process-wide one.
#[derive(Debug, Default)]
pub struct BootLoaderFactory {
    forced_default: Mutex<Option<BootLoaderKind>>,
}

impl BootLoaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static BootLoaderFactory {
        static GLOBAL: OnceLock<BootLoaderFactory> = OnceLock::new();
        GLOBAL.get_or_init(BootLoaderFactory::new)
    }

    /// Returns the platform-agnostic kind used as the fallback.
    pub fn generic_kind(&self) -> BootLoaderKind {
        BootLoaderKind::Generic
    }

    /// Returns the forced default kind, if one was set.
    pub fn forced_default(&self) -> Option<BootLoaderKind> {
        *self.slot()
    }

    /// Sets or clears the forced default kind.
    pub fn set_forced_default(&self, kind: Option<BootLoaderKind>) {
        *self.slot() = kind;
    }

    /// Clears the forced default kind.
    pub fn reset_forced_default(&self) {
        self.set_forced_default(None);
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<BootLoaderKind>> {
        self.forced_default
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a kind by its variant identifier.
    ///
    /// [`DEFAULT_NAME`] only consults the forced default slot.
    pub fn resolve_by_name(&self, name: &str) -> Option<BootLoaderKind> {
        if name == DEFAULT_NAME {
            return self.forced_default();
        }
        BootLoaderKind::from_str(name).ok()
    }

    /// Looks up the kind for a hardware platform.
    pub fn resolve_by_platform(&self, platform: &PlatformType) -> Option<BootLoaderKind> {
        let kind = match platform {
            PlatformType::X86 => BootLoaderKind::Grub2,
            PlatformType::Efi => BootLoaderKind::EfiGrub,
            PlatformType::MacEfi => BootLoaderKind::MacEfiGrub,
            PlatformType::Ppc => BootLoaderKind::Grub2,
            PlatformType::IpSeriesPpc => BootLoaderKind::IpSeriesGrub2,
            PlatformType::PowerNv => BootLoaderKind::PowerNvGrub2,
            PlatformType::S390 => BootLoaderKind::Zipl,
            PlatformType::Arm => BootLoaderKind::Extlinux,
            PlatformType::ArmEfi => BootLoaderKind::ArmEfiGrub,
            PlatformType::Aarch64Efi => BootLoaderKind::Aarch64EfiGrub,
            PlatformType::Unsupported(_) => return None,
        };
        Some(kind)
    }

    /// Returns the kind the machine should use by default.
    ///
    /// Order: forced default, detected platform, generic fallback.
    pub fn default_kind(&self, detector: &dyn PlatformDetector) -> BootLoaderKind {
        if let Some(kind) = self.forced_default() {
            debug!("using forced default boot loader {}", kind);
            return kind;
        }

        let platform = detector.detect();
        match self.resolve_by_platform(&platform) {
            Some(kind) => {
                debug!("platform {} uses boot loader {}", platform, kind);
                kind
            }
            None => {
                warn!(
                    "platform {} has no supported boot loader, falling back to {}",
                    platform,
                    self.generic_kind()
                );
                self.generic_kind()
            }
        }
    }

    /// Creates the default boot loader for the machine. Never fails.
    pub fn create_default_boot_loader(&self, detector: &dyn PlatformDetector) -> Box<dyn BootLoader> {
        self.default_kind(detector).instantiate()
    }

    /// Creates a boot loader by variant identifier or [`DEFAULT_NAME`].
    pub fn create_boot_loader(
        &self,
        name: &str,
        detector: &dyn PlatformDetector,
    ) -> Result<Box<dyn BootLoader>, RsbootinstError> {
        if name == DEFAULT_NAME {
            return Ok(self.create_default_boot_loader(detector));
        }
        self.resolve_by_name(name)
            .map(BootLoaderKind::instantiate)
            .ok_or_else(|| RsbootinstError::Config(format!("unknown boot loader type: {}", name)))
    }
}
