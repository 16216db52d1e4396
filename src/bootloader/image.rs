//! Boot images registered with a boot loader.

/// A Linux kernel the boot loader should offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// Kernel version (e.g. `6.8.5-301.fc40.x86_64`).
    pub version: String,
    /// Menu label.
    pub label: String,
    /// Short menu label.
    pub short_label: String,
    /// Name of the device holding the root filesystem.
    pub device: String,
}

impl BootImage {
    /// Label given to the image of the installed kernel.
    pub const DEFAULT_LABEL: &'static str = "anaconda";
    /// Short label given to the image of the installed kernel.
    pub const DEFAULT_SHORT_LABEL: &'static str = "linux";

    /// Creates the image for the installed Linux kernel `version` on `device`.
    pub fn linux(version: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            label: Self::DEFAULT_LABEL.to_string(),
            short_label: Self::DEFAULT_SHORT_LABEL.to_string(),
            device: device.into(),
        }
    }
}
