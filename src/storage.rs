//! Read-only view of the target's storage configuration.
//!
//! Device discovery happens elsewhere; this crate only consumes the result
//! as a [`DeviceTree`] (loaded from the profile) and bundles it with the
//! resolved boot loader into a [`StorageSnapshot`]. Tasks never change the
//! device graph. The only mutable part of the snapshot is the boot loader,
//! which accumulates images and kernel arguments.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use crate::bootloader::BootLoader;

/// Kind of a storage device.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    #[default]
    Disk,
    Partition,
    Lvm,
    Raid,
    BtrfsVolume,
    BtrfsSubvolume,
}

impl DeviceKind {
    /// Returns true for devices backed by a (possibly multi-device) btrfs volume.
    pub fn is_btrfs(self) -> bool {
        matches!(self, Self::BtrfsVolume | Self::BtrfsSubvolume)
    }
}

/// Type of the format (filesystem, label, etc.) found on a device.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Disklabel,
    Btrfs,
    Ext4,
    Xfs,
    Vfat,
    Efi,
    Ntfs,
    Swap,
    Prepboot,
    Biosboot,
    #[serde(other)]
    Other,
}

/// Format found on a device.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Format {
    #[serde(rename = "type")]
    pub fs_type: FormatType,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// A single node of the device graph.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Device {
    /// Kernel name of the device (e.g. `sda2`).
    pub name: String,
    #[serde(default)]
    pub kind: DeviceKind,
    /// Names of the devices this one is built on.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Partition number on the parent disk, for partitions.
    #[serde(default)]
    pub partition_number: Option<u32>,
    #[serde(default)]
    pub format: Option<Format>,
}

impl Device {
    /// Creates an unformatted disk.
    pub fn disk(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Disk,
            parents: Vec::new(),
            partition_number: None,
            format: None,
        }
    }

    /// Creates a partition of `disk`.
    pub fn partition(name: impl Into<String>, disk: impl Into<String>, number: u32) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Partition,
            parents: vec![disk.into()],
            partition_number: Some(number),
            format: None,
        }
    }

    /// Sets the device kind.
    #[must_use]
    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Adds a parent device.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    /// Sets the format, optionally mounted at `mountpoint`.
    #[must_use]
    pub fn with_format(mut self, fs_type: FormatType, mountpoint: Option<&str>) -> Self {
        self.format = Some(Format {
            fs_type,
            mountpoint: mountpoint.map(str::to_string),
            uuid: None,
            label: None,
        });
        self
    }

    /// Sets the filesystem UUID of the existing format.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        if let Some(format) = self.format.as_mut() {
            format.uuid = Some(uuid.into());
        }
        self
    }

    /// Returns the device node path (e.g. `/dev/sda2`).
    pub fn path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    /// Returns the mount point of the device's format.
    pub fn mountpoint(&self) -> Option<&str> {
        self.format.as_ref()?.mountpoint.as_deref()
    }

    /// Returns the format type, if the device is formatted.
    pub fn format_type(&self) -> Option<FormatType> {
        self.format.as_ref().map(|f| f.fs_type)
    }

    /// Returns the value a `root=` kernel argument should use for this device.
    pub fn root_spec(&self) -> String {
        match self.format.as_ref().and_then(|f| f.uuid.as_deref()) {
            Some(uuid) => format!("UUID={}", uuid),
            None => self.path(),
        }
    }
}

/// The device graph of the target system.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DeviceTree {
    devices: Vec<Device>,
}

impl DeviceTree {
    /// Creates a tree from a list of devices.
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Adds a device to the tree.
    pub fn add(&mut self, device: Device) {
        self.devices.push(device);
    }

    /// Returns all devices.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Looks up a device by name.
    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Returns the devices whose format is mounted at `mountpoint`.
    pub fn mounted_at<'a>(&'a self, mountpoint: &'a str) -> impl Iterator<Item = &'a Device> {
        self.devices
            .iter()
            .filter(move |d| d.mountpoint() == Some(mountpoint))
    }

    /// Walks the parent chain of `device` to the disk it lives on.
    pub fn disk_of<'a>(&'a self, device: &'a Device) -> Option<&'a Device> {
        let mut current = device;
        // The graph comes from user input; bound the walk instead of trusting it to be acyclic.
        for _ in 0..=self.devices.len() {
            if current.kind == DeviceKind::Disk {
                return Some(current);
            }
            current = self.get(current.parents.first()?)?;
        }
        None
    }
}

/// Snapshot of the storage configuration at the time tasks run.
///
/// Shared between task handles through an `Arc`; the boot loader sits
/// behind a mutex because the configuration and installation tasks feed it
/// images and kernel arguments.
#[derive(Debug)]
pub struct StorageSnapshot {
    devices: DeviceTree,
    root_device: Option<String>,
    boot_drive: Option<String>,
    bootloader: Mutex<Box<dyn BootLoader>>,
}

impl StorageSnapshot {
    /// Creates a snapshot of `devices` holding the resolved `bootloader`.
    pub fn new(devices: DeviceTree, bootloader: Box<dyn BootLoader>) -> Self {
        Self {
            devices,
            root_device: None,
            boot_drive: None,
            bootloader: Mutex::new(bootloader),
        }
    }

    /// Names the device holding the root filesystem.
    ///
    /// When unset, the device mounted at `/` is used.
    #[must_use]
    pub fn with_root_device(mut self, name: impl Into<String>) -> Self {
        self.root_device = Some(name.into());
        self
    }

    /// Names the device the boot loader's first stage goes to.
    #[must_use]
    pub fn with_boot_drive(mut self, name: impl Into<String>) -> Self {
        self.boot_drive = Some(name.into());
        self
    }

    /// Returns the device graph.
    pub fn devices(&self) -> &DeviceTree {
        &self.devices
    }

    /// Returns the device holding the root filesystem.
    pub fn root_device(&self) -> Option<&Device> {
        match self.root_device.as_deref() {
            Some(name) => self.devices.get(name),
            None => self.devices.mounted_at("/").next(),
        }
    }

    /// Returns the device the boot loader's first stage is installed to.
    pub fn boot_drive(&self) -> Option<&Device> {
        self.devices.get(self.boot_drive.as_deref()?)
    }

    /// Locks and returns the resolved boot loader.
    pub fn bootloader(&self) -> MutexGuard<'_, Box<dyn BootLoader>> {
        // The boot loader holds plain data; a panic in another holder leaves it usable.
        self.bootloader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
