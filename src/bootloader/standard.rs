//! The boot loader implementation shared by all platform families.

use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::{debug, info};

use super::{
    BootArgs, BootImage, BootLoader, BootLoaderKind, BootLoaderOptions, BootTarget,
    BootloaderLocation,
};
use crate::error::RsbootinstError;
use crate::runner::ProcessRunner;
use crate::storage::{Device, DeviceTree, FormatType};

/// Mount point of the EFI system partition.
const EFI_MOUNTPOINT: &str = "/boot/efi";

const BOOT_MOUNTPOINT: &str = "/boot";

/// Boot loader whose behavior is selected by its [`BootLoaderKind`].
#[derive(Debug, Clone)]
pub struct StandardBootLoader {
    kind: BootLoaderKind,
    images: Vec<BootImage>,
    default: Option<BootImage>,
    boot_args: BootArgs,
    options: BootLoaderOptions,
}

impl StandardBootLoader {
    pub fn new(kind: BootLoaderKind) -> Self {
        Self {
            kind,
            images: Vec::new(),
            default: None,
            boot_args: BootArgs::new(),
            options: BootLoaderOptions::default(),
        }
    }

    /// Path of the generated GRUB configuration inside the target root.
    fn grub_config_path(&self) -> &'static str {
        if self.kind.is_efi() {
            "/etc/grub2-efi.cfg"
        } else {
            "/etc/grub2.cfg"
        }
    }

    /// Writes `etc/kernel/cmdline`, the kernel arguments `kernel-install` picks up.
    fn write_kernel_cmdline(&self, sysroot: &Utf8Path, dry_run: bool) -> Result<()> {
        let path = sysroot.join("etc/kernel/cmdline");
        if dry_run {
            info!("would write kernel command line to {}: {}", path, self.boot_args);
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RsbootinstError::io(format!("failed to create {}", parent), e))?;
        }
        fs::write(&path, format!("{}\n", self.boot_args))
            .map_err(|e| RsbootinstError::io(format!("failed to write {}", path), e))?;
        debug!("wrote kernel command line to {}", path);
        Ok(())
    }

    /// Picks the device receiving the first stage of a BIOS GRUB installation.
    fn grub2_stage1<'a>(&self, target: &BootTarget<'a>) -> Result<&'a Device> {
        let (stage1, wanted) = match self.options.location {
            BootloaderLocation::Mbr => (target.boot_drive, "boot drive"),
            BootloaderLocation::Partition => (
                target
                    .devices
                    .mounted_at(BOOT_MOUNTPOINT)
                    .next()
                    .or(target.root_device),
                "boot partition",
            ),
        };
        stage1.ok_or_else(|| {
            RsbootinstError::Validation(format!("{} requires a {} to install to", self.kind, wanted))
                .into()
        })
    }

    fn install_grub2(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()> {
        let stage1 = self.grub2_stage1(target)?;
        let mut args = vec!["--no-floppy".to_string()];
        match self.options.location {
            // Partitions have no embedding area; blocklists need --force.
            BootloaderLocation::Partition => args.push("--force".to_string()),
            BootloaderLocation::Mbr if self.options.keep_mbr => {
                info!("keeping the existing boot sector of {}", stage1.path());
                args.push("--no-bootsector".to_string());
            }
            BootloaderLocation::Mbr => {}
        }
        args.push(stage1.path());
        runner.run(target.sysroot, "grub2-install", &args)
    }

    fn install_ipseries_grub2(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()> {
        let prep = target
            .devices
            .iter()
            .find(|d| d.format_type() == Some(FormatType::Prepboot))
            .or(target.boot_drive)
            .ok_or_else(|| {
                RsbootinstError::Validation(format!(
                    "{} requires a PReP boot partition or boot drive",
                    self.kind
                ))
            })?;
        runner.run(
            target.sysroot,
            "grub2-install",
            &["--no-nvram".to_string(), prep.path()],
        )
    }

    fn install_efi(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()> {
        let esp = target.devices.mounted_at(EFI_MOUNTPOINT).next().ok_or_else(|| {
            RsbootinstError::Validation(format!("no EFI system partition mounted at {}", EFI_MOUNTPOINT))
        })?;
        let disk = target.devices.disk_of(esp).ok_or_else(|| {
            RsbootinstError::Validation(format!("cannot find the disk holding {}", esp.name))
        })?;
        let partition = esp.partition_number.ok_or_else(|| {
            RsbootinstError::Validation(format!("{} has no partition number", esp.name))
        })?;

        let os_release = OsRelease::load(target.sysroot);
        let label = self.options.product_name.clone().unwrap_or(os_release.name);
        let efi_dir = self.options.efi_dir.clone().unwrap_or(os_release.id);
        let binary = match self.kind {
            BootLoaderKind::Aarch64EfiGrub => "shimaa64.efi",
            BootLoaderKind::ArmEfiGrub => "grubarm.efi",
            _ => "shimx64.efi",
        };
        let loader = format!("\\EFI\\{}\\{}", efi_dir, binary);
        // -C creates the entry without touching BootOrder.
        let create = if self.options.keep_boot_order { "-C" } else { "-c" };

        runner.run(
            target.sysroot,
            "efibootmgr",
            &[
                create.to_string(),
                "-w".to_string(),
                "-L".to_string(),
                label,
                "-d".to_string(),
                disk.path(),
                "-p".to_string(),
                partition.to_string(),
                "-l".to_string(),
                loader,
            ],
        )
    }
}

impl BootLoader for StandardBootLoader {
    fn kind(&self) -> BootLoaderKind {
        self.kind
    }

    fn add_image(&mut self, image: BootImage) {
        if !self.images.contains(&image) {
            self.images.push(image);
        }
    }

    fn set_default(&mut self, image: BootImage) {
        self.default = Some(image);
    }

    fn images(&self) -> &[BootImage] {
        &self.images
    }

    fn default_image(&self) -> Option<&BootImage> {
        self.default.as_ref()
    }

    fn boot_args(&self) -> &BootArgs {
        &self.boot_args
    }

    fn boot_args_mut(&mut self) -> &mut BootArgs {
        &mut self.boot_args
    }

    fn options(&self) -> &BootLoaderOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut BootLoaderOptions {
        &mut self.options
    }

    fn set_boot_args(&mut self, target: &BootTarget<'_>) -> Result<()> {
        let root = target.root_device.ok_or_else(|| {
            RsbootinstError::UnavailableStorage("no root device to boot from".to_string())
        })?;

        let mut args = BootArgs::new();
        args.add(format!("root={}", root.root_spec()));
        args.add("ro");
        args.update(self.boot_args.iter().filter(|arg| !arg.starts_with("root=")));
        self.boot_args = args;

        debug!("boot arguments: {}", self.boot_args);
        Ok(())
    }

    fn write_configuration(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()> {
        if self.kind == BootLoaderKind::Generic {
            debug!("generic boot loader has no configuration to write");
            return Ok(());
        }

        self.write_kernel_cmdline(target.sysroot, runner.dry_run())?;
        if self.kind.is_grub() {
            runner
                .run(
                    target.sysroot,
                    "grub2-mkconfig",
                    &["-o".to_string(), self.grub_config_path().to_string()],
                )
                .context("failed to generate the GRUB configuration")?;
        }
        Ok(())
    }

    fn install(&self, target: &BootTarget<'_>, runner: &ProcessRunner) -> Result<()> {
        info!("installing boot loader {}", self.kind);
        match self.kind {
            BootLoaderKind::Generic | BootLoaderKind::PowerNvGrub2 => {
                // Petitboot reads the configuration directly; nothing to install.
                Ok(())
            }
            BootLoaderKind::Grub2 => self.install_grub2(target, runner),
            BootLoaderKind::IpSeriesGrub2 => self.install_ipseries_grub2(target, runner),
            BootLoaderKind::EfiGrub
            | BootLoaderKind::MacEfiGrub
            | BootLoaderKind::ArmEfiGrub
            | BootLoaderKind::Aarch64EfiGrub => self.install_efi(target, runner),
            BootLoaderKind::Zipl => runner.run(target.sysroot, "zipl", &[]),
            BootLoaderKind::Extlinux => runner.run(
                target.sysroot,
                "extlinux",
                &["--install".to_string(), "/boot/extlinux".to_string()],
            ),
        }
    }

    fn has_windows(&self, devices: &DeviceTree) -> bool {
        self.kind.is_grub()
            && devices
                .iter()
                .any(|d| d.format_type() == Some(FormatType::Ntfs))
    }
}

/// The fields of the target's `etc/os-release` used for firmware boot entries.
struct OsRelease {
    name: String,
    id: String,
}

impl OsRelease {
    fn load(sysroot: &Utf8Path) -> Self {
        let content = fs::read_to_string(sysroot.join("etc/os-release")).unwrap_or_default();
        let field = |key: &str| {
            content.lines().find_map(|line| {
                let (k, v) = line.split_once('=')?;
                (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
            })
        };
        Self {
            name: field("NAME").unwrap_or_else(|| "Linux".to_string()),
            id: field("ID").unwrap_or_else(|| "linux".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::{Arc, Mutex};

    use camino::Utf8PathBuf;

    use super::*;
    use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};
    use crate::isolation::ChrootIsolation;
    use crate::storage::Device;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CommandExecutor for RecordingExecutor {
        fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
            self.calls.lock().unwrap().push(spec.argv());
            Ok(ExecutionResult {
                status: Some(ExitStatus::from_raw(0)),
            })
        }
    }

    fn runner() -> (Arc<RecordingExecutor>, ProcessRunner) {
        let executor = Arc::new(RecordingExecutor::default());
        let runner = ProcessRunner::new(executor.clone(), Box::new(ChrootIsolation), false);
        (executor, runner)
    }

    fn sysroot() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .expect("path should be valid UTF-8");
        (dir, root)
    }

    fn efi_tree() -> DeviceTree {
        DeviceTree::new(vec![
            Device::disk("nvme0n1").with_format(FormatType::Disklabel, None),
            Device::partition("nvme0n1p1", "nvme0n1", 1)
                .with_format(FormatType::Efi, Some("/boot/efi")),
            Device::partition("nvme0n1p2", "nvme0n1", 2)
                .with_format(FormatType::Xfs, Some("/"))
                .with_uuid("f00d"),
        ])
    }

    #[test]
    fn test_set_boot_args_replaces_root() {
        let tree = efi_tree();
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: tree.get("nvme0n1p2"),
            boot_drive: None,
        };
        let mut loader = StandardBootLoader::new(BootLoaderKind::EfiGrub);
        loader.boot_args_mut().update(["root=/dev/sdz1", "quiet"]);
        loader.set_boot_args(&target).unwrap();
        assert_eq!(loader.boot_args().to_string(), "root=UUID=f00d ro quiet");
    }

    #[test]
    fn test_set_boot_args_requires_root_device() {
        let tree = DeviceTree::default();
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: None,
            boot_drive: None,
        };
        let mut loader = StandardBootLoader::new(BootLoaderKind::Grub2);
        let err = loader.set_boot_args(&target).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RsbootinstError>(),
            Some(RsbootinstError::UnavailableStorage(_))
        ));
    }

    #[test]
    fn test_efi_install_registers_firmware_entry() {
        let (_dir, root) = sysroot();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/os-release"), "NAME=\"Fedora Linux\"\nID=fedora\n").unwrap();

        let tree = efi_tree();
        let target = BootTarget {
            sysroot: &root,
            devices: &tree,
            root_device: tree.get("nvme0n1p2"),
            boot_drive: None,
        };
        let (executor, runner) = runner();
        StandardBootLoader::new(BootLoaderKind::EfiGrub)
            .install(&target, &runner)
            .unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0][2..],
            [
                "efibootmgr",
                "-c",
                "-w",
                "-L",
                "Fedora Linux",
                "-d",
                "/dev/nvme0n1",
                "-p",
                "1",
                "-l",
                "\\EFI\\fedora\\shimx64.efi",
            ]
        );
    }

    #[test]
    fn test_efi_identity_overrides_os_release() {
        let (_dir, root) = sysroot();
        let tree = efi_tree();
        let target = BootTarget {
            sysroot: &root,
            devices: &tree,
            root_device: None,
            boot_drive: None,
        };
        let (executor, runner) = runner();
        let mut loader = StandardBootLoader::new(BootLoaderKind::Aarch64EfiGrub);
        loader.options_mut().product_name = Some("Custom OS".to_string());
        loader.options_mut().efi_dir = Some("custom".to_string());
        loader.install(&target, &runner).unwrap();

        let calls = executor.calls.lock().unwrap();
        assert!(calls[0].contains(&"Custom OS".to_string()));
        assert_eq!(calls[0].last().unwrap(), "\\EFI\\custom\\shimaa64.efi");
    }

    #[test]
    fn test_efi_install_without_esp_fails() {
        let tree = DeviceTree::new(vec![Device::disk("sda")]);
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: None,
            boot_drive: None,
        };
        let (executor, runner) = runner();
        let err = StandardBootLoader::new(BootLoaderKind::Aarch64EfiGrub)
            .install(&target, &runner)
            .unwrap_err();
        assert!(err.to_string().contains("EFI system partition"), "got: {}", err);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_grub2_install_targets_boot_drive() {
        let tree = DeviceTree::new(vec![Device::disk("sda")]);
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: None,
            boot_drive: tree.get("sda"),
        };
        let (executor, runner) = runner();
        StandardBootLoader::new(BootLoaderKind::Grub2)
            .install(&target, &runner)
            .unwrap();
        assert_eq!(
            executor.calls.lock().unwrap()[0],
            vec!["chroot", "/mnt/sysimage", "grub2-install", "--no-floppy", "/dev/sda"]
        );
    }

    #[test]
    fn test_write_configuration_writes_cmdline_and_grub_config() {
        let (_dir, root) = sysroot();
        let tree = efi_tree();
        let target = BootTarget {
            sysroot: &root,
            devices: &tree,
            root_device: tree.get("nvme0n1p2"),
            boot_drive: None,
        };
        let (executor, runner) = runner();
        let mut loader = StandardBootLoader::new(BootLoaderKind::EfiGrub);
        loader.set_boot_args(&target).unwrap();
        loader.write_configuration(&target, &runner).unwrap();

        let cmdline = fs::read_to_string(root.join("etc/kernel/cmdline")).unwrap();
        assert_eq!(cmdline, "root=UUID=f00d ro\n");
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0][2..], ["grub2-mkconfig", "-o", "/etc/grub2-efi.cfg"]);
    }

    #[test]
    fn test_generic_writes_and_installs_nothing() {
        let (_dir, root) = sysroot();
        let tree = DeviceTree::default();
        let target = BootTarget {
            sysroot: &root,
            devices: &tree,
            root_device: None,
            boot_drive: None,
        };
        let (executor, runner) = runner();
        let mut loader = StandardBootLoader::new(BootLoaderKind::Generic);
        loader.write(&target, &runner).unwrap();
        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(!root.join("etc/kernel/cmdline").exists());
    }

    #[test]
    fn test_efi_install_keeps_boot_order() {
        let (_dir, root) = sysroot();
        let tree = efi_tree();
        let target = BootTarget {
            sysroot: &root,
            devices: &tree,
            root_device: None,
            boot_drive: None,
        };
        let (executor, runner) = runner();
        let mut loader = StandardBootLoader::new(BootLoaderKind::EfiGrub);
        loader.options_mut().keep_boot_order = true;
        loader.install(&target, &runner).unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0][2..5], ["efibootmgr", "-C", "-w"]);
        assert!(!calls[0].contains(&"-c".to_string()));
    }

    fn bios_tree() -> DeviceTree {
        DeviceTree::new(vec![
            Device::disk("sda"),
            Device::partition("sda1", "sda", 1).with_format(FormatType::Ext4, Some("/boot")),
            Device::partition("sda2", "sda", 2).with_format(FormatType::Xfs, Some("/")),
        ])
    }

    #[test]
    fn test_grub2_install_to_boot_partition() {
        let tree = bios_tree();
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: tree.get("sda2"),
            boot_drive: tree.get("sda"),
        };
        let (executor, runner) = runner();
        let mut loader = StandardBootLoader::new(BootLoaderKind::Grub2);
        loader.options_mut().location = BootloaderLocation::Partition;
        loader.install(&target, &runner).unwrap();
        assert_eq!(
            executor.calls.lock().unwrap()[0][2..],
            ["grub2-install", "--no-floppy", "--force", "/dev/sda1"]
        );
    }

    #[test]
    fn test_grub2_install_keeps_mbr() {
        let tree = bios_tree();
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: tree.get("sda2"),
            boot_drive: tree.get("sda"),
        };
        let (executor, runner) = runner();
        let mut loader = StandardBootLoader::new(BootLoaderKind::Grub2);
        loader.options_mut().keep_mbr = true;
        loader.install(&target, &runner).unwrap();
        assert_eq!(
            executor.calls.lock().unwrap()[0][2..],
            ["grub2-install", "--no-floppy", "--no-bootsector", "/dev/sda"]
        );
    }

    #[test]
    fn test_grub2_install_without_boot_drive_fails() {
        let tree = bios_tree();
        let target = BootTarget {
            sysroot: Utf8Path::new("/mnt/sysimage"),
            devices: &tree,
            root_device: tree.get("sda2"),
            boot_drive: None,
        };
        let (executor, runner) = runner();
        let err = StandardBootLoader::new(BootLoaderKind::Grub2)
            .install(&target, &runner)
            .unwrap_err();
        assert!(err.to_string().contains("boot drive"), "got: {}", err);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_has_windows_on_every_grub_kind() {
        use strum::IntoEnumIterator;

        let tree = DeviceTree::new(vec![
            Device::disk("sda"),
            Device::partition("sda1", "sda", 1).with_format(FormatType::Ntfs, None),
        ]);
        for kind in BootLoaderKind::iter() {
            let loader = StandardBootLoader::new(kind);
            assert_eq!(loader.has_windows(&tree), kind.is_grub(), "kind {}", kind);
            assert!(!loader.has_windows(&efi_tree()), "kind {} without NTFS", kind);
        }
        assert!(StandardBootLoader::new(BootLoaderKind::PowerNvGrub2).has_windows(&tree));
        assert!(!StandardBootLoader::new(BootLoaderKind::Zipl).has_windows(&tree));
    }

    #[test]
    fn test_add_image_ignores_duplicates() {
        let mut loader = StandardBootLoader::new(BootLoaderKind::Extlinux);
        let image = BootImage::linux("6.8.5", "sda2");
        loader.add_image(image.clone());
        loader.add_image(image.clone());
        loader.set_default(image.clone());
        assert_eq!(loader.images().len(), 1);
        assert_eq!(loader.default_image(), Some(&image));
    }
}
