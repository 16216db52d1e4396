//! Initial RAM disk regeneration for live payloads.
//!
//! The initrds of a live image were built for the live environment. They
//! are rebuilt for the target's storage stack, in one of three ways
//! depending on the target kind and on which kernel tooling the payload
//! ships.

use anyhow::Result;
use camino::Utf8PathBuf;
use tracing::{debug, info};

use super::{PayloadType, TargetKind, has_new_kernel_pkg, require_versions};
use crate::bootloader::KernelArguments;
use crate::runner::ProcessRunner;

/// Rebuilds the initrd of every installed kernel.
#[derive(Debug, Clone)]
pub struct RecreateInitrdsTask {
    pub sysroot: Utf8PathBuf,
    pub payload: PayloadType,
    pub kernel_versions: Vec<String>,
    pub target: TargetKind,
    /// Command line the installer itself was booted with.
    pub installer_args: KernelArguments,
}

impl RecreateInitrdsTask {
    pub fn new(
        sysroot: impl Into<Utf8PathBuf>,
        payload: PayloadType,
        kernel_versions: Vec<String>,
        target: TargetKind,
        installer_args: KernelArguments,
    ) -> Self {
        Self {
            sysroot: sysroot.into(),
            payload,
            kernel_versions,
            target,
            installer_args,
        }
    }

    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if !self.payload.is_live() {
            debug!("{} payload builds its own initrds", self.payload);
            return Ok(());
        }
        require_versions(&self.kernel_versions)?;

        if self.target == TargetKind::Image {
            // Device names of the build host mean nothing on the machine booting the image.
            for version in &self.kernel_versions {
                info!("regenerating host-independent initrd for kernel {}", version);
                runner.run(
                    &self.sysroot,
                    "dracut",
                    &[
                        "-N".to_string(),
                        "--persistent-policy".to_string(),
                        "by-uuid".to_string(),
                        "-f".to_string(),
                        initramfs_path(version),
                        version.clone(),
                    ],
                )?;
            }
            return Ok(());
        }

        if has_new_kernel_pkg(&self.sysroot) {
            for version in &self.kernel_versions {
                info!("regenerating initrd for kernel {} with new-kernel-pkg", version);
                runner.run(
                    &self.sysroot,
                    "new-kernel-pkg",
                    &[
                        "--mkinitrd".to_string(),
                        "--dracut".to_string(),
                        "--depmod".to_string(),
                        "--update".to_string(),
                        version.clone(),
                    ],
                )?;
            }

            if self.installer_args.get("fips") == Some("1") {
                info!("enabling FIPS mode in {}", self.sysroot);
                runner.run(
                    &self.sysroot,
                    "fips-mode-setup",
                    &["--enable".to_string(), "--no-bootcfg".to_string()],
                )?;
            }
            return Ok(());
        }

        for version in &self.kernel_versions {
            info!("regenerating initrd for kernel {}", version);
            runner.run(&self.sysroot, "depmod", &["-a".to_string(), version.clone()])?;
            runner.run(
                &self.sysroot,
                "dracut",
                &["-f".to_string(), initramfs_path(version), version.clone()],
            )?;
        }
        Ok(())
    }
}

fn initramfs_path(version: &str) -> String {
    format!("/boot/initramfs-{}.img", version)
}
