//! Rescue image creation.
//!
//! Kernels installed from an image never ran their post-install hooks on
//! the target. This task replays them: through the legacy
//! `new-kernel-pkg --rpmposttrans` helper when it exists, otherwise through
//! the scripts in `/etc/kernel/postinst.d/`. Both paths produce the rescue
//! kernel and initrd.

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::Access;
use tracing::{debug, info};

use super::{PayloadType, has_new_kernel_pkg, require_versions};
use crate::error::RsbootinstError;
use crate::runner::ProcessRunner;

/// Directory holding the kernel post-install hooks, relative to the target root.
const POSTINST_DIR: &str = "etc/kernel/postinst.d";

/// Replays kernel post-install hooks to generate rescue images.
#[derive(Debug, Clone)]
pub struct CreateRescueImagesTask {
    pub sysroot: Utf8PathBuf,
    pub payload: PayloadType,
    pub kernel_versions: Vec<String>,
}

impl CreateRescueImagesTask {
    pub fn new(
        sysroot: impl Into<Utf8PathBuf>,
        payload: PayloadType,
        kernel_versions: Vec<String>,
    ) -> Self {
        Self {
            sysroot: sysroot.into(),
            payload,
            kernel_versions,
        }
    }

    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if self.payload == PayloadType::RpmOstree {
            debug!("rescue images are managed by the {} payload", self.payload);
            return Ok(());
        }
        require_versions(&self.kernel_versions)?;

        // The hooks read /etc/machine-id to name the rescue entries.
        if !self.sysroot.join("etc/machine-id").exists() {
            info!("generating machine id for {}", self.sysroot);
            runner.run(&self.sysroot, "systemd-machine-id-setup", &[])?;
        }

        if has_new_kernel_pkg(&self.sysroot) {
            for version in &self.kernel_versions {
                info!("running new-kernel-pkg post-transaction for {}", version);
                runner.run(
                    &self.sysroot,
                    "new-kernel-pkg",
                    &["--rpmposttrans".to_string(), version.clone()],
                )?;
            }
            return Ok(());
        }

        let scripts = postinst_scripts(&self.sysroot)?;
        if scripts.is_empty() {
            debug!("no kernel post-install scripts found in {}", self.sysroot);
            return Ok(());
        }

        for script in &scripts {
            let program = format!("/{}/{}", POSTINST_DIR, script);
            for version in &self.kernel_versions {
                info!("running {} for kernel {}", program, version);
                runner
                    .run(
                        &self.sysroot,
                        &program,
                        &[version.clone(), format!("/boot/vmlinuz-{}", version)],
                    )
                    .with_context(|| format!("kernel post-install script {} failed", script))?;
            }
        }
        Ok(())
    }
}

/// Returns the names of the executable post-install scripts, sorted.
fn postinst_scripts(sysroot: &Utf8Path) -> Result<Vec<String>> {
    let dir = sysroot.join(POSTINST_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&dir)
        .map_err(|e| RsbootinstError::io(format!("failed to read {}", dir), e))?;
    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RsbootinstError::io(format!("failed to read {}", dir), e))?;
        let Ok(name) = entry.file_name().into_string() else {
            debug!("skipping non UTF-8 entry in {}", dir);
            continue;
        };
        let path = dir.join(&name);
        if path.is_file() && rustix::fs::access(path.as_std_path(), Access::EXEC_OK).is_ok() {
            scripts.push(name);
        } else {
            debug!("skipping non-executable {}", path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_postinst_scripts_sorted_and_executable_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let postinst = root.join(POSTINST_DIR);
        fs::create_dir_all(&postinst).unwrap();
        for (name, mode) in [("c", 0o755), ("a", 0o755), ("readme", 0o644), ("b", 0o700)] {
            let path = postinst.join(name);
            fs::write(&path, "#!/bin/sh\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        }
        fs::create_dir(postinst.join("d.d")).unwrap();

        assert_eq!(postinst_scripts(&root).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_postinst_scripts_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        assert!(postinst_scripts(&root).unwrap().is_empty());
    }
}
