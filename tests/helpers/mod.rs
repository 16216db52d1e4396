use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use rsbootinst::RsbootinstError;
use rsbootinst::bootloader::{
    BootArgs, BootImage, BootLoader, BootLoaderKind, BootLoaderOptions, BootTarget,
};
use rsbootinst::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use rsbootinst::isolation::ChrootIsolation;
use rsbootinst::runner::ProcessRunner;
use rsbootinst::storage::{Device, DeviceTree, FormatType, StorageSnapshot};

/// Kernel version used throughout the tests.
#[allow(dead_code)]
pub const VERSION: &str = "4.17.7-200.fc28.x86_64";

/// Executor that records every command and reports success.
#[allow(dead_code)]
pub struct MockExecutor {
    calls: Mutex<Vec<Vec<String>>>,
    /// If set, the Nth call (0-indexed) will return an error.
    fail_on_call: Option<usize>,
}

#[allow(dead_code)]
impl MockExecutor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
        }
    }

    pub fn failing_on(call_index: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on_call: Some(call_index),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Returns the host command lines, including the isolation wrapper.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the command lines as seen inside the target root.
    ///
    /// Strips the `chroot <root>` wrapper added by [`runner`].
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .map(|argv| {
                if argv.first().map(String::as_str) == Some("chroot") {
                    argv[2..].to_vec()
                } else {
                    argv
                }
            })
            .collect()
    }

    /// Returns the program names run inside the target root.
    pub fn programs(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|argv| argv.into_iter().next())
            .collect()
    }
}

impl CommandExecutor for MockExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let mut calls = self.calls.lock().unwrap();
        let index = calls.len();
        calls.push(spec.argv());
        drop(calls);

        if self.fail_on_call == Some(index) {
            anyhow::bail!("simulated failure on call {}", index);
        }
        Ok(ExecutionResult {
            status: Some(ExitStatus::from_raw(0)),
        })
    }
}

/// Builds a chroot runner over `executor`.
#[allow(dead_code)]
pub fn runner(executor: &Arc<MockExecutor>) -> ProcessRunner {
    ProcessRunner::new(executor.clone(), Box::new(ChrootIsolation), false)
}

/// Builds a dry-run chroot runner over `executor`.
#[allow(dead_code)]
pub fn dry_runner(executor: &Arc<MockExecutor>) -> ProcessRunner {
    ProcessRunner::new(executor.clone(), Box::new(ChrootIsolation), true)
}

/// Converts a list of string slices into the owned form used for expectations.
#[allow(dead_code)]
pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Creates an empty target root.
#[allow(dead_code)]
pub fn temp_sysroot() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let root =
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("path should be valid UTF-8");
    (dir, root)
}

/// Creates an empty file (and its parents) below `root`.
#[allow(dead_code)]
pub fn touch(root: &Utf8Path, relative: &str) -> Utf8PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "").unwrap();
    path
}

/// Creates an executable file below `root`.
#[allow(dead_code)]
pub fn touch_executable(root: &Utf8Path, relative: &str) -> Utf8PathBuf {
    let path = touch(root, relative);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o775)).unwrap();
    path
}

/// A disk with its root filesystem on the second partition.
#[allow(dead_code)]
pub fn simple_devices() -> DeviceTree {
    DeviceTree::new(vec![
        Device::disk("sda").with_format(FormatType::Disklabel, None),
        Device::partition("sda1", "sda", 1).with_format(FormatType::Ext4, Some("/boot")),
        Device::partition("sda2", "sda", 2)
            .with_format(FormatType::Xfs, Some("/"))
            .with_uuid("0b6e7c3a"),
    ])
}

/// Wraps a boot loader and a device tree into a shared snapshot.
#[allow(dead_code)]
pub fn snapshot(loader: Box<dyn BootLoader>, devices: DeviceTree) -> Arc<StorageSnapshot> {
    Arc::new(StorageSnapshot::new(devices, loader))
}

/// Boot loader that records the calls made to it.
///
/// The call log is shared so it stays readable after the loader is moved
/// into a snapshot.
#[allow(dead_code)]
#[derive(Debug)]
pub struct RecordingBootLoader {
    kind: BootLoaderKind,
    log: Arc<Mutex<Vec<String>>>,
    images: Vec<BootImage>,
    default: Option<BootImage>,
    boot_args: BootArgs,
    options: BootLoaderOptions,
    fail_set_boot_args: bool,
}

#[allow(dead_code)]
impl RecordingBootLoader {
    pub fn new(kind: BootLoaderKind) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let loader = Self {
            kind,
            log: log.clone(),
            images: Vec::new(),
            default: None,
            boot_args: BootArgs::new(),
            options: BootLoaderOptions::default(),
            fail_set_boot_args: false,
        };
        (loader, log)
    }

    pub fn failing_set_boot_args(mut self) -> Self {
        self.fail_set_boot_args = true;
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }
}

impl BootLoader for RecordingBootLoader {
    fn kind(&self) -> BootLoaderKind {
        self.kind
    }

    fn add_image(&mut self, image: BootImage) {
        self.record(format!("add_image {}", image.version));
        self.images.push(image);
    }

    fn set_default(&mut self, image: BootImage) {
        self.record(format!("set_default {}", image.version));
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

    fn set_boot_args(&mut self, _target: &BootTarget<'_>) -> Result<()> {
        self.record("set_boot_args");
        if self.fail_set_boot_args {
            return Err(RsbootinstError::UnavailableStorage("no root device".to_string()).into());
        }
        Ok(())
    }

    fn write_configuration(&self, _target: &BootTarget<'_>, _runner: &ProcessRunner) -> Result<()> {
        self.record("write_configuration");
        Ok(())
    }

    fn install(&self, _target: &BootTarget<'_>, _runner: &ProcessRunner) -> Result<()> {
        self.record("install");
        Ok(())
    }

    fn write(&mut self, _target: &BootTarget<'_>, _runner: &ProcessRunner) -> Result<()> {
        self.record("write");
        Ok(())
    }

    fn has_windows(&self, _devices: &DeviceTree) -> bool {
        false
    }
}

/// Writes `yaml` to a profile file in a fresh temporary directory.
#[allow(dead_code)]
pub fn write_profile(yaml: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let (dir, root) = temp_sysroot();
    let path = root.join("profile.yaml");
    fs::write(&path, yaml).expect("failed to write profile");
    (dir, path)
}
