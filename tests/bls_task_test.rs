mod helpers;

use std::sync::Arc;

use helpers::{
    MockExecutor, RecordingBootLoader, VERSION, argv, dry_runner, runner, simple_devices,
    snapshot, temp_sysroot, touch,
};
use rsbootinst::bootloader::BootLoaderKind;
use rsbootinst::tasks::{CreateBlsEntriesTask, PayloadType};

fn kernel_install(version: &str) -> Vec<String> {
    argv(&["kernel-install", "add", version, &format!("/lib/modules/{}/vmlinuz", version)])
}

#[test]
fn test_bls_entries_skipped_for_non_live_payloads() {
    let (_dir, root) = temp_sysroot();
    let (loader, _) = RecordingBootLoader::new(BootLoaderKind::Grub2);
    let storage = snapshot(Box::new(loader), simple_devices());
    let executor = Arc::new(MockExecutor::new());

    for payload in [PayloadType::RpmOstree, PayloadType::Dnf] {
        CreateBlsEntriesTask::new(storage.clone(), root.clone(), payload, vec![VERSION.to_string()])
            .run(&runner(&executor))
            .unwrap();
    }

    assert_eq!(executor.call_count(), 0);
}

#[test]
fn test_bls_entries_skipped_with_new_kernel_pkg() {
    let (_dir, root) = temp_sysroot();
    touch(&root, "usr/sbin/new-kernel-pkg");
    let (loader, _) = RecordingBootLoader::new(BootLoaderKind::Grub2);
    let storage = snapshot(Box::new(loader), simple_devices());
    let executor = Arc::new(MockExecutor::new());

    CreateBlsEntriesTask::new(storage, root, PayloadType::LiveImage, vec![VERSION.to_string()])
        .run(&runner(&executor))
        .unwrap();

    assert_eq!(executor.call_count(), 0);
}

#[test]
fn test_bls_entries_replace_stale_entries() {
    let (_dir, root) = temp_sysroot();
    let stale = touch(&root, "boot/loader/entries/fake.conf");
    let (loader, _) = RecordingBootLoader::new(BootLoaderKind::Grub2);
    let storage = snapshot(Box::new(loader), simple_devices());
    let executor = Arc::new(MockExecutor::new());

    CreateBlsEntriesTask::new(storage, root, PayloadType::LiveImage, vec![VERSION.to_string()])
        .run(&runner(&executor))
        .unwrap();

    assert_eq!(
        executor.commands(),
        vec![kernel_install(VERSION), argv(&["grub2-mkconfig", "-o", "/etc/grub2.cfg"])]
    );
    assert!(!stale.exists());
}

#[test]
fn test_bls_entries_use_efi_config_path() {
    let (_dir, root) = temp_sysroot();
    let storage = snapshot(BootLoaderKind::EfiGrub.instantiate(), simple_devices());
    let executor = Arc::new(MockExecutor::new());
    let versions = vec!["6.8.5-301.fc40.x86_64".to_string(), "6.9.1-100.fc40.x86_64".to_string()];

    CreateBlsEntriesTask::new(storage, root, PayloadType::LiveOs, versions)
        .run(&runner(&executor))
        .unwrap();

    assert_eq!(
        executor.commands(),
        vec![
            kernel_install("6.8.5-301.fc40.x86_64"),
            kernel_install("6.9.1-100.fc40.x86_64"),
            argv(&["grub2-mkconfig", "-o", "/etc/grub2-efi.cfg"]),
        ]
    );
}

#[test]
fn test_bls_entries_dry_run_keeps_files() {
    let (_dir, root) = temp_sysroot();
    let stale = touch(&root, "boot/loader/entries/fake.conf");
    let (loader, _) = RecordingBootLoader::new(BootLoaderKind::Grub2);
    let storage = snapshot(Box::new(loader), simple_devices());
    let executor = Arc::new(MockExecutor::new());

    CreateBlsEntriesTask::new(storage, root, PayloadType::LiveImage, vec![VERSION.to_string()])
        .run(&dry_runner(&executor))
        .unwrap();

    assert!(stale.exists());
    assert_eq!(executor.programs(), vec!["kernel-install", "grub2-mkconfig"]);
}
