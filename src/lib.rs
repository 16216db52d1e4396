pub mod bootloader;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod isolation;
pub mod module;
pub mod pipeline;
pub mod platform;
pub mod runner;
pub mod storage;
pub mod tasks;

pub use error::RsbootinstError;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::bootloader::{BootLoaderFactory, BootLoaderKind, DEFAULT_NAME};
use crate::executor::CommandExecutor;
use crate::module::{BootloaderModule, InstallEnvironment};
use crate::pipeline::Pipeline;
use crate::platform::{PlatformDetector, PlatformType};
use crate::runner::ProcessRunner;

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Builds the boot loader module for a profile and attaches its storage snapshot.
pub fn build_module(
    profile: &config::Profile,
    factory: &BootLoaderFactory,
) -> Result<BootloaderModule> {
    let env = InstallEnvironment::new(profile.sysroot.clone(), profile.target, profile.arch())
        .with_installer_args(profile.installer_args());
    let mut module = BootloaderModule::new(profile.bootloader.clone(), env);

    let detector = profile.platform_detector();
    let snapshot = module
        .create_storage_snapshot(&profile.storage, factory, detector.as_ref())
        .context("failed to resolve the boot loader")?;
    module.on_storage_changed(snapshot);
    Ok(module)
}

/// Runs every installation task of `profile` against its target root.
pub fn apply_profile(
    profile: &config::Profile,
    factory: &BootLoaderFactory,
    executor: Arc<dyn CommandExecutor>,
    dry_run: bool,
) -> Result<()> {
    if !profile.sysroot.is_dir() {
        if !dry_run {
            return Err(RsbootinstError::Validation(format!(
                "target root {} is not a directory",
                profile.sysroot
            ))
            .into());
        }
        warn!("target root {} does not exist", profile.sysroot);
    }

    let module = build_module(profile, factory)?;
    let timeout = module.timeout()?;
    let password_set = module.is_password_set()?;
    let zipl_secure_boot = module.zipl_secure_boot()?;
    info!(?timeout, password_set, %zipl_secure_boot, "boot loader settings");
    let install = module.install_bootloader_with_tasks(profile.payload, &profile.kernel_versions)?;
    let initramfs =
        module.generate_initramfs_with_tasks(profile.payload, &profile.kernel_versions)?;

    let runner = ProcessRunner::from_config(executor, &profile.isolation, dry_run);
    Pipeline::new(&install, &initramfs).run(&runner)?;

    info!(
        "boot loader arguments: {}",
        module.arguments().context("failed to read the boot arguments")?
    );
    Ok(())
}

pub fn run_apply(opts: &cli::ApplyArgs, executor: Arc<dyn CommandExecutor>) -> Result<()> {
    let profile = config::load_profile(opts.file.as_path())
        .with_context(|| format!("failed to load profile from {}", opts.file))?;
    profile.validate().context("profile validation failed")?;

    apply_profile(&profile, BootLoaderFactory::global(), executor, opts.dry_run)
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<()> {
    let profile = config::load_profile(opts.file.as_path())?;
    profile.validate().context("profile validation failed")?;
    info!("validation successful:\n{:#?}", profile);
    Ok(())
}

/// Result of platform detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub platform: PlatformType,
    pub kind: BootLoaderKind,
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform: {}\nboot loader: {}", self.platform, self.kind)
    }
}

/// Detects the platform and resolves the boot loader `name` would create.
pub fn detect(
    detector: &dyn PlatformDetector,
    factory: &BootLoaderFactory,
    name: &str,
) -> Result<Detection> {
    let platform = detector.detect();
    let kind = if name == DEFAULT_NAME {
        factory.default_kind(detector)
    } else {
        factory
            .create_boot_loader(name, detector)
            .with_context(|| format!("cannot resolve boot loader '{}'", name))?
            .kind()
    };
    Ok(Detection { platform, kind })
}

pub fn run_detect(opts: &cli::DetectArgs) -> Result<Detection> {
    let detector = platform::HostPlatformDetector::default();
    detect(&detector, BootLoaderFactory::global(), &opts.bootloader_type)
}
