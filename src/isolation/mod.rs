//! Isolation strategies for running commands inside a target root.
//!
//! Every external program the installation tasks invoke is scoped to the
//! target system root. An [`IsolationStrategy`] turns a root-relative command
//! line into the host command that enters that root (`chroot`,
//! `systemd-nspawn`). A target root of `/` is the running system itself, so
//! commands are then executed directly.

use camino::Utf8Path;
use serde::Deserialize;

pub mod chroot;
pub mod nspawn;

pub use chroot::ChrootIsolation;
pub use nspawn::NspawnIsolation;

use crate::executor::CommandSpec;

/// Trait for isolation backend implementations.
pub trait IsolationStrategy: Send + Sync {
    /// Returns the name of this isolation backend.
    fn name(&self) -> &'static str;

    /// Builds the host command that runs `command` inside `rootfs`.
    ///
    /// `command` holds the program followed by its arguments, exactly as it
    /// should be seen from inside the target root.
    fn build_command(&self, rootfs: &Utf8Path, command: &[String]) -> CommandSpec;
}

/// Returns true when `rootfs` is the running system's root.
pub(crate) fn is_host_root(rootfs: &Utf8Path) -> bool {
    rootfs.as_str().trim_end_matches('/').is_empty()
}

/// Builds a spec that runs `command` on the host without any wrapper.
pub(crate) fn direct_command(command: &[String]) -> CommandSpec {
    match command.split_first() {
        Some((program, args)) => CommandSpec::new(program.clone(), args.to_vec()),
        None => CommandSpec::new(String::new(), Vec::new()),
    }
}

/// Isolation backend configuration.
///
/// The `type` field in YAML determines which variant is used. If not
/// specified, defaults to chroot.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IsolationConfig {
    /// chroot isolation (default)
    #[default]
    Chroot,
    /// systemd-nspawn container
    Nspawn(NspawnIsolation),
}

impl IsolationConfig {
    /// Returns a boxed isolation strategy for this configuration.
    pub fn as_strategy(&self) -> Box<dyn IsolationStrategy> {
        match self {
            IsolationConfig::Chroot => Box::new(ChrootIsolation),
            IsolationConfig::Nspawn(cfg) => Box::new(cfg.clone()),
        }
    }
}
