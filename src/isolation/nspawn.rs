//! systemd-nspawn isolation implementation.

use camino::Utf8Path;
use serde::Deserialize;

use super::{IsolationStrategy, direct_command, is_host_root};
use crate::executor::CommandSpec;

/// systemd-nspawn isolation configuration.
///
/// Uses `systemd-nspawn` to run commands in a container booted from the
/// target root. Useful when the tools being run expect a private `/proc`
/// and `/sys`.
///
/// # Example YAML
///
/// ```yaml
/// isolation:
///   type: nspawn
///   quiet: true
///   private_network: true
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NspawnIsolation {
    /// Suppress informational messages (--quiet)
    #[serde(default)]
    pub quiet: bool,

    /// Disconnect networking from the container (--private-network)
    #[serde(default)]
    pub private_network: bool,
}

impl IsolationStrategy for NspawnIsolation {
    fn name(&self) -> &'static str {
        "nspawn"
    }

    fn build_command(&self, rootfs: &Utf8Path, command: &[String]) -> CommandSpec {
        if is_host_root(rootfs) {
            return direct_command(command);
        }

        let mut args: Vec<String> = vec!["-D".to_string(), rootfs.to_string()];

        if self.quiet {
            args.push("--quiet".to_string());
        }

        if self.private_network {
            args.push("--private-network".to_string());
        }

        args.extend(command.iter().cloned());
        CommandSpec::new("systemd-nspawn", args)
    }
}
