//! Domain-specific error types for rsbootinst.
//!
//! This module defines `RsbootinstError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of the boot loader
//! installation tasks. Task and executor boundaries return `anyhow::Result`;
//! the typed variants survive that wrapping and can be recovered with
//! `downcast_ref::<RsbootinstError>()`.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent, user-friendly messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)"). For unrecognized
/// error kinds, falls back to including the OS-level error message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for rsbootinst.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RsbootinstError {
    /// The storage snapshot (and with it the resolved boot loader) is not available yet.
    #[error("storage is not available: {0}")]
    UnavailableStorage(String),

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// An external command failed (non-zero exit, spawn failure, missing status, etc.).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed, including its arguments.
        command: String,
        /// Human-readable reason for the failure.
        status: String,
    },

    /// The executable could not be located in `PATH`.
    #[error("command not found in PATH: {command}")]
    CommandNotFound {
        /// The command name that was looked up.
        command: String,
    },

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred, usually including a path.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl RsbootinstError {
    /// Creates an `Io` variant with the `message` field derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates an `Execution` variant for a command run inside a target root.
    pub(crate) fn execution_in_root(
        command: &[String],
        root: &str,
        status: impl Into<String>,
    ) -> Self {
        Self::Execution {
            command: format!("{} (in {})", crate::executor::format_command_args(command), root),
            status: status.into(),
        }
    }
}
