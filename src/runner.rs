//! Process runner scoped to a target system root.
//!
//! [`ProcessRunner`] combines a [`CommandExecutor`] with an
//! [`IsolationStrategy`] so installation tasks can say "run `dracut` with
//! these arguments in the target root" without knowing how the root is
//! entered. It also owns result checking: a non-zero exit, or a missing
//! status outside of dry-run mode, becomes an
//! [`RsbootinstError::Execution`].

use std::sync::Arc;

use anyhow::Result;
use camino::Utf8Path;
use tracing::debug;

use crate::error::RsbootinstError;
use crate::executor::{CommandExecutor, ExecutionResult};
use crate::isolation::{IsolationConfig, IsolationStrategy};

/// Runs external programs inside a target root.
pub struct ProcessRunner {
    executor: Arc<dyn CommandExecutor>,
    isolation: Box<dyn IsolationStrategy>,
    dry_run: bool,
}

impl ProcessRunner {
    /// Creates a runner using the given executor and isolation strategy.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        isolation: Box<dyn IsolationStrategy>,
        dry_run: bool,
    ) -> Self {
        Self {
            executor,
            isolation,
            dry_run,
        }
    }

    /// Creates a runner from an isolation configuration.
    pub fn from_config(
        executor: Arc<dyn CommandExecutor>,
        isolation: &IsolationConfig,
        dry_run: bool,
    ) -> Self {
        Self::new(executor, isolation.as_strategy(), dry_run)
    }

    /// Returns true when commands are only logged, not executed.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns the name of the isolation backend in use.
    pub fn isolation_name(&self) -> &'static str {
        self.isolation.name()
    }

    /// Runs `program` with `args` inside `root` and checks the result.
    pub fn run(&self, root: &Utf8Path, program: &str, args: &[String]) -> Result<()> {
        let mut command = Vec::with_capacity(args.len() + 1);
        command.push(program.to_string());
        command.extend(args.iter().cloned());

        let spec = self.isolation.build_command(root, &command);
        debug!(
            root = %root,
            isolation = self.isolation.name(),
            "running {}",
            crate::executor::format_command_args(&command)
        );

        let result = self.executor.execute(&spec).map_err(|e| {
            match e.downcast::<RsbootinstError>() {
                Ok(typed) => typed.into(),
                Err(e) => e.context(format!("failed to execute {}", program)),
            }
        })?;
        check_execution_result(&result, &command, root, self.dry_run)
    }
}

/// Checks the execution result and returns an error if the command failed.
///
/// Handles three cases:
/// - Non-zero exit status: returns `Execution` error with the status
/// - No exit status in non-dry-run mode: returns `Execution` error (e.g., killed by signal)
/// - Success or dry-run with no status: returns `Ok(())`
pub(crate) fn check_execution_result(
    result: &ExecutionResult,
    command: &[String],
    root: &Utf8Path,
    dry_run: bool,
) -> Result<()> {
    match result.status {
        Some(status) if !status.success() => {
            Err(RsbootinstError::execution_in_root(command, root.as_str(), status.to_string())
                .into())
        }
        None if !dry_run => Err(RsbootinstError::execution_in_root(
            command,
            root.as_str(),
            "process exited without status (possibly killed by signal)",
        )
        .into()),
        _ => Ok(()),
    }
}
