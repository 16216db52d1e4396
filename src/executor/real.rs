//! Executor that runs commands on the host.

use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use which::which;

use super::pipe::{StreamType, panic_message, read_pipe_to_log};
use super::{CommandExecutor, CommandSpec, ExecutionResult, format_command_args};
use crate::error::RsbootinstError;

type ReaderHandle = JoinHandle<Vec<String>>;

/// Kills `child`, reaps it and joins the output readers started so far.
fn abort_child<I>(child: &mut Child, readers: I)
where
    I: IntoIterator<Item = ReaderHandle>,
{
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!(pid, "kill failed, process may have exited already: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid, "failed to reap child process: {}", e);
    }
    for reader in readers {
        if let Err(e) = reader.join() {
            tracing::warn!("output reader panicked during cleanup: {}", panic_message(&*e));
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>, stream: StreamType, program: &str) -> std::io::Result<ReaderHandle>
where
    R: std::io::Read + Send + 'static,
{
    let program = program.to_string();
    thread::Builder::new()
        .name(format!("{}-reader", stream))
        .spawn(move || read_pipe_to_log(pipe, stream, &program))
}

/// Command executor that runs actual system commands.
///
/// Output is streamed into the log while the command runs. When `dry_run`
/// is set, commands are only logged and `execute()` returns a result
/// without an exit status.
pub struct RealCommandExecutor {
    pub dry_run: bool,
}

impl RealCommandExecutor {
    fn failure(spec: &CommandSpec, status: String) -> anyhow::Error {
        RsbootinstError::Execution {
            command: format_command_args(&spec.argv()),
            status,
        }
        .into()
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        if self.dry_run {
            tracing::info!("dry run: {}", format_command_args(&spec.argv()));
            return Ok(ExecutionResult { status: None });
        }

        let path = which(&spec.command).map_err(|e| {
            tracing::debug!(command = %spec.command, "executable lookup failed: {}", e);
            RsbootinstError::CommandNotFound {
                command: spec.command.clone(),
            }
        })?;
        tracing::trace!("resolved {} to {}", spec.command, path.display());

        let mut child = Command::new(&path)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", format_command_args(&spec.argv())))?;
        tracing::trace!(pid = child.id(), "spawned {}", spec.command);

        let stdout = match spawn_reader(child.stdout.take(), StreamType::Stdout, &spec.command) {
            Ok(handle) => handle,
            Err(e) => {
                abort_child(&mut child, []);
                return Err(Self::failure(spec, format!("failed to start the stdout reader: {}", e)));
            }
        };
        let stderr = match spawn_reader(child.stderr.take(), StreamType::Stderr, &spec.command) {
            Ok(handle) => handle,
            Err(e) => {
                abort_child(&mut child, [stdout]);
                return Err(Self::failure(spec, format!("failed to start the stderr reader: {}", e)));
            }
        };

        let status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                abort_child(&mut child, [stdout, stderr]);
                return Err(Self::failure(spec, format!("failed to wait for the command: {}", e)));
            }
        };

        let mut panicked = Vec::new();
        let mut stderr_tail = Vec::new();
        for (stream, handle) in [(StreamType::Stdout, stdout), (StreamType::Stderr, stderr)] {
            match handle.join() {
                Ok(tail) if stream == StreamType::Stderr => stderr_tail = tail,
                Ok(_) => {}
                Err(e) => {
                    let msg = panic_message(&*e);
                    tracing::error!(%stream, panic = msg, "output reader panicked");
                    panicked.push(format!("{}: {}", stream, msg));
                }
            }
        }
        if !panicked.is_empty() {
            return Err(Self::failure(
                spec,
                format!("output reader(s) panicked: {}", panicked.join(", ")),
            ));
        }

        if !status.success() && !stderr_tail.is_empty() {
            tracing::error!(
                program = %spec.command,
                "{} failed, last output:\n{}",
                spec.command,
                stderr_tail.join("\n")
            );
        }
        tracing::debug!(program = %spec.command, "finished with {}", status);

        Ok(ExecutionResult {
            status: Some(status),
        })
    }
}
