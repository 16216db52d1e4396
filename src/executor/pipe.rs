//! Streaming of child process output into the installation log.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};

/// Number of trailing stderr lines kept for failure reports.
pub(super) const STDERR_TAIL_LINES: usize = 20;

/// Which of the child's output streams is being read.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Extracts a human-readable message from a thread panic.
pub(super) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Logs every line read from `pipe`, tagged with the `program` that wrote it.
///
/// Boot tools print progress on stdout (logged at DEBUG) and their
/// diagnostics on stderr (logged at INFO). The last [`STDERR_TAIL_LINES`]
/// stderr lines are returned so a failed command can be reported with the
/// reason the tool gave. Read errors end the stream early; the exit status
/// alone decides whether the command failed.
pub(super) fn read_pipe_to_log<R: Read>(
    pipe: Option<R>,
    stream: StreamType,
    program: &str,
) -> Vec<String> {
    let Some(pipe) = pipe else {
        tracing::error!(%stream, program, "pipe was not captured, no output will be logged");
        return Vec::new();
    };

    let mut tail = VecDeque::new();
    let mut reader = BufReader::new(pipe);
    let mut line_buf = Vec::new();
    loop {
        line_buf.clear();
        match reader.read_until(b'\n', &mut line_buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&line_buf);
                match stream {
                    StreamType::Stdout => tracing::debug!(program, "{}", line),
                    StreamType::Stderr => {
                        tracing::info!(program, "{}", line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
            Err(e) => {
                tracing::error!(%stream, program, error = %e, "failed to read output");
                break;
            }
        }
    }
    tail.into()
}

/// Converts a raw line to text, dropping the line terminator (LF or CRLF).
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    String::from_utf8_lossy(raw).trim_end_matches('\r').to_string()
}
