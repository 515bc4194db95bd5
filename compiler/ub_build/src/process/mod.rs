//! External process execution.
//!
//! Tools are spawned with both output streams piped. Each stream is drained
//! on its own thread into one shared buffer, so a tool that fills one pipe
//! while the other is being read cannot deadlock. The child gets a
//! wall-clock budget; past it the child is killed and the run fails.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wait_timeout::ChildExt;
use ub_diagnostic::{Diagnostic, ErrorCode};

/// How long to wait for the output streams to close after the child exits.
const DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Exit status and the interleaved stdout/stderr of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` if the process was terminated by a signal.
    pub status: Option<i32>,
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Failure to run a process to completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("the tool '{}' could not be found", program.display())]
    NotFound { program: PathBuf },
    #[error("could not start '{}': {message}", program.display())]
    Spawn { program: PathBuf, message: String },
    #[error(
        "the tool '{}' did not finish within {} seconds and was terminated",
        program.display(),
        timeout.as_secs()
    )]
    Timeout {
        program: PathBuf,
        timeout: Duration,
        output: String,
    },
    #[error("could not wait for '{}': {message}", program.display())]
    Wait { program: PathBuf, message: String },
}

impl ProcessError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        let code = match self {
            Self::NotFound { .. } => ErrorCode::E5311,
            Self::Timeout { .. } => ErrorCode::E5310,
            Self::Spawn { .. } | Self::Wait { .. } => ErrorCode::E9001,
        };
        Diagnostic::error(code).with_message(self.to_string())
    }
}

/// Quote a command line for logs.
pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut line = quote(&program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line
}

fn quote(s: &str) -> String {
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        return s.to_string();
    }
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn drain<R: Read + Send + 'static>(
    stream: R,
    buffer: Arc<Mutex<String>>,
    done: mpsc::Sender<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let mut out = buffer.lock();
                    out.push_str(&text);
                    if !text.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
        }
        let _ = done.send(());
    })
}

/// Run `program` with `args`, capturing output, within `timeout`.
pub fn run(program: &Path, args: &[String], timeout: Duration) -> Result<ProcessOutput, ProcessError> {
    tracing::debug!(command = %command_line(program, args), "running tool");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: program.to_path_buf(),
                }
            } else {
                ProcessError::Spawn {
                    program: program.to_path_buf(),
                    message: e.to_string(),
                }
            }
        })?;

    let buffer = Arc::new(Mutex::new(String::new()));
    let (done_tx, done_rx) = mpsc::channel();
    let mut streams = 0;
    if let Some(stdout) = child.stdout.take() {
        drain(stdout, Arc::clone(&buffer), done_tx.clone());
        streams += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        drain(stderr, Arc::clone(&buffer), done_tx.clone());
        streams += 1;
    }
    drop(done_tx);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            wait_for_streams(&done_rx, streams);
            tracing::warn!(program = %program.display(), "tool timed out");
            return Err(ProcessError::Timeout {
                program: program.to_path_buf(),
                timeout,
                output: buffer.lock().clone(),
            });
        }
        Err(e) => {
            terminate(&mut child);
            return Err(ProcessError::Wait {
                program: program.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    wait_for_streams(&done_rx, streams);
    let output = buffer.lock().clone();
    Ok(ProcessOutput {
        status: status.code(),
        output,
    })
}

/// Kill a child we stopped waiting for and reap it.
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait, bounded, for the drain threads. A grandchild that inherited a
/// pipe can keep it open after the tool itself has exited.
fn wait_for_streams(done: &mpsc::Receiver<()>, streams: usize) {
    let deadline = Instant::now() + DRAIN_WAIT;
    for _ in 0..streams {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            tracing::debug!("output streams still open; continuing with captured output");
            return;
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
