//! Shared helpers for unit tests.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;

use crate::process::{ProcessError, ProcessOutput};
use crate::toolchain::{Tool, ToolInvocation, ToolRunner};

type Responder = Box<dyn Fn(&ToolInvocation) -> Option<ProcessOutput> + Send + Sync>;

/// Records invocations and writes each one's output file.
///
/// Lipo concatenates its inputs; every other tool writes its own command
/// line, so outputs change exactly when the command changes.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<ToolInvocation>>,
    responder: Option<Responder>,
}

impl RecordingRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer some invocations with a canned result instead of succeeding.
    pub(crate) fn responding(
        responder: impl Fn(&ToolInvocation) -> Option<ProcessOutput> + Send + Sync + 'static,
    ) -> Self {
        RecordingRunner {
            calls: Mutex::new(Vec::new()),
            responder: Some(Box::new(responder)),
        }
    }

    pub(crate) fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, tool: Tool) -> usize {
        self.calls.lock().iter().filter(|c| c.tool == tool).count()
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&self, invocation: &ToolInvocation, _timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().push(invocation.clone());
        if let Some(responder) = &self.responder {
            if let Some(canned) = responder(invocation) {
                return Ok(canned);
            }
        }
        if let Some(out) = invocation.output_path() {
            let content = if invocation.tool == Tool::Lipo {
                let mut merged = Vec::new();
                for arg in invocation.args.iter().take_while(|a| *a != "-create") {
                    merged.extend(fs::read(PathBuf::from(arg)).unwrap_or_default());
                }
                merged
            } else {
                invocation.fingerprint_text().into_bytes()
            };
            if let Some(parent) = out.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::write(&out, content);
        }
        Ok(ProcessOutput {
            status: Some(0),
            output: String::new(),
        })
    }
}
