//! Compilation task graph.
//!
//! Every per-architecture step of a half (AOT, native compile of the AOT
//! output, glue generation and compilation) is a [`BuildTask`] in a
//! [`TaskGraph`]. Ordering between a generator and the compile that reads
//! its output is an explicit edge; [`scheduler::execute`] runs the graph on
//! a bounded worker pool and the [`TaskExecutor`] runs one task.

mod plan;
mod scheduler;

pub use plan::{compile_invocation, plan_half, HalfPlan, SourceLanguage};
pub use scheduler::{effective_jobs, execute, ExecutionPlan};

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ub_diagnostic::{AggregateError, Diagnostic, ErrorCode};

use crate::cache::{write_if_changed, CacheError, CacheGate};
use crate::toolchain::{ToolInvocation, ToolRunner};

/// Sections appended to AOT assembly when only a bitcode marker is embedded.
pub const BITCODE_MARKER: &str =
    "\n.section __LLVM, __bitcode\n.byte 0\n.section __LLVM, __cmdline\n.byte 0\n";

/// Prefix of AOT compiler output lines reporting a restriction violation.
const AOT_RESTRICTION_PREFIX: &str = "AOT restriction: Method '";

/// Index of a task in its graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Aot,
    /// Retarget the textual IR emitted by the AOT compiler.
    Bitcodeify,
    /// Native compile of AOT output.
    Assemble,
    GenerateGlue,
    CompileGlue,
    GenerateRegistration,
    CompileRegistration,
    GenerateWrappers,
    CompileWrappers,
}

impl TaskKind {
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Aot => "aot",
            TaskKind::Bitcodeify => "bitcodeify",
            TaskKind::Assemble => "assemble",
            TaskKind::GenerateGlue => "generate-glue",
            TaskKind::CompileGlue => "compile-glue",
            TaskKind::GenerateRegistration => "generate-registration",
            TaskKind::CompileRegistration => "compile-registration",
            TaskKind::GenerateWrappers => "generate-wrappers",
            TaskKind::CompileWrappers => "compile-wrappers",
        }
    }

    /// Generators only write files; they never start a process.
    pub fn is_generator(self) -> bool {
        matches!(
            self,
            TaskKind::GenerateGlue | TaskKind::GenerateRegistration | TaskKind::GenerateWrappers
        )
    }

    /// Code reported when the task fails.
    pub fn failure_code(self) -> ErrorCode {
        match self {
            TaskKind::Aot | TaskKind::Bitcodeify => ErrorCode::E3001,
            TaskKind::Assemble => ErrorCode::E5106,
            TaskKind::GenerateGlue | TaskKind::GenerateRegistration | TaskKind::GenerateWrappers => {
                ErrorCode::E4001
            }
            TaskKind::CompileGlue => ErrorCode::E5103,
            TaskKind::CompileRegistration => ErrorCode::E4109,
            TaskKind::CompileWrappers => ErrorCode::E4002,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What running a task does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskAction {
    /// Run an external tool.
    Tool {
        invocation: ToolInvocation,
        /// Append [`BITCODE_MARKER`] to the output after a successful run.
        append_bitcode_marker: bool,
    },
    /// Write generated source text.
    Generate { contents: String },
    /// Rewrite the target triple of the first input into the output.
    Bitcodeify { triple: String },
}

/// One node of the task graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildTask {
    pub kind: TaskKind,
    /// Architecture name (`armv7`, `arm64`, ...).
    pub arch: String,
    /// Module the task compiles, if it belongs to one.
    pub module: Option<String>,
    /// Files whose content decides whether the task is up to date.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub action: TaskAction,
    /// Producers that must finish before this task starts.
    pub depends_on: Vec<TaskId>,
}

impl BuildTask {
    pub fn new(kind: TaskKind, arch: impl Into<String>, output: PathBuf, action: TaskAction) -> Self {
        BuildTask {
            kind,
            arch: arch.into(),
            module: None,
            inputs: Vec::new(),
            output,
            action,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: PathBuf) -> Self {
        if !self.inputs.contains(&input) {
            self.inputs.push(input);
        }
        self
    }

    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = PathBuf>) -> Self {
        for input in inputs {
            self = self.with_input(input);
        }
        self
    }

    #[must_use]
    pub fn after(mut self, producer: TaskId) -> Self {
        if !self.depends_on.contains(&producer) {
            self.depends_on.push(producer);
        }
        self
    }

    /// Stamp key; output paths are unique per task.
    fn stamp_key(&self) -> String {
        format!("task:{}", self.output.display())
    }

    fn describe(&self) -> String {
        match &self.module {
            Some(module) => format!("{} {} ({})", self.kind, module, self.arch),
            None => format!("{} ({})", self.kind, self.arch),
        }
    }
}

/// Tasks of one half in insertion order.
///
/// A task may only depend on tasks added before it, so the graph is
/// acyclic by construction.
#[derive(Clone, Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<BuildTask>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task and return its id.
    ///
    /// Dependencies on ids not yet in the graph are dropped.
    pub fn add(&mut self, mut task: BuildTask) -> TaskId {
        let id = TaskId(self.tasks.len());
        task.depends_on.retain(|dep| dep.0 < id.0);
        self.tasks.push(task);
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&BuildTask> {
        self.tasks.get(id.0)
    }

    pub fn tasks(&self) -> &[BuildTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Counters from one execution of a graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Tasks that did work.
    pub run: usize,
    /// Tasks whose previous output was still valid.
    pub fresh: usize,
    pub failed: usize,
    /// Tasks never started because a producer failed.
    pub skipped: usize,
}

impl TaskStats {
    pub fn total(&self) -> usize {
        self.run + self.fresh + self.failed + self.skipped
    }

    pub fn merge(&mut self, other: &TaskStats) {
        self.run += other.run;
        self.fresh += other.fresh;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// A failed task with the diagnostics it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskError {
    pub arch: String,
    pub module: Option<String>,
    pub kind: TaskKind,
    pub diagnostics: Vec<Diagnostic>,
}

impl TaskError {
    /// Diagnostics annotated with the architecture and module.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        let TaskError {
            arch,
            module,
            kind,
            diagnostics,
        } = self;
        diagnostics
            .into_iter()
            .map(|d| {
                let d = d.with_note(format!("architecture: {arch}"));
                let d = match &module {
                    Some(module) => d.with_note(format!("module: {module}")),
                    None => d,
                };
                d.with_note(format!("task: {kind}"))
            })
            .collect()
    }
}

/// Outcome of executing a whole graph.
#[derive(Clone, Debug, Default)]
pub struct ExecutionReport {
    pub stats: TaskStats,
    pub errors: Vec<TaskError>,
}

impl ExecutionReport {
    /// Raise every task error together.
    pub fn into_result(self) -> Result<TaskStats, AggregateError> {
        if self.errors.is_empty() {
            return Ok(self.stats);
        }
        let diagnostics = self
            .errors
            .into_iter()
            .flat_map(TaskError::into_diagnostics)
            .collect();
        Err(AggregateError { diagnostics })
    }
}

/// Whether a task did work or reused its previous output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Ran,
    Fresh,
}

/// Runs single tasks against a toolchain and the cache.
#[derive(Clone, Copy)]
pub struct TaskExecutor<'a> {
    runner: &'a dyn ToolRunner,
    cache: &'a CacheGate,
    timeout: Duration,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(runner: &'a dyn ToolRunner, cache: &'a CacheGate, timeout: Duration) -> Self {
        TaskExecutor {
            runner,
            cache,
            timeout,
        }
    }

    pub fn run(&self, task: &BuildTask) -> Result<TaskOutcome, Vec<Diagnostic>> {
        if let Some(parent) = task.output.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| vec![CacheError::write(parent, &e).to_diagnostic()])?;
        }
        match &task.action {
            TaskAction::Generate { contents } => self.generate(task, contents),
            TaskAction::Tool {
                invocation,
                append_bitcode_marker,
            } => self.run_tool(task, invocation, *append_bitcode_marker),
            TaskAction::Bitcodeify { triple } => self.bitcodeify(task, triple),
        }
    }

    fn generate(&self, task: &BuildTask, contents: &str) -> Result<TaskOutcome, Vec<Diagnostic>> {
        match write_if_changed(&task.output, contents.as_bytes()) {
            Ok(true) => Ok(TaskOutcome::Ran),
            Ok(false) => {
                tracing::trace!(target = %task.output.display(), "target is up-to-date");
                Ok(TaskOutcome::Fresh)
            }
            Err(e) => Err(vec![Diagnostic::error(ErrorCode::E4001).with_message(format!(
                "Could not write the generated file '{}': {e}",
                task.output.display()
            ))]),
        }
    }

    fn run_tool(
        &self,
        task: &BuildTask,
        invocation: &ToolInvocation,
        append_bitcode_marker: bool,
    ) -> Result<TaskOutcome, Vec<Diagnostic>> {
        let key = task.stamp_key();
        let mut fingerprint = invocation.fingerprint_text();
        if append_bitcode_marker {
            fingerprint.push_str("\0+bitcode-marker");
        }
        let outputs = [task.output.clone()];
        if self.cache.is_fresh(&key, &task.inputs, &outputs, &fingerprint) {
            tracing::debug!(target = %task.output.display(), "target is up-to-date");
            return Ok(TaskOutcome::Fresh);
        }

        tracing::debug!(task = %task.describe(), "running {invocation}");
        let result = self
            .runner
            .run(invocation, self.timeout)
            .map_err(|e| vec![e.to_diagnostic()])?;
        if !result.success() {
            self.cache.invalidate(&key);
            return Err(failure_diagnostics(task, &result.output));
        }
        if !task.output.exists() {
            return Err(vec![Diagnostic::error(task.kind.failure_code()).with_message(
                format!(
                    "{} did not produce '{}'",
                    invocation.tool,
                    task.output.display()
                ),
            )]);
        }
        if append_bitcode_marker {
            append_marker(&task.output).map_err(|e| vec![e.to_diagnostic()])?;
        }
        self.cache
            .record(&key, &task.inputs, &outputs, &fingerprint)
            .map_err(|e| vec![e.to_diagnostic()])?;
        Ok(TaskOutcome::Ran)
    }

    fn bitcodeify(&self, task: &BuildTask, triple: &str) -> Result<TaskOutcome, Vec<Diagnostic>> {
        let Some(source) = task.inputs.first() else {
            return Err(vec![Diagnostic::error(ErrorCode::E9001)
                .with_message(format!("{} has no input", task.describe()))]);
        };
        let key = task.stamp_key();
        let fingerprint = format!("bitcodeify\0{triple}");
        let outputs = [task.output.clone()];
        if self.cache.is_fresh(&key, &task.inputs, &outputs, &fingerprint) {
            tracing::debug!(target = %task.output.display(), "target is up-to-date");
            return Ok(TaskOutcome::Fresh);
        }
        let text = fs::read_to_string(source)
            .map_err(|e| vec![CacheError::read(source, &e).to_diagnostic()])?;
        let rewritten = retarget_ir(&text, triple);
        write_if_changed(&task.output, rewritten.as_bytes())
            .map_err(|e| vec![CacheError::write(&task.output, &e).to_diagnostic()])?;
        self.cache
            .record(&key, &task.inputs, &outputs, &fingerprint)
            .map_err(|e| vec![e.to_diagnostic()])?;
        Ok(TaskOutcome::Ran)
    }
}

/// Replace the `target triple` line of textual IR.
pub fn retarget_ir(text: &str, triple: &str) -> String {
    let mut out = String::with_capacity(text.len() + triple.len());
    let mut found = false;
    for line in text.lines() {
        if !found && line.trim_start().starts_with("target triple") {
            out.push_str(&format!("target triple = \"{triple}\""));
            found = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !found {
        out.insert_str(0, &format!("target triple = \"{triple}\"\n"));
    }
    out
}

fn append_marker(path: &Path) -> Result<(), CacheError> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| CacheError::write(path, &e))?;
    file.write_all(BITCODE_MARKER.as_bytes())
        .map_err(|e| CacheError::write(path, &e))
}

/// Diagnostics for a tool that exited with a failure status.
///
/// AOT output is scanned for restriction violations first; each one is a
/// separate E3002 and replaces the generic E3001.
pub fn failure_diagnostics(task: &BuildTask, output: &str) -> Vec<Diagnostic> {
    if task.kind == TaskKind::Aot {
        let restrictions: Vec<Diagnostic> = output
            .lines()
            .filter(|line| is_aot_restriction(line))
            .map(|line| Diagnostic::error(ErrorCode::E3002).with_message(line.trim_end()))
            .collect();
        if !restrictions.is_empty() {
            return restrictions;
        }
    }
    let subject = match &task.module {
        Some(module) => format!("'{module}'"),
        None => format!("'{}'", task.output.display()),
    };
    let message = match task.kind {
        TaskKind::Aot | TaskKind::Bitcodeify => format!("Could not AOT the module {subject}"),
        TaskKind::CompileRegistration => "Failed to compile the generated registration code".to_string(),
        TaskKind::CompileWrappers => {
            "Failed to compile the generated code for foreign-function wrappers".to_string()
        }
        _ => format!("Failed to compile {subject}"),
    };
    let mut diagnostic = Diagnostic::error(task.kind.failure_code()).with_message(message);
    let trimmed = output.trim();
    if !trimmed.is_empty() {
        diagnostic = diagnostic.with_note(trimmed.to_string());
    }
    vec![diagnostic]
}

fn is_aot_restriction(line: &str) -> bool {
    line.starts_with(AOT_RESTRICTION_PREFIX) && line.contains("must be static")
}
