//! External tools the pipeline drives.
//!
//! Every process the build starts goes through [`ToolRunner`], so tests can
//! replace the real toolchain with a recorder and the pipeline never calls
//! `std::process` directly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::{self, ProcessError, ProcessOutput};

/// A tool the pipeline invokes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Ahead-of-time compiler for managed modules.
    Aot,
    /// Native compiler driver; also used as the linker.
    Compiler,
    /// Universal-binary merge utility.
    Lipo,
    /// Native symbol stripper.
    Strip,
    /// Debug-symbol bundle generator.
    Dsymutil,
}

impl Tool {
    pub const ALL: &'static [Tool] = &[
        Tool::Aot,
        Tool::Compiler,
        Tool::Lipo,
        Tool::Strip,
        Tool::Dsymutil,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Aot => "aot",
            Tool::Compiler => "clang",
            Tool::Lipo => "lipo",
            Tool::Strip => "strip",
            Tool::Dsymutil => "dsymutil",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One command line for one tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(tool: Tool) -> Self {
        ToolInvocation {
            tool,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_path(self, path: &Path) -> Self {
        self.with_arg(path.to_string_lossy().into_owned())
    }

    /// The file this invocation writes: the argument after `-o`/`-output`,
    /// or the `outfile=` option of an AOT argument.
    pub fn output_path(&self) -> Option<PathBuf> {
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if arg == "-o" || arg == "-output" {
                return args.next().map(PathBuf::from);
            }
            if let Some(options) = arg.strip_prefix("--aot=") {
                if let Some(out) = options
                    .split(',')
                    .find_map(|option| option.strip_prefix("outfile="))
                {
                    return Some(PathBuf::from(out));
                }
            }
        }
        None
    }

    /// Stable text of the command line, used in cache fingerprints.
    pub fn fingerprint_text(&self) -> String {
        let mut text = self.tool.name().to_string();
        for arg in &self.args {
            text.push('\0');
            text.push_str(arg);
        }
        text
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&process::command_line(Path::new(self.tool.name()), &self.args))
    }
}

/// Runs tool invocations.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation, timeout: Duration) -> Result<ProcessOutput, ProcessError>;
}

/// Runs the real tools as child processes.
#[derive(Clone, Debug)]
pub struct SystemToolchain {
    aot: PathBuf,
    compiler: PathBuf,
    lipo: PathBuf,
    strip: PathBuf,
    dsymutil: PathBuf,
}

impl Default for SystemToolchain {
    fn default() -> Self {
        SystemToolchain {
            aot: PathBuf::from("ubuild-aot"),
            compiler: PathBuf::from("clang"),
            lipo: PathBuf::from("lipo"),
            strip: PathBuf::from("strip"),
            dsymutil: PathBuf::from("dsymutil"),
        }
    }
}

impl SystemToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look the native tools up in `<dir>/usr/bin`.
    pub fn from_developer_dir(dir: &Path) -> Self {
        let bin = dir.join("usr").join("bin");
        SystemToolchain {
            compiler: bin.join("clang"),
            lipo: bin.join("lipo"),
            strip: bin.join("strip"),
            dsymutil: bin.join("dsymutil"),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_program(mut self, tool: Tool, program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        match tool {
            Tool::Aot => self.aot = program,
            Tool::Compiler => self.compiler = program,
            Tool::Lipo => self.lipo = program,
            Tool::Strip => self.strip = program,
            Tool::Dsymutil => self.dsymutil = program,
        }
        self
    }

    pub fn program(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Aot => &self.aot,
            Tool::Compiler => &self.compiler,
            Tool::Lipo => &self.lipo,
            Tool::Strip => &self.strip,
            Tool::Dsymutil => &self.dsymutil,
        }
    }
}

impl ToolRunner for SystemToolchain {
    fn run(&self, invocation: &ToolInvocation, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        process::run(self.program(invocation.tool), &invocation.args, timeout)
    }
}
