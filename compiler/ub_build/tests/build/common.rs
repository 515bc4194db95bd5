//! Fixture tree and fake toolchain shared by the build tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use ub_build::image::{AttrArg, Attribute, ModuleImage};
use ub_build::module::LINK_WITH_ATTRIBUTE;
use ub_build::process::{ProcessError, ProcessOutput};
use ub_build::{BuildConfiguration, BuildConfigurationBuilder, BuildTarget, Platform, Tool, ToolInvocation, ToolRunner};

/// A scratch tree with sources, runtime libraries, cache and output.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fixture = Fixture { dir };
        fs::create_dir_all(fixture.src()).unwrap();
        let runtime = fixture.path("runtime");
        fs::create_dir_all(&runtime).unwrap();
        fs::write(runtime.join("libruntime.a"), b"!<arch>\nruntime").unwrap();
        fs::write(runtime.join("libapp.a"), b"!<arch>\napp").unwrap();
        fixture
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn src(&self) -> PathBuf {
        self.path("src")
    }

    pub fn write_module(&self, image: &ModuleImage) -> PathBuf {
        let path = self.src().join(format!("{}.mod", image.name()));
        image.write_to(&path).unwrap();
        path
    }

    /// `App` referencing `Lib`, which needs framework `Foo` and weak
    /// framework `Bar`.
    pub fn standard_app(&self) -> PathBuf {
        self.write_module(&lib());
        self.write_module(&app())
    }

    pub fn builder(&self, root: &Path, abis: &str) -> BuildConfigurationBuilder {
        BuildConfiguration::builder(Platform::Ios, BuildTarget::Device, root)
            .with_abis(abis)
            .with_sdk_root("/Applications/Xcode.app/Contents/Developer/Platforms/iPhoneOS.platform/Developer/SDKs/iPhoneOS.sdk")
            .with_runtime(self.path("runtime"), vec!["libruntime.a".to_string()])
            .with_cache_dir(self.path("cache"))
            .with_output_dir(self.path("out"))
    }
}

pub fn app() -> ModuleImage {
    ModuleImage::new("App")
        .with_reference("Lib")
        .with_entry_point("app_startup", "App.Program::Main")
        .with_code(b"app code v1".to_vec())
}

pub fn lib() -> ModuleImage {
    ModuleImage::new("Lib")
        .with_attribute(
            Attribute::new(LINK_WITH_ATTRIBUTE)
                .with_property("Frameworks", AttrArg::Str("Foo".to_string()))
                .with_property("WeakFrameworks", AttrArg::Str("Bar".to_string())),
        )
        .with_code(b"lib code v1".to_vec())
}

type Failure = (Tool, String, ProcessOutput);

/// Records invocations and writes an output for each.
///
/// Outputs depend on the command line and on the content of every file
/// argument, so a changed input changes everything downstream of it.
#[derive(Default)]
pub struct FakeToolchain {
    calls: Mutex<Vec<ToolInvocation>>,
    failures: Mutex<Vec<Failure>>,
    delay: Option<Duration>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every invocation for `delay`, to make overlap observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail invocations of `tool` that have an argument containing `needle`.
    pub fn fail_when(&self, tool: Tool, needle: &str, output: &str) {
        self.failures.lock().push((
            tool,
            needle.to_string(),
            ProcessOutput {
                status: Some(1),
                output: output.to_string(),
            },
        ));
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, tool: Tool) -> Vec<ToolInvocation> {
        self.calls().into_iter().filter(|c| c.tool == tool).collect()
    }

    pub fn count(&self, tool: Tool) -> usize {
        self.calls_of(tool).len()
    }

    /// Native link invocations (compiler calls that write an executable).
    pub fn links(&self) -> Vec<ToolInvocation> {
        self.calls_of(Tool::Compiler)
            .into_iter()
            .filter(|c| !c.args.iter().any(|a| a == "-c"))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn produce(invocation: &ToolInvocation) {
        let Some(output) = invocation.output_path() else {
            return;
        };
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        match invocation.tool {
            Tool::Dsymutil => {
                let dwarf = output.join("Contents/Resources/DWARF");
                fs::create_dir_all(&dwarf).unwrap();
                fs::write(dwarf.join("App"), invocation.fingerprint_text()).unwrap();
            }
            Tool::Strip => {
                let linked = invocation.args.last().unwrap();
                fs::copy(linked, &output).unwrap();
            }
            Tool::Lipo => {
                let mut merged = Vec::new();
                for input in invocation.args.iter().take_while(|a| *a != "-create") {
                    merged.extend(fs::read(input).unwrap());
                }
                fs::write(&output, merged).unwrap();
            }
            Tool::Aot | Tool::Compiler => {
                let mut content = invocation.fingerprint_text().into_bytes();
                for arg in &invocation.args {
                    let path = Path::new(arg);
                    if path.is_file() && path != output {
                        content.extend(fs::read(path).unwrap());
                    }
                }
                fs::write(&output, content).unwrap();
                if invocation.tool == Tool::Aot {
                    write_aot_debug_data(invocation);
                }
            }
        }
    }
}

/// The AOT compiler drops debug data into its `msym-dir`.
fn write_aot_debug_data(invocation: &ToolInvocation) {
    let Some(options) = invocation.args.iter().find_map(|a| a.strip_prefix("--aot=")) else {
        return;
    };
    let Some(dir) = options.split(',').find_map(|o| o.strip_prefix("msym-dir=")) else {
        return;
    };
    let module = invocation.args.last().map(PathBuf::from).unwrap();
    let name = module.file_stem().unwrap().to_string_lossy().into_owned();
    let target = Path::new(dir).join(&name);
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join(format!("{name}.msym")), b"debug data").unwrap();
}

impl ToolRunner for FakeToolchain {
    fn run(&self, invocation: &ToolInvocation, _timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().push(invocation.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let failure = self
            .failures
            .lock()
            .iter()
            .find(|(tool, needle, _)| {
                *tool == invocation.tool && invocation.args.iter().any(|a| a.contains(needle.as_str()))
            })
            .map(|(_, _, output)| output.clone());
        let result = match failure {
            Some(output) => output,
            None => {
                Self::produce(invocation);
                ProcessOutput {
                    status: Some(0),
                    output: String::new(),
                }
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// How often `window` occurs as consecutive arguments.
pub fn count_args(args: &[String], window: &[&str]) -> usize {
    args.windows(window.len())
        .filter(|w| w.iter().zip(window).all(|(a, b)| a == b))
        .count()
}
