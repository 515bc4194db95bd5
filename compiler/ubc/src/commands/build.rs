//! The `build` command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ub_build::{
    Application, BitcodeMode, BuildConfiguration, BuildConfigurationBuilder, BuildTarget,
    DedupStrategy, Platform, SystemToolchain, Tool, Version,
};
use ub_diagnostic::{AggregateError, DiagnosticBag, ErrorCode};

use super::print_diagnostics;

/// Environment variable overriding the default job count.
pub const JOBS_ENV: &str = "UBUILD_JOBS";

/// Options of `ubuild build`, as given on the command line.
///
/// Values are kept as text until [`BuildOptions::to_builder`] so that every
/// invalid one is reported, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct BuildOptions {
    /// ios, tvos or watchos (--platform)
    pub platform: Option<String>,
    /// device or simulator (--target)
    pub target: Option<String>,
    /// Comma-separated architectures (--abi)
    pub abi: Option<String>,
    /// none, asmonly, llvmonly, markeronly (--bitcode)
    pub bitcode: Option<String>,
    /// Minimum OS version (--deployment)
    pub deployment: Option<String>,
    /// SDK version (--sdk)
    pub sdk: Option<String>,
    /// SDK directory passed to the compiler (--sdk-root)
    pub sdk_root: Option<PathBuf>,
    /// Developer directory holding the native tools (--developer-dir)
    pub developer_dir: Option<PathBuf>,
    /// AOT compiler executable (--aot-compiler)
    pub aot_compiler: Option<PathBuf>,
    /// Runtime library directory (--runtime-dir)
    pub runtime_dir: Option<PathBuf>,
    /// Extra module search directories (--search, repeatable)
    pub search: Vec<PathBuf>,
    /// Directory of the platform modules (--platform-dir)
    pub platform_dir: Option<PathBuf>,
    /// Cache directory (--cache)
    pub cache: Option<PathBuf>,
    /// Output directory (-o, --output)
    pub output: Option<PathBuf>,
    /// Executable name (--name)
    pub name: Option<String>,
    /// Parallel tool invocations (--jobs)
    pub jobs: Option<usize>,
    /// Per-tool timeout in seconds (--timeout)
    pub timeout: Option<u64>,
    /// symlink, hardlink or copy (--dedup)
    pub dedup: Option<DedupStrategy>,
    /// Additional native linker flags (--gcc-flags)
    pub gcc_flags: Option<String>,
    pub debug: bool,
    pub profiling: bool,
    /// Keep native symbols (--no-strip)
    pub no_strip: bool,
    /// Wrap native calls to marshal exceptions (--marshal-native-exceptions)
    pub marshal_native_exceptions: bool,
    /// Discard the cache (--force)
    pub force: bool,
    /// Debug logging (-v, --verbose)
    pub verbose: bool,
}

impl BuildOptions {
    /// Merge another `BuildOptions` into this one.
    ///
    /// Option fields take the new value if present, lists are appended and
    /// boolean flags are OR-ed.
    pub fn merge(&mut self, other: &Self) {
        fn take<T: Clone>(mine: &mut Option<T>, theirs: &Option<T>) {
            if theirs.is_some() {
                mine.clone_from(theirs);
            }
        }

        take(&mut self.platform, &other.platform);
        take(&mut self.target, &other.target);
        take(&mut self.abi, &other.abi);
        take(&mut self.bitcode, &other.bitcode);
        take(&mut self.deployment, &other.deployment);
        take(&mut self.sdk, &other.sdk);
        take(&mut self.sdk_root, &other.sdk_root);
        take(&mut self.developer_dir, &other.developer_dir);
        take(&mut self.aot_compiler, &other.aot_compiler);
        take(&mut self.runtime_dir, &other.runtime_dir);
        take(&mut self.platform_dir, &other.platform_dir);
        take(&mut self.cache, &other.cache);
        take(&mut self.output, &other.output);
        take(&mut self.name, &other.name);
        take(&mut self.jobs, &other.jobs);
        take(&mut self.timeout, &other.timeout);
        take(&mut self.dedup, &other.dedup);
        take(&mut self.gcc_flags, &other.gcc_flags);
        self.search.extend(other.search.iter().cloned());

        self.debug |= other.debug;
        self.profiling |= other.profiling;
        self.no_strip |= other.no_strip;
        self.marshal_native_exceptions |= other.marshal_native_exceptions;
        self.force |= other.force;
        self.verbose |= other.verbose;
    }

    /// A configuration builder for `root` with every option applied.
    ///
    /// `env_jobs` is the value of [`JOBS_ENV`], used when `--jobs` is absent.
    pub fn to_builder(
        &self,
        root: &Path,
        env_jobs: Option<&str>,
    ) -> Result<BuildConfigurationBuilder, AggregateError> {
        let mut bag = DiagnosticBag::new();

        let platform = self
            .platform
            .as_deref()
            .map_or(Ok(Platform::Ios), str::parse::<Platform>)
            .unwrap_or_else(|d| {
                bag.push(d);
                Platform::Ios
            });
        let target = self
            .target
            .as_deref()
            .map_or(Ok(BuildTarget::Device), str::parse::<BuildTarget>)
            .unwrap_or_else(|d| {
                bag.push(d);
                BuildTarget::Device
            });
        let bitcode = self
            .bitcode
            .as_deref()
            .map_or(Ok(BitcodeMode::None), str::parse::<BitcodeMode>)
            .unwrap_or_else(|d| {
                bag.push(d);
                BitcodeMode::None
            });

        let mut builder = BuildConfiguration::builder(platform, target, root)
            .with_bitcode(bitcode)
            .with_debug(self.debug)
            .with_profiling(self.profiling)
            .with_force(self.force)
            .with_native_exception_wrappers(self.marshal_native_exceptions);

        if let Some(abi) = &self.abi {
            builder = builder.with_abis(abi.as_str());
        }
        if let Some(deployment) = &self.deployment {
            builder = builder.with_deployment_target(deployment.as_str());
        }
        if let Some(sdk) = &self.sdk {
            match sdk.parse::<Version>() {
                Ok(version) => builder = builder.with_sdk_version(version),
                Err(message) => bag.error(ErrorCode::E0073, format!("Invalid SDK version: {message}")),
            }
        }
        if let Some(dir) = &self.sdk_root {
            builder = builder.with_sdk_root(dir);
        }
        if let Some(dir) = &self.runtime_dir {
            builder = builder.with_runtime(dir, vec!["libruntime.a".to_string()]);
        }
        for dir in &self.search {
            builder = builder.with_search_dir(dir);
        }
        if let Some(dir) = &self.platform_dir {
            builder = builder.with_platform_dir(dir);
        }
        if let Some(dir) = &self.cache {
            builder = builder.with_cache_dir(dir);
        }
        if let Some(dir) = &self.output {
            builder = builder.with_output_dir(dir);
        }
        if let Some(name) = &self.name {
            builder = builder.with_executable_name(name.as_str());
        }
        if let Some(jobs) = self.jobs.or_else(|| env_jobs.and_then(|j| j.trim().parse().ok())) {
            builder = builder.with_jobs(jobs);
        }
        if let Some(secs) = self.timeout {
            builder = builder.with_tool_timeout(Duration::from_secs(secs));
        }
        if let Some(strategy) = self.dedup {
            builder = builder.with_dedup(strategy);
        }
        if let Some(flags) = &self.gcc_flags {
            builder = builder.with_user_linker_flags(flags.as_str());
        }
        if self.no_strip {
            builder = builder.with_native_strip(false);
        }

        bag.into_result()?;
        Ok(builder)
    }

    /// The toolchain these options select.
    pub fn toolchain(&self) -> SystemToolchain {
        let toolchain = match &self.developer_dir {
            Some(dir) => SystemToolchain::from_developer_dir(dir),
            None => SystemToolchain::new(),
        };
        match &self.aot_compiler {
            Some(aot) => toolchain.with_program(Tool::Aot, aot),
            None => toolchain,
        }
    }
}

/// Parse `build` options.
///
/// Unknown options and malformed numbers are reported as warnings and
/// ignored. `-o <dir>` needs lookahead and is handled by the caller.
pub fn parse_build_options(args: &[String]) -> BuildOptions {
    let mut options = BuildOptions::default();

    for arg in args {
        if let Some(platform) = arg.strip_prefix("--platform=") {
            options.platform = Some(platform.to_string());
        } else if let Some(target) = arg.strip_prefix("--target=") {
            options.target = Some(target.to_string());
        } else if let Some(abi) = arg.strip_prefix("--abi=") {
            options.abi = Some(abi.to_string());
        } else if let Some(bitcode) = arg.strip_prefix("--bitcode=") {
            options.bitcode = Some(bitcode.to_string());
        } else if let Some(version) = arg.strip_prefix("--deployment=") {
            options.deployment = Some(version.to_string());
        } else if let Some(version) = arg.strip_prefix("--sdk=") {
            options.sdk = Some(version.to_string());
        } else if let Some(dir) = arg.strip_prefix("--sdk-root=") {
            options.sdk_root = Some(PathBuf::from(dir));
        } else if let Some(dir) = arg.strip_prefix("--developer-dir=") {
            options.developer_dir = Some(PathBuf::from(dir));
        } else if let Some(path) = arg.strip_prefix("--aot-compiler=") {
            options.aot_compiler = Some(PathBuf::from(path));
        } else if let Some(dir) = arg.strip_prefix("--runtime-dir=") {
            options.runtime_dir = Some(PathBuf::from(dir));
        } else if let Some(dir) = arg.strip_prefix("--search=") {
            options.search.push(PathBuf::from(dir));
        } else if let Some(dir) = arg.strip_prefix("--platform-dir=") {
            options.platform_dir = Some(PathBuf::from(dir));
        } else if let Some(dir) = arg.strip_prefix("--cache=") {
            options.cache = Some(PathBuf::from(dir));
        } else if let Some(dir) = arg
            .strip_prefix("-o=")
            .or_else(|| arg.strip_prefix("--output="))
        {
            options.output = Some(PathBuf::from(dir));
        } else if let Some(name) = arg.strip_prefix("--name=") {
            options.name = Some(name.to_string());
        } else if let Some(jobs) = arg.strip_prefix("--jobs=") {
            if jobs == "auto" {
                options.jobs = Some(0);
            } else if let Ok(n) = jobs.parse() {
                options.jobs = Some(n);
            } else {
                eprintln!("warning: invalid jobs count '{jobs}', using auto");
            }
        } else if let Some(secs) = arg.strip_prefix("--timeout=") {
            if let Ok(n) = secs.parse() {
                options.timeout = Some(n);
            } else {
                eprintln!("warning: invalid timeout '{secs}', using the default");
            }
        } else if let Some(strategy) = arg.strip_prefix("--dedup=") {
            match strategy.parse() {
                Ok(s) => options.dedup = Some(s),
                Err(message) => eprintln!("warning: {message}, options: symlink, hardlink, copy"),
            }
        } else if let Some(flags) = arg.strip_prefix("--gcc-flags=") {
            options.gcc_flags = Some(flags.to_string());
        } else if arg == "--debug" {
            options.debug = true;
        } else if arg == "--profiling" {
            options.profiling = true;
        } else if arg == "--no-strip" {
            options.no_strip = true;
        } else if arg == "--marshal-native-exceptions" {
            options.marshal_native_exceptions = true;
        } else if arg == "--force" {
            options.force = true;
        } else if arg == "-v" || arg == "--verbose" {
            options.verbose = true;
        } else {
            eprintln!("warning: unknown option '{arg}'");
        }
    }

    options
}

/// Build the application rooted at `path`; returns the process exit status.
pub fn build_file(path: &str, options: &BuildOptions) -> i32 {
    ub_build::init_tracing(options.verbose.then_some("ub_build=debug"));

    let env_jobs = std::env::var(JOBS_ENV).ok();
    let config = match options
        .to_builder(Path::new(path), env_jobs.as_deref())
        .and_then(BuildConfigurationBuilder::build)
    {
        Ok(config) => config,
        Err(error) => {
            print_diagnostics(&error.diagnostics);
            eprintln!("{error}");
            return 1;
        }
    };

    let toolchain = options.toolchain();
    match Application::new(&config, &toolchain).build() {
        Ok(report) => {
            print_diagnostics(&report.warnings);
            let stats = report.stats();
            if report.is_up_to_date() {
                println!("{} is up to date", report.executable.display());
            } else {
                println!(
                    "Built {} ({} steps run, {} up to date)",
                    report.executable.display(),
                    stats.run,
                    stats.fresh
                );
            }
            tracing::debug!(halves = report.halves.len(), libraries = report.libraries.len(), "build report");
            0
        }
        Err(error) => {
            let error = AggregateError::from(error);
            print_diagnostics(&error.diagnostics);
            eprintln!("{error}");
            1
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
