//! Build configuration.
//!
//! A [`BuildConfiguration`] is produced once by [`BuildConfigurationBuilder`]
//! and is immutable afterwards. Validation happens in `build()`: every
//! configuration problem is collected and raised together.

mod abi;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rustc_hash::FxHashMap;
use ub_diagnostic::{AggregateError, Diagnostic, DiagnosticBag, ErrorCode};

pub use abi::Abi;

use crate::hash::{ContentHash, FxHasher};
use crate::merge::DedupStrategy;

/// Target operating system family.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Platform {
    Ios,
    TvOs,
    WatchOs,
}

impl Platform {
    /// Every platform, for lookups.
    pub const ALL: [Platform; 3] = [Platform::Ios, Platform::TvOs, Platform::WatchOs];

    pub fn name(self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::TvOs => "tvOS",
            Platform::WatchOs => "watchOS",
        }
    }

    /// Name of the platform's product module, implicitly referenced by
    /// every build.
    pub fn product_module(self) -> &'static str {
        match self {
            Platform::Ios => "Platform.iOS",
            Platform::TvOs => "Platform.TVOS",
            Platform::WatchOs => "Platform.WatchOS",
        }
    }

    /// Lowest deployment target the runtime supports.
    pub fn minimum_deployment(self) -> Version {
        match self {
            Platform::Ios => Version::new(7, 0),
            Platform::TvOs => Version::new(9, 0),
            Platform::WatchOs => Version::new(2, 0),
        }
    }

    /// Name used in `-m<name>-version-min=` compiler flags.
    pub fn min_version_flag_name(self, target: BuildTarget) -> &'static str {
        match (self, target) {
            (Platform::Ios, BuildTarget::Device) => "iphoneos",
            (Platform::Ios, BuildTarget::Simulator) => "ios-simulator",
            (Platform::TvOs, BuildTarget::Device) => "tvos",
            (Platform::TvOs, BuildTarget::Simulator) => "tvos-simulator",
            (Platform::WatchOs, BuildTarget::Device) => "watchos",
            (Platform::WatchOs, BuildTarget::Simulator) => "watchos-simulator",
        }
    }

    /// Operating system component of target triples.
    pub fn triple_os(self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::TvOs => "tvos",
            Platform::WatchOs => "watchos",
        }
    }

    /// ABIs accepted for this platform and target.
    pub fn valid_abis(self, target: BuildTarget) -> Vec<Abi> {
        let device = target == BuildTarget::Device;
        match self {
            Platform::Ios if device => vec![
                Abi::ARMV7,
                Abi::ARMV7 | Abi::THUMB,
                Abi::ARMV7 | Abi::LLVM,
                Abi::ARMV7 | Abi::LLVM | Abi::THUMB,
                Abi::ARMV7S,
                Abi::ARMV7S | Abi::THUMB,
                Abi::ARMV7S | Abi::LLVM,
                Abi::ARMV7S | Abi::LLVM | Abi::THUMB,
                Abi::ARM64,
                Abi::ARM64 | Abi::LLVM,
            ],
            Platform::Ios => vec![Abi::I386, Abi::X86_64],
            Platform::WatchOs if device => vec![Abi::ARMV7K, Abi::ARMV7K | Abi::LLVM],
            Platform::WatchOs => vec![Abi::I386],
            Platform::TvOs if device => vec![Abi::ARM64, Abi::ARM64 | Abi::LLVM],
            Platform::TvOs => vec![Abi::X86_64],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Diagnostic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "tvos" => Ok(Platform::TvOs),
            "watchos" => Ok(Platform::WatchOs),
            _ => Err(Diagnostic::error(ErrorCode::E0071)
                .with_message(format!("Unknown platform: {s}"))),
        }
    }
}

/// Physical device or simulator.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BuildTarget {
    Device,
    Simulator,
}

impl FromStr for BuildTarget {
    type Err = Diagnostic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "device" => Ok(BuildTarget::Device),
            "simulator" | "sim" => Ok(BuildTarget::Simulator),
            _ => Err(Diagnostic::error(ErrorCode::E0071)
                .with_message(format!("Unknown build target: {s}"))),
        }
    }
}

/// How much bitcode to embed in native objects.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum BitcodeMode {
    #[default]
    None,
    /// Full bitcode produced from the AOT compiler's assembly output.
    AsmOnly,
    /// AOT emits LLVM IR directly; the IR is retargeted then compiled.
    LlvmOnly,
    /// Empty bitcode sections only.
    MarkerOnly,
}

impl BitcodeMode {
    pub fn enabled(self) -> bool {
        self != BitcodeMode::None
    }

    /// Compiler/linker flag embedding bitcode, if any.
    pub fn embed_flag(self) -> Option<&'static str> {
        match self {
            BitcodeMode::None => None,
            BitcodeMode::MarkerOnly => Some("-fembed-bitcode-marker"),
            BitcodeMode::AsmOnly | BitcodeMode::LlvmOnly => Some("-fembed-bitcode"),
        }
    }
}

impl FromStr for BitcodeMode {
    type Err = Diagnostic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(BitcodeMode::None),
            "asmonly" => Ok(BitcodeMode::AsmOnly),
            "llvmonly" => Ok(BitcodeMode::LlvmOnly),
            "markeronly" => Ok(BitcodeMode::MarkerOnly),
            _ => Err(Diagnostic::error(ErrorCode::E0071)
                .with_message(format!("Unknown bitcode mode: {s}"))),
        }
    }
}

/// A `major.minor[.patch]` version.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: 0,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.patch != 0 {
            write!(f, ".{}", self.patch)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, String> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| format!("invalid version '{s}'")),
                None if required => Err(format!("invalid version '{s}'")),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(format!("invalid version '{s}'"));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

/// One independent slice of the build: the ABIs that share a pointer
/// width, with their own scratch directories and outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HalfSpec {
    /// ABIs built by this half.
    pub abis: Vec<Abi>,
    /// `"32"` or `"64"` in a dual build, `None` otherwise.
    pub suffix: Option<&'static str>,
}

impl HalfSpec {
    pub fn is_64bit(&self) -> bool {
        self.abis.iter().any(|abi| abi.is_64bit())
    }

    /// Human-readable name used in logs and diagnostics.
    pub fn name(&self) -> String {
        let abis: Vec<String> = self.abis.iter().map(ToString::to_string).collect();
        abis.join("+")
    }
}

/// Immutable, validated build configuration.
#[derive(Clone, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct BuildConfiguration {
    pub platform: Platform,
    pub target: BuildTarget,
    pub abis: Vec<Abi>,
    pub bitcode: BitcodeMode,
    pub debug: bool,
    pub profiling: bool,
    pub deployment_target: Version,
    pub sdk_version: Version,
    /// Passed to the native compiler as `-isysroot`.
    pub sdk_root: PathBuf,
    /// Directory holding the runtime's static libraries.
    pub runtime_lib_dir: PathBuf,
    /// Runtime libraries linked into every executable (file names).
    pub runtime_libraries: Vec<String>,
    /// Entry-point library, force-loaded (file name).
    pub main_library: String,
    pub root_module: PathBuf,
    /// Directories searched, in order, for referenced modules.
    pub search_dirs: Vec<PathBuf>,
    /// Directory holding the platform's own modules.
    pub platform_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub executable_name: String,
    /// Worker threads for the task graph; 0 = host core count.
    pub jobs: usize,
    /// Wall-clock limit for any single external tool.
    pub tool_timeout: Duration,
    pub dedup: DedupStrategy,
    pub native_strip: bool,
    pub dsym: bool,
    pub msym: bool,
    pub dead_strip: bool,
    pub pie: bool,
    /// Generate and compile bridging registration code.
    pub static_registrar: bool,
    /// Wrap calls into the Objective-C dispatcher so native exceptions
    /// surface as managed ones.
    pub native_exception_wrappers: bool,
    pub user_linker_flags: Option<String>,
    /// Frameworks required by the app itself.
    pub frameworks: Vec<String>,
    pub weak_frameworks: Vec<String>,
    /// Known system frameworks and the OS version that introduced them.
    pub framework_catalog: FxHashMap<String, Version>,
    /// Symbols that must survive native stripping.
    pub no_strip_symbols: Vec<String>,
    /// Discard the cache before building.
    pub force: bool,
    /// Non-fatal findings from validation.
    pub warnings: Vec<Diagnostic>,
}

impl BuildConfiguration {
    /// Start a configuration for the given root module.
    pub fn builder(
        platform: Platform,
        target: BuildTarget,
        root_module: impl Into<PathBuf>,
    ) -> BuildConfigurationBuilder {
        BuildConfigurationBuilder::new(platform, target, root_module.into())
    }

    pub fn is_device(&self) -> bool {
        self.target == BuildTarget::Device
    }

    pub fn is_simulator(&self) -> bool {
        self.target == BuildTarget::Simulator
    }

    pub fn is_llvm(&self) -> bool {
        self.abis.iter().any(|abi| abi.is_llvm())
    }

    /// A dual build has both 32-bit and 64-bit ABIs.
    pub fn is_dual(&self) -> bool {
        self.abis.iter().any(|a| a.is_64bit()) && self.abis.iter().any(|a| !a.is_64bit())
    }

    /// Split the ABI list into independent halves.
    ///
    /// The 64-bit half comes first in a dual build.
    pub fn halves(&self) -> Vec<HalfSpec> {
        if self.is_dual() {
            vec![
                HalfSpec {
                    abis: Abi::select(&self.abis, Abi::ARCH_64_MASK),
                    suffix: Some("64"),
                },
                HalfSpec {
                    abis: Abi::select(&self.abis, Abi::ARCH_32_MASK),
                    suffix: Some("32"),
                },
            ]
        } else {
            vec![HalfSpec {
                abis: self.abis.clone(),
                suffix: None,
            }]
        }
    }

    /// The root module's name without extension.
    pub fn root_name(&self) -> String {
        file_stem(&self.root_module)
    }

    /// Path of the final (possibly universal) executable.
    pub fn final_executable(&self) -> PathBuf {
        self.output_dir.join(&self.executable_name)
    }

    /// Full target triple for an ABI.
    pub fn triple(&self, abi: Abi) -> String {
        let mut triple = format!("{}-apple-{}", abi.arch_name(), self.platform.triple_os());
        if self.is_simulator() {
            triple.push_str("-simulator");
        }
        triple
    }

    /// Fingerprint of every setting that influences build outputs.
    ///
    /// Job count, timeouts and `force` are excluded.
    pub fn fingerprint(&self) -> ContentHash {
        let mut hasher = FxHasher::default();
        self.platform.hash(&mut hasher);
        self.target.hash(&mut hasher);
        self.abis.hash(&mut hasher);
        self.bitcode.hash(&mut hasher);
        self.debug.hash(&mut hasher);
        self.profiling.hash(&mut hasher);
        self.deployment_target.hash(&mut hasher);
        self.sdk_version.hash(&mut hasher);
        self.sdk_root.hash(&mut hasher);
        self.runtime_lib_dir.hash(&mut hasher);
        self.runtime_libraries.hash(&mut hasher);
        self.main_library.hash(&mut hasher);
        self.root_module.hash(&mut hasher);
        self.search_dirs.hash(&mut hasher);
        self.platform_dir.hash(&mut hasher);
        self.output_dir.hash(&mut hasher);
        self.executable_name.hash(&mut hasher);
        self.dead_strip.hash(&mut hasher);
        self.pie.hash(&mut hasher);
        self.static_registrar.hash(&mut hasher);
        self.native_exception_wrappers.hash(&mut hasher);
        self.user_linker_flags.hash(&mut hasher);
        self.frameworks.hash(&mut hasher);
        self.weak_frameworks.hash(&mut hasher);
        let mut catalog: Vec<_> = self.framework_catalog.iter().collect();
        catalog.sort();
        catalog.hash(&mut hasher);
        ContentHash::new(hasher.finish())
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Builder for [`BuildConfiguration`].
#[derive(Clone, Debug)]
#[must_use]
pub struct BuildConfigurationBuilder {
    config: BuildConfiguration,
    abis_text: Option<String>,
    deployment_text: Option<String>,
    dsym: Option<bool>,
    msym: Option<bool>,
}

impl BuildConfigurationBuilder {
    fn new(platform: Platform, target: BuildTarget, root_module: PathBuf) -> Self {
        let executable_name = file_stem(&root_module);
        let default_sdk = platform.minimum_deployment();
        Self {
            config: BuildConfiguration {
                platform,
                target,
                abis: Vec::new(),
                bitcode: BitcodeMode::None,
                debug: false,
                profiling: false,
                deployment_target: default_sdk,
                sdk_version: default_sdk,
                sdk_root: PathBuf::new(),
                runtime_lib_dir: PathBuf::new(),
                runtime_libraries: Vec::new(),
                main_library: "libapp.a".to_string(),
                root_module,
                search_dirs: Vec::new(),
                platform_dir: PathBuf::new(),
                cache_dir: PathBuf::from("obj/ubuild-cache"),
                output_dir: PathBuf::from("out"),
                executable_name,
                jobs: 0,
                tool_timeout: Duration::from_secs(600),
                dedup: DedupStrategy::Symlink,
                native_strip: true,
                dsym: false,
                msym: false,
                dead_strip: true,
                pie: true,
                static_registrar: target == BuildTarget::Device,
                native_exception_wrappers: false,
                user_linker_flags: None,
                frameworks: Vec::new(),
                weak_frameworks: Vec::new(),
                framework_catalog: FxHashMap::default(),
                no_strip_symbols: Vec::new(),
                force: false,
                warnings: Vec::new(),
            },
            abis_text: None,
            deployment_text: None,
            dsym: None,
            msym: None,
        }
    }

    /// Comma-separated ABI list, parsed and validated in `build()`.
    pub fn with_abis(mut self, abis: impl Into<String>) -> Self {
        self.abis_text = Some(abis.into());
        self
    }

    pub fn with_bitcode(mut self, mode: BitcodeMode) -> Self {
        self.config.bitcode = mode;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.config.profiling = profiling;
        self
    }

    /// Deployment target; defaults to the SDK version.
    pub fn with_deployment_target(mut self, version: impl Into<String>) -> Self {
        self.deployment_text = Some(version.into());
        self
    }

    pub fn with_sdk_version(mut self, version: Version) -> Self {
        self.config.sdk_version = version;
        self
    }

    pub fn with_sdk_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sdk_root = dir.into();
        self
    }

    pub fn with_runtime(mut self, dir: impl Into<PathBuf>, libraries: Vec<String>) -> Self {
        self.config.runtime_lib_dir = dir.into();
        self.config.runtime_libraries = libraries;
        self
    }

    pub fn with_main_library(mut self, name: impl Into<String>) -> Self {
        self.config.main_library = name.into();
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.search_dirs.push(dir.into());
        self
    }

    pub fn with_platform_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.platform_dir = dir.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn with_executable_name(mut self, name: impl Into<String>) -> Self {
        self.config.executable_name = name.into();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.config.jobs = jobs;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn with_dedup(mut self, strategy: DedupStrategy) -> Self {
        self.config.dedup = strategy;
        self
    }

    pub fn with_native_strip(mut self, strip: bool) -> Self {
        self.config.native_strip = strip;
        self
    }

    pub fn with_dsym(mut self, enabled: bool) -> Self {
        self.dsym = Some(enabled);
        self
    }

    pub fn with_msym(mut self, enabled: bool) -> Self {
        self.msym = Some(enabled);
        self
    }

    pub fn with_dead_strip(mut self, enabled: bool) -> Self {
        self.config.dead_strip = enabled;
        self
    }

    pub fn with_pie(mut self, enabled: bool) -> Self {
        self.config.pie = enabled;
        self
    }

    pub fn with_static_registrar(mut self, enabled: bool) -> Self {
        self.config.static_registrar = enabled;
        self
    }

    pub fn with_native_exception_wrappers(mut self, enabled: bool) -> Self {
        self.config.native_exception_wrappers = enabled;
        self
    }

    pub fn with_user_linker_flags(mut self, flags: impl Into<String>) -> Self {
        let flags = flags.into();
        self.config.user_linker_flags = (!flags.trim().is_empty()).then_some(flags);
        self
    }

    pub fn with_framework(mut self, name: impl Into<String>, weak: bool) -> Self {
        if weak {
            self.config.weak_frameworks.push(name.into());
        } else {
            self.config.frameworks.push(name.into());
        }
        self
    }

    pub fn with_catalog_entry(mut self, framework: impl Into<String>, introduced: Version) -> Self {
        self.config
            .framework_catalog
            .insert(framework.into(), introduced);
        self
    }

    pub fn with_no_strip_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.config.no_strip_symbols.push(symbol.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<BuildConfiguration, AggregateError> {
        let mut config = self.config;
        let mut bag = DiagnosticBag::new();

        // ABIs
        if let Some(text) = &self.abis_text {
            match Abi::parse_list(text) {
                Ok(abis) => config.abis = abis,
                Err(diag) => bag.push(diag),
            }
        }
        if config.abis.is_empty() && !bag.has_errors() {
            match config.platform {
                Platform::Ios => {
                    config.abis = vec![if config.is_device() {
                        Abi::ARMV7
                    } else {
                        Abi::I386
                    }];
                }
                Platform::TvOs | Platform::WatchOs => bag.error(
                    ErrorCode::E0076,
                    format!(
                        "No architecture specified (using the --abi argument). An architecture is required for {} projects.",
                        config.platform
                    ),
                ),
            }
        }
        let valid = config.platform.valid_abis(config.target);
        for abi in &config.abis {
            if !valid.contains(abi) {
                let names: Vec<String> = valid.iter().map(ToString::to_string).collect();
                bag.error(
                    ErrorCode::E0075,
                    format!(
                        "Invalid architecture '{abi}' for {} projects. Valid architectures are: {}",
                        config.platform,
                        names.join(", ")
                    ),
                );
            }
        }

        // Bitcode and LLVM
        if matches!(config.bitcode, BitcodeMode::AsmOnly | BitcodeMode::LlvmOnly)
            && !config.is_llvm()
        {
            bag.error(
                ErrorCode::E3008,
                "Bitcode support requires the use of LLVM (--abi=arm64+llvm etc.)",
            );
        }
        if config.debug && config.is_llvm() {
            config.warnings.push(Diagnostic::warning(ErrorCode::E3003).with_message(
                "Debugging is not supported when building with LLVM. Debugging has been disabled.",
            ));
            config.debug = false;
        }

        // Deployment target
        if let Some(text) = &self.deployment_text {
            match text.parse::<Version>() {
                Ok(version) => config.deployment_target = version,
                Err(message) => bag.error(ErrorCode::E0073, message),
            }
        } else {
            config.deployment_target = config.sdk_version;
        }
        let minimum = config.platform.minimum_deployment();
        if config.deployment_target < minimum {
            bag.error(
                ErrorCode::E0073,
                format!(
                    "A deployment target of {} is not supported for {} (the minimum is {minimum})",
                    config.deployment_target, config.platform
                ),
            );
        } else if config.deployment_target > config.sdk_version {
            bag.error(
                ErrorCode::E0074,
                format!(
                    "A deployment target of {} is not supported for {} (the maximum is {})",
                    config.deployment_target, config.platform, config.sdk_version
                ),
            );
        }

        // Root module name
        let root = config.root_name();
        if Platform::ALL.iter().any(|p| p.product_module() == root) {
            bag.error(
                ErrorCode::E0023,
                format!("Application name '{root}' conflicts with a platform module name."),
            );
        }

        config.dsym = self.dsym.unwrap_or(config.is_device());
        config.msym = self.msym.unwrap_or(!config.debug && config.is_device());
        if config.user_linker_flags.is_some() || config.bitcode == BitcodeMode::LlvmOnly {
            config.dead_strip = false;
        }

        bag.into_result()?;
        Ok(config)
    }
}
