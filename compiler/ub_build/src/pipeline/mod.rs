//! The whole build, start to finish.
//!
//! Resolve the closure once, then run each half through trim, native
//! requirement extraction, the task graph and the native link. Halves are
//! independent and run concurrently; their errors are reported together.
//! The per-half executables are merged, post-processed and the managed
//! modules copied next to the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use ub_diagnostic::{AggregateError, Diagnostic, DiagnosticBag};

use crate::cache::{CacheError, CacheGate, ContentNormalizer};
use crate::config::{BuildConfiguration, HalfSpec};
use crate::error::BuildError;
use crate::half::{HalfLayout, HalfOutputs};
use crate::image::{ImageReader, ModuleReader};
use crate::link::{LinkOutcome, NativeLinker};
use crate::merge::{self, DedupStats, Deduplicator};
use crate::module::ModuleSet;
use crate::postlink::{symbol_list, PostLinker, StepOutcome};
use crate::resolve::{ClosureResolver, ModuleLocator};
use crate::tasks::{execute, plan_half, TaskExecutor, TaskStats};
use crate::toolchain::ToolRunner;
use crate::trim::{CopyTrimmer, TrimPhase, Trimmer};

/// What one half did.
#[derive(Clone, Debug)]
pub struct HalfReport {
    pub name: String,
    pub modules: usize,
    pub trim_cached: bool,
    pub link: LinkOutcome,
    pub stats: TaskStats,
}

/// Result of a successful build.
#[derive(Clone, Debug)]
pub struct BuildReport {
    /// The shipped executable.
    pub executable: PathBuf,
    pub halves: Vec<HalfReport>,
    /// Universal libraries written next to the executable.
    pub libraries: Vec<PathBuf>,
    pub strip: StepOutcome,
    pub dsym: StepOutcome,
    /// `None` unless both halves shipped module directories.
    pub dedup: Option<DedupStats>,
    pub warnings: Vec<Diagnostic>,
}

impl BuildReport {
    /// Task counters of every half together.
    pub fn stats(&self) -> TaskStats {
        let mut total = TaskStats::default();
        for half in &self.halves {
            total.merge(&half.stats);
        }
        total
    }

    /// Whether nothing at all had to be rebuilt.
    pub fn is_up_to_date(&self) -> bool {
        self.halves
            .iter()
            .all(|h| h.trim_cached && h.link == LinkOutcome::UpToDate && h.stats.run == 0)
    }
}

/// A half between phases.
struct Half {
    layout: HalfLayout,
    modules: ModuleSet,
    outputs: HalfOutputs,
    link: LinkOutcome,
}

/// Builds one application.
pub struct Application<'a> {
    config: &'a BuildConfiguration,
    runner: &'a dyn ToolRunner,
    reader: &'a dyn ModuleReader,
    trimmer: &'a dyn Trimmer,
    normalizers: Vec<Arc<dyn ContentNormalizer>>,
}

impl<'a> Application<'a> {
    pub fn new(config: &'a BuildConfiguration, runner: &'a dyn ToolRunner) -> Self {
        Application {
            config,
            runner,
            reader: &ImageReader,
            trimmer: &CopyTrimmer,
            normalizers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_reader(mut self, reader: &'a dyn ModuleReader) -> Self {
        self.reader = reader;
        self
    }

    #[must_use]
    pub fn with_trimmer(mut self, trimmer: &'a dyn Trimmer) -> Self {
        self.trimmer = trimmer;
        self
    }

    /// Compare files through `normalizer` as well, for cache freshness and
    /// for deduplication alike.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Arc<dyn ContentNormalizer>) -> Self {
        self.normalizers.push(normalizer);
        self
    }

    /// Run the build.
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        let config = self.config;
        let mut warnings = config.warnings.clone();

        let (cache, cache_warning) = CacheGate::open(&config.cache_dir, config.fingerprint(), config.force)?;
        let cache = self
            .normalizers
            .iter()
            .fold(cache, |cache, n| cache.with_normalizer(Arc::clone(n)));
        warnings.extend(cache_warning);

        let modules = self.resolve()?;
        tracing::info!(modules = modules.len(), abis = config.abis.len(), "building application");

        let prepared = run_halves(config.halves(), |spec| self.prepare_half(&cache, spec, &modules))?;
        if prepared.len() == 2 && config.is_device() {
            let aligned = merge::align_identical_modules(
                &cache,
                &prepared[0].layout.build_dir,
                &prepared[1].layout.build_dir,
            )?;
            tracing::debug!(aligned, "aligned identical modules between halves");
        }
        let halves = run_halves(prepared, |half| self.compile_half(&cache, half))?;
        for half in &halves {
            warnings.extend(half.outputs.warnings.iter().cloned());
        }

        let shipped: Vec<Vec<PathBuf>> = halves
            .iter()
            .map(|h| h.outputs.libraries_to_ship.clone())
            .collect();
        let libraries = merge::build_fat_libraries(
            self.runner,
            &cache,
            &shipped,
            &config.output_dir,
            config.tool_timeout,
        )?;

        let linked = self.merge_executables(&cache, &halves)?;
        let post = PostLinker::new(config, self.runner, &cache);
        let dsym = post.generate_dsym(&linked)?;
        let msym_dirs: Vec<PathBuf> = halves.iter().map(|h| h.layout.msym_dir.clone()).collect();
        warnings.extend(post.generate_msym(&linked, &msym_dirs));
        let symbols = symbol_list(
            halves.iter().flat_map(|h| &h.outputs.required_symbols),
            &config.no_strip_symbols,
        );
        let strip = post.finalize_executable(&linked, &symbols)?;

        let dedup = self.ship_modules(&cache, &halves)?;
        cache.finish()?;

        let report = BuildReport {
            executable: config.final_executable(),
            halves: halves
                .into_iter()
                .map(|h| HalfReport {
                    name: h.layout.spec.name(),
                    modules: h.modules.len(),
                    trim_cached: h.outputs.trim_cached,
                    link: h.link,
                    stats: h.outputs.task_stats,
                })
                .collect(),
            libraries,
            strip,
            dsym,
            dedup,
            warnings,
        };
        let stats = report.stats();
        tracing::info!(
            executable = %report.executable.display(),
            run = stats.run,
            fresh = stats.fresh,
            "build finished"
        );
        Ok(report)
    }

    fn resolve(&self) -> Result<ModuleSet, AggregateError> {
        let config = self.config;
        let root_dir = config
            .root_module
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf);
        let locator = ModuleLocator::new(&root_dir, &config.search_dirs, &config.platform_dir);
        ClosureResolver::new(&locator, self.reader, config.platform).resolve(&config.root_module)
    }

    /// Trim, extract native requirements and fill the build directory.
    fn prepare_half(&self, cache: &CacheGate, spec: HalfSpec, modules: &ModuleSet) -> Result<Half, AggregateError> {
        let layout = HalfLayout::new(self.config, spec);
        layout
            .create_dirs()
            .map_err(|e| CacheError::write(&layout.arch_dir, &e).to_diagnostic())?;
        let mut outputs = HalfOutputs::new();

        let mut trimmed = TrimPhase::new(self.config, self.trimmer, self.reader, cache).run(
            &layout,
            modules,
            &mut outputs,
        )?;

        let native_dir = &layout.native_dir;
        let extraction: Vec<Diagnostic> = trimmed
            .as_mut_slice()
            .par_iter_mut()
            .flat_map_iter(|module| module.extract_native_requirements(native_dir))
            .collect();
        outputs.warnings.extend(extraction);
        for module in &trimmed {
            for library in &module.native.link_with {
                if library.extension().is_some_and(|ext| ext == "dylib") {
                    outputs.link_with_and_ship(library.clone());
                }
            }
        }

        for module in trimmed.iter_mut() {
            let target = layout.build_dir.join(module.file_name());
            cache
                .update_file(&module.path, &target)
                .map_err(|e| e.to_diagnostic())?;
            module.path = target;
        }
        tracing::debug!(half = layout.key(), modules = trimmed.len(), "build directory ready");

        Ok(Half {
            layout,
            modules: trimmed,
            outputs,
            link: LinkOutcome::UpToDate,
        })
    }

    /// Run the task graph of a half and link its executable.
    fn compile_half(&self, cache: &CacheGate, mut half: Half) -> Result<Half, AggregateError> {
        let config = self.config;
        let plan = plan_half(config, &half.layout, &half.modules);
        let executor = TaskExecutor::new(self.runner, cache, config.tool_timeout);
        let stats = execute(&plan.graph, config.jobs, |task| executor.run(task)).into_result()?;

        for object in plan.objects {
            half.outputs.link_with(object);
        }
        half.outputs.registration_methods = plan.registration_methods;
        half.outputs.task_stats = stats;

        half.link = NativeLinker::new(config, self.runner, cache).link(
            &half.layout,
            &half.modules,
            &mut half.outputs,
        )?;
        Ok(half)
    }

    /// The linked executable of the whole build: the single half's own, or
    /// the universal merge of both.
    fn merge_executables(&self, cache: &CacheGate, halves: &[Half]) -> Result<PathBuf, Diagnostic> {
        if let [single] = halves {
            return Ok(single.layout.executable.clone());
        }
        let inputs: Vec<PathBuf> = halves.iter().map(|h| h.layout.executable.clone()).collect();
        let output = cache.dir().join("Output").join(&self.config.executable_name);
        merge::lipo(self.runner, cache, &inputs, &output, self.config.tool_timeout)?;
        Ok(output)
    }

    /// Copy every half's modules into its final directory and deduplicate
    /// the two directories of a dual build.
    fn ship_modules(&self, cache: &CacheGate, halves: &[Half]) -> Result<Option<DedupStats>, Diagnostic> {
        for half in halves {
            for module in &half.modules {
                cache.update_file(&module.path, &half.layout.modules_dir.join(module.file_name()))?;
            }
        }
        match halves {
            [first, second] => Deduplicator::new(cache, self.config.dedup)
                .dedup_dirs(&first.layout.modules_dir, &second.layout.modules_dir)
                .map(Some),
            _ => Ok(None),
        }
    }
}

/// Run `f` for every half, concurrently when there are two, and raise the
/// errors of all halves together.
fn run_halves<I, T, F>(items: Vec<I>, f: F) -> Result<Vec<T>, AggregateError>
where
    I: Send,
    T: Send,
    F: Fn(I) -> Result<T, AggregateError> + Sync,
{
    let mut items = items.into_iter();
    let results = match (items.next(), items.next()) {
        (Some(first), Some(second)) => {
            let (a, b) = rayon::join(|| f(first), || f(second));
            let mut results = vec![a, b];
            results.extend(items.map(&f));
            results
        }
        (Some(only), None) => vec![f(only)],
        _ => Vec::new(),
    };

    let mut bag = DiagnosticBag::new();
    let mut done = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(value) => done.push(value),
            Err(error) => bag.absorb(error),
        }
    }
    bag.into_result()?;
    Ok(done)
}
