//! Native link of one half.
//!
//! Flags are accumulated from the configuration, every module's native
//! requirements and the objects the task graph produced, then handed to the
//! compiler driver in a single invocation. The link is skipped when the
//! executable is up to date with the same inputs and command line. Linker
//! output is classified by [`LinkerOutputClassifier`].

mod classify;

pub use classify::{LinkerOutputClassifier, MAX_DIAGNOSTICS};

use std::fs;

use ub_diagnostic::{AggregateError, Diagnostic, DiagnosticBag, ErrorCode};

use crate::cache::{CacheError, CacheGate};
use crate::config::{BuildConfiguration, Platform};
use crate::flags::{split_arguments, CompilerFlags, FrameworkContext};
use crate::half::{HalfLayout, HalfOutputs};
use crate::module::ModuleSet;
use crate::toolchain::{Tool, ToolInvocation, ToolRunner};

/// Runtime library that collects profiling data.
pub const PROFILER_LIBRARY: &str = "libub-profiler-log.a";

/// Entry point of [`PROFILER_LIBRARY`]; called by the main stub.
pub const PROFILER_STARTUP: &str = "ub_profiler_startup";

/// Whether the link ran or reused the existing executable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    UpToDate,
}

/// Links the executable of a half.
pub struct NativeLinker<'a> {
    config: &'a BuildConfiguration,
    runner: &'a dyn ToolRunner,
    cache: &'a CacheGate,
}

impl<'a> NativeLinker<'a> {
    pub fn new(config: &'a BuildConfiguration, runner: &'a dyn ToolRunner, cache: &'a CacheGate) -> Self {
        NativeLinker {
            config,
            runner,
            cache,
        }
    }

    /// Every flag of the link of `layout`'s half, prepared for emission.
    pub fn link_flags(&self, layout: &HalfLayout, modules: &ModuleSet, outputs: &HalfOutputs) -> CompilerFlags {
        let config = self.config;
        let bitcode = config.bitcode.enabled();
        let mut flags = CompilerFlags::new();
        let mut is_cxx = false;
        let mut needs_gcc_eh = false;
        let mut smart_link = true;

        flags.add_frameworks(&config.frameworks, &config.weak_frameworks);
        for module in modules {
            let native = &module.native;
            flags.add_frameworks(&native.frameworks, &native.weak_frameworks);
            flags.add_link_with_all(&native.link_with, &native.force_load);
            for flag in &native.linker_flags {
                flags.add_other_flag(flag.as_str());
            }
            is_cxx |= native.is_cxx;
            needs_gcc_eh |= native.needs_gcc_exception_handling;
            smart_link &= native.smart_link;
        }

        if let Some(embed) = config.bitcode.embed_flag() {
            flags.add_other_flag(embed);
        }
        if config.platform == Platform::Ios {
            flags.add_other_flag(if config.pie { "-Wl,-pie" } else { "-Wl,-no_pie" });
        }
        for abi in &layout.spec.abis {
            flags.add_flag_with_value("-arch", abi.arch_name());
        }
        flags.add_other_flag(format!(
            "-m{}-version-min={}",
            config.platform.min_version_flag_name(config.target),
            config.deployment_target
        ));
        flags.add_flag_with_value("-isysroot", config.sdk_root.to_string_lossy());

        for library in &config.runtime_libraries {
            flags.add_link_with(&config.runtime_lib_dir.join(library), false);
        }
        for object in &outputs.objects {
            flags.add_link_with(object, false);
        }
        flags.add_flag_with_value("-o", layout.executable.to_string_lossy());
        flags.add_other_flag("-lz");
        flags.add_other_flag("-liconv");
        if bitcode || is_cxx {
            flags.add_other_flag("-lc++");
        }
        if needs_gcc_eh {
            flags.add_other_flag("-lgcc_eh");
        }
        // Bitcode links reject -u for symbols that only exist in bitcode.
        if !bitcode {
            for symbol in &outputs.required_symbols {
                flags.reference_symbol(symbol);
            }
        }
        flags.add_link_with(&config.runtime_lib_dir.join(&config.main_library), true);
        if config.profiling {
            flags.add_link_with(&config.runtime_lib_dir.join(PROFILER_LIBRARY), false);
            if !bitcode {
                flags.reference_symbol(PROFILER_STARTUP);
            }
        }
        if let Some(user) = &config.user_linker_flags {
            flags.add_raw_flags(&split_arguments(user));
        }
        if config.dead_strip && smart_link {
            flags.add_other_flag("-dead_strip");
        }

        flags.prepare(&FrameworkContext {
            catalog: &config.framework_catalog,
            deployment_target: config.deployment_target,
            sdk_version: config.sdk_version,
        });
        flags
    }

    /// Link the half, recording the frameworks used and any warnings in
    /// `outputs`.
    pub fn link(
        &self,
        layout: &HalfLayout,
        modules: &ModuleSet,
        outputs: &mut HalfOutputs,
    ) -> Result<LinkOutcome, AggregateError> {
        let flags = self.link_flags(layout, modules, outputs);
        outputs.frameworks = flags.frameworks().to_vec();
        outputs.weak_frameworks = flags.weak_frameworks().to_vec();

        let invocation = ToolInvocation::new(Tool::Compiler).with_args(flags.to_args());
        let executable = layout.executable.clone();
        let key = format!("link:{}", executable.display());
        let inputs = flags.inputs();
        let fingerprint = invocation.fingerprint_text();
        let targets = [executable.clone()];

        if self.cache.is_fresh(&key, &inputs, &targets, &fingerprint) {
            tracing::debug!(target = %executable.display(), "target is up-to-date");
            outputs.cached_executable = true;
            return Ok(LinkOutcome::UpToDate);
        }
        outputs.cached_executable = false;

        if let Some(parent) = executable.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::write(parent, &e).to_diagnostic())?;
        }
        tracing::info!(half = layout.key(), executable = %executable.display(), "linking");
        let result = self
            .runner
            .run(&invocation, self.config.tool_timeout)
            .map_err(|e| e.to_diagnostic())?;

        let failed = !result.success();
        let classifier = LinkerOutputClassifier::new(failed)
            .with_own_inputs(&outputs.objects)
            .with_symbol_members(&outputs.symbol_members);
        let mut bag: DiagnosticBag = classifier.classify(&result.output).into_iter().collect();

        if failed {
            self.cache.invalidate(&key);
            bag.extend(self.failure_hints(modules));
            return Err(bag
                .into_result()
                .err()
                .unwrap_or_else(|| AggregateError::single(link_failed())));
        }

        self.cache
            .record(&key, &inputs, &targets, &fingerprint)
            .map_err(|e| e.to_diagnostic())?;
        outputs.warnings.extend(bag.into_result()?);
        Ok(LinkOutcome::Linked)
    }

    /// Diagnostics appended after the classified output of a failed link.
    fn failure_hints(&self, modules: &ModuleSet) -> Vec<Diagnostic> {
        let mut hints = Vec::new();
        for module in modules {
            for reference in &module.native.unresolved_native_references {
                hints.push(Diagnostic::warning(ErrorCode::E5215).with_message(format!(
                    "References to '{reference}' might require additional -framework=XXX or -lXXX instructions to the native linker"
                )));
            }
        }
        if let Some(user) = self.config.user_linker_flags.as_deref().filter(|f| !f.is_empty()) {
            hints.push(Diagnostic::error(ErrorCode::E5201).with_message(format!(
                "Native linking failed. Please review the build log and the user flags provided to the linker: {user}"
            )));
        }
        hints.push(link_failed());
        hints
    }
}

fn link_failed() -> Diagnostic {
    Diagnostic::error(ErrorCode::E5202).with_message("Native linking failed. Please review the build log.")
}
