//! Emitting the task graph of one half.
//!
//! For every architecture of the half: one AOT task per module followed by
//! the native compile of its output, the main stub, and, when enabled, the
//! registration code and the foreign-function wrappers. Generated sources
//! that are shared by all architectures are written once per half.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use super::{BuildTask, TaskAction, TaskGraph, TaskId, TaskKind};
use crate::config::{Abi, BitcodeMode, BuildConfiguration};
use crate::glue::{self, MainStub, REGISTRATION_METHOD};
use crate::half::HalfLayout;
use crate::image::EntryPoint;
use crate::module::{Module, ModuleSet};
use crate::toolchain::{Tool, ToolInvocation};

/// Language of a native compile input, passed as `-x`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceLanguage {
    Assembly,
    ObjectiveC,
    ObjectiveCxx,
    LlvmIr,
}

impl SourceLanguage {
    fn flag(self) -> Option<&'static str> {
        match self {
            SourceLanguage::Assembly => None,
            SourceLanguage::ObjectiveC => Some("objective-c"),
            SourceLanguage::ObjectiveCxx => Some("objective-c++"),
            SourceLanguage::LlvmIr => Some("ir"),
        }
    }
}

/// Native compile of one input to one object for `abis`.
pub fn compile_invocation(
    config: &BuildConfiguration,
    abis: &[Abi],
    input: &Path,
    output: &Path,
    language: SourceLanguage,
    extra_flags: &[&str],
) -> ToolInvocation {
    let is_assembly = input.extension().is_some_and(|ext| ext == "s");
    let mut invocation = ToolInvocation::new(Tool::Compiler);
    if !is_assembly {
        invocation = invocation.with_arg("-gdwarf-2");
        if language == SourceLanguage::ObjectiveC {
            invocation = invocation.with_arg("-std=c99");
        }
    }
    invocation = invocation
        .with_arg("-isysroot")
        .with_path(&config.sdk_root)
        .with_arg("-Qunused-arguments")
        .with_arg(format!(
            "-m{}-version-min={}",
            config.platform.min_version_flag_name(config.target),
            config.deployment_target
        ));
    if let Some(flag) = config.bitcode.embed_flag() {
        invocation = invocation.with_arg(flag);
    }
    for abi in abis {
        invocation = invocation.with_arg("-arch").with_arg(abi.arch_name());
    }
    if abis.iter().any(|abi| abi.is_thumb()) {
        invocation = invocation.with_arg("-mthumb");
    }
    invocation = invocation.with_args(extra_flags.iter().copied()).with_arg("-c");
    if config.debug {
        invocation = invocation.with_arg("-DDEBUG");
    }
    invocation = invocation.with_arg("-o").with_path(output);
    if let Some(lang) = language.flag() {
        invocation = invocation.with_arg("-x").with_arg(lang);
    }
    invocation.with_path(input)
}

/// Triple with the deployment floor, as written into retargeted IR.
fn versioned_triple(config: &BuildConfiguration, abi: Abi) -> String {
    let mut triple = format!(
        "{}-apple-{}{}",
        abi.arch_name(),
        config.platform.triple_os(),
        config.deployment_target
    );
    if config.is_simulator() {
        triple.push_str("-simulator");
    }
    triple
}

fn aot_invocation(
    config: &BuildConfiguration,
    layout: &HalfLayout,
    abi: Abi,
    module: &Module,
    output: &Path,
) -> ToolInvocation {
    let mut options = vec![
        format!("mtriple={}", config.triple(abi)),
        "static".to_string(),
        "asmonly".to_string(),
        "direct-icalls".to_string(),
    ];
    if abi.is_llvm() {
        options.push("llvm".to_string());
    }
    if config.bitcode == BitcodeMode::LlvmOnly {
        options.push("llvmonly".to_string());
    }
    if config.debug {
        options.push("soft-debug".to_string());
    }
    if config.msym {
        options.push(format!("msym-dir={}", layout.msym_dir.display()));
    }
    options.push(format!("outfile={}", output.display()));
    ToolInvocation::new(Tool::Aot)
        .with_arg(format!("--aot={}", options.join(",")))
        .with_path(&module.path)
}

/// A module and the modules it references that are part of the set.
///
/// These are the files whose content can change the AOT output.
fn aot_inputs(module: &Module, modules: &ModuleSet) -> Vec<PathBuf> {
    let mut inputs = vec![module.path.clone()];
    for reference in &module.image.references {
        if let Some(dep) = modules.get(&format!("{reference}.{}", crate::image::MODULE_EXTENSION)) {
            if !inputs.contains(&dep.path) {
                inputs.push(dep.path.clone());
            }
        }
    }
    inputs
}

/// The graph of one half plus what the link needs from it.
#[derive(Clone, Debug, Default)]
pub struct HalfPlan {
    pub graph: TaskGraph,
    /// Objects to link, in link order.
    pub objects: Vec<PathBuf>,
    /// Native functions the main stub calls.
    pub registration_methods: Vec<String>,
}

/// Build the task graph of one half from its build-directory modules.
pub fn plan_half(config: &BuildConfiguration, layout: &HalfLayout, modules: &ModuleSet) -> HalfPlan {
    let mut plan = HalfPlan::default();
    let module_inputs: Vec<PathBuf> = modules.iter().map(|m| m.path.clone()).collect();

    let registrar = config.static_registrar.then(|| {
        let source = layout.glue_dir.join("registrar.m");
        let contents = glue::registration_source(&glue::registered_classes(modules));
        let id = plan.graph.add(
            BuildTask::new(
                TaskKind::GenerateRegistration,
                layout.key(),
                source.clone(),
                TaskAction::Generate { contents },
            )
            .with_inputs(module_inputs.iter().cloned()),
        );
        plan.registration_methods.push(REGISTRATION_METHOD.to_string());
        (id, source)
    });

    let wrappers = if config.native_exception_wrappers {
        let entry_points: Vec<EntryPoint> = modules
            .iter()
            .flat_map(|m| m.image.entry_points.iter().cloned())
            .collect();
        let symbols = glue::wrapped_symbols(&entry_points);
        (!symbols.is_empty()).then(|| {
            let source = layout.glue_dir.join("pinvokes.m");
            let id = plan.graph.add(
                BuildTask::new(
                    TaskKind::GenerateWrappers,
                    layout.key(),
                    source.clone(),
                    TaskAction::Generate {
                        contents: glue::wrapper_source(&symbols),
                    },
                )
                .with_inputs(module_inputs.iter().cloned()),
            );
            (id, source)
        })
    } else {
        None
    };

    let mut planned_arches = FxHashSet::default();
    for &abi in &layout.spec.abis {
        if !planned_arches.insert(abi.arch_name()) {
            continue;
        }
        plan_arch(config, layout, modules, abi, &mut plan);

        let arch = abi.arch_name();
        if let Some((producer, source)) = &registrar {
            let object = layout.glue_dir.join(format!("registrar.{arch}.o"));
            let invocation = compile_invocation(
                config,
                &[abi],
                source,
                &object,
                SourceLanguage::ObjectiveCxx,
                &["-Wno-receiver-forward-class"],
            );
            add_compile(&mut plan, TaskKind::CompileRegistration, arch, source, object, invocation, *producer);
        }
        if let Some((producer, source)) = &wrappers {
            let object = layout.glue_dir.join(format!("libpinvokes.{arch}.o"));
            let invocation =
                compile_invocation(config, &[abi], source, &object, SourceLanguage::ObjectiveCxx, &[]);
            add_compile(&mut plan, TaskKind::CompileWrappers, arch, source, object, invocation, *producer);
        }

        let stub = MainStub {
            root_module: config.root_name(),
            aot_modules: modules.iter().map(|m| m.name.clone()).collect(),
            registration_methods: plan.registration_methods.clone(),
            debug: config.debug,
            profiling: config.profiling,
        };
        let source = layout.glue_dir.join(format!("main.{arch}.m"));
        let producer = plan.graph.add(
            BuildTask::new(
                TaskKind::GenerateGlue,
                arch,
                source.clone(),
                TaskAction::Generate {
                    contents: stub.source(),
                },
            )
            .with_inputs(module_inputs.iter().cloned()),
        );
        let object = layout.glue_dir.join(format!("main.{arch}.o"));
        let invocation =
            compile_invocation(config, &[abi], &source, &object, SourceLanguage::ObjectiveCxx, &[]);
        add_compile(&mut plan, TaskKind::CompileGlue, arch, &source, object, invocation, producer);
    }

    tracing::debug!(
        half = layout.key(),
        tasks = plan.graph.len(),
        objects = plan.objects.len(),
        "planned half"
    );
    plan
}

fn add_compile(
    plan: &mut HalfPlan,
    kind: TaskKind,
    arch: &str,
    source: &Path,
    object: PathBuf,
    invocation: ToolInvocation,
    producer: TaskId,
) {
    plan.graph.add(
        BuildTask::new(
            kind,
            arch,
            object.clone(),
            TaskAction::Tool {
                invocation,
                append_bitcode_marker: false,
            },
        )
        .with_input(source.to_path_buf())
        .after(producer),
    );
    plan.objects.push(object);
}

/// AOT and native compile of every module for one architecture.
fn plan_arch(
    config: &BuildConfiguration,
    layout: &HalfLayout,
    modules: &ModuleSet,
    abi: Abi,
    plan: &mut HalfPlan,
) {
    let arch = abi.arch_name();
    let arch_dir = layout.objects_dir.join(arch);
    let llvm_only = config.bitcode == BitcodeMode::LlvmOnly;

    for module in modules {
        let file = module.file_name();
        let aot_output = arch_dir.join(format!("{file}.{}", if llvm_only { "ll" } else { "s" }));
        let aot = plan.graph.add(
            BuildTask::new(
                TaskKind::Aot,
                arch,
                aot_output.clone(),
                TaskAction::Tool {
                    invocation: aot_invocation(config, layout, abi, module, &aot_output),
                    append_bitcode_marker: config.bitcode == BitcodeMode::MarkerOnly,
                },
            )
            .with_module(&module.name)
            .with_inputs(aot_inputs(module, modules)),
        );

        let (source, producer, language) = if llvm_only {
            let retargeted = arch_dir.join(format!("{file}.bitcode.ll"));
            let id = plan.graph.add(
                BuildTask::new(
                    TaskKind::Bitcodeify,
                    arch,
                    retargeted.clone(),
                    TaskAction::Bitcodeify {
                        triple: versioned_triple(config, abi),
                    },
                )
                .with_module(&module.name)
                .with_input(aot_output)
                .after(aot),
            );
            (retargeted, id, SourceLanguage::LlvmIr)
        } else {
            (aot_output, aot, SourceLanguage::Assembly)
        };

        let object = arch_dir.join(format!("{file}.o"));
        let invocation = compile_invocation(config, &[abi], &source, &object, language, &[]);
        plan.graph.add(
            BuildTask::new(
                TaskKind::Assemble,
                arch,
                object.clone(),
                TaskAction::Tool {
                    invocation,
                    append_bitcode_marker: false,
                },
            )
            .with_module(&module.name)
            .with_input(source)
            .after(producer),
        );
        plan.objects.push(object);
    }
}
