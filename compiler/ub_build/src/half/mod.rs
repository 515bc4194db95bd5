//! Per-half directory layout and result accumulator.
//!
//! A half owns everything under its architecture directory; no other
//! half writes there. [`HalfOutputs`] collects what the phases of one half
//! produce and is passed by `&mut` from phase to phase.

use std::fs;
use std::io;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use ub_diagnostic::Diagnostic;

use crate::config::{BuildConfiguration, HalfSpec};
use crate::image::EntryPoint;
use crate::tasks::TaskStats;

/// Working directories and output paths of one half.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HalfLayout {
    pub spec: HalfSpec,
    /// Root of this half's scratch space inside the cache.
    pub arch_dir: PathBuf,
    /// Trimmer output.
    pub pre_build_dir: PathBuf,
    /// Modules as fed to the AOT compiler.
    pub build_dir: PathBuf,
    pub objects_dir: PathBuf,
    /// Generated sources.
    pub glue_dir: PathBuf,
    /// Native libraries extracted from modules.
    pub native_dir: PathBuf,
    /// AOT debug data for the symbol manifest.
    pub msym_dir: PathBuf,
    /// Linked, unstripped executable of this half.
    pub executable: PathBuf,
    /// Final managed module directory.
    pub modules_dir: PathBuf,
}

impl HalfLayout {
    pub fn new(config: &BuildConfiguration, spec: HalfSpec) -> Self {
        let arch_dir = match spec.suffix {
            Some(suffix) => config.cache_dir.join(suffix),
            None => config.cache_dir.join("main"),
        };
        let build_dir = arch_dir.join("Build");
        let executable = arch_dir.join("Output").join(&config.executable_name);
        let modules_dir = match spec.suffix {
            Some(suffix) => config.output_dir.join(format!("modules-{suffix}")),
            None => config.output_dir.join("modules"),
        };
        HalfLayout {
            spec,
            pre_build_dir: arch_dir.join("PreBuild"),
            msym_dir: build_dir.join("Msym"),
            build_dir,
            objects_dir: arch_dir.join("Objects"),
            glue_dir: arch_dir.join("Glue"),
            native_dir: arch_dir.join("Native"),
            executable,
            modules_dir,
            arch_dir,
        }
    }

    /// Short key used in cache stamps and list names.
    pub fn key(&self) -> &'static str {
        self.spec.suffix.unwrap_or("main")
    }

    pub fn create_dirs(&self) -> io::Result<()> {
        for dir in [
            &self.pre_build_dir,
            &self.build_dir,
            &self.objects_dir,
            &self.glue_dir,
            &self.native_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.executable.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Everything one half produced, accumulated phase by phase.
#[derive(Clone, Debug, Default)]
pub struct HalfOutputs {
    /// Objects and archives to pass to the native link, in order.
    pub objects: Vec<PathBuf>,
    /// Per-architecture libraries that ship next to the executable.
    pub libraries_to_ship: Vec<PathBuf>,
    /// Native symbols that managed code needs kept alive.
    pub required_symbols: Vec<String>,
    /// Native symbol to the managed member that requires it.
    pub symbol_members: FxHashMap<String, String>,
    /// Functions the main stub calls before the runtime starts.
    pub registration_methods: Vec<String>,
    /// Frameworks the final link used (after catalog adjustments).
    pub frameworks: Vec<String>,
    pub weak_frameworks: Vec<String>,
    /// Whether the trim phase reused its previous result.
    pub trim_cached: bool,
    /// Whether the native link reused the previous executable.
    pub cached_executable: bool,
    pub task_stats: TaskStats,
    pub warnings: Vec<Diagnostic>,
}

impl HalfOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_with(&mut self, object: PathBuf) {
        if !self.objects.contains(&object) {
            self.objects.push(object);
        }
    }

    pub fn link_with_and_ship(&mut self, library: PathBuf) {
        if !self.libraries_to_ship.contains(&library) {
            self.libraries_to_ship.push(library);
        }
    }

    /// Record the entry points of the trimmed module set.
    pub fn add_entry_points(&mut self, entry_points: &[EntryPoint]) {
        for entry in entry_points {
            if !self.symbol_members.contains_key(&entry.symbol) {
                self.required_symbols.push(entry.symbol.clone());
                self.symbol_members
                    .insert(entry.symbol.clone(), entry.member.clone());
            }
        }
    }
}
