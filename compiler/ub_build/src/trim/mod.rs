//! Managed trim phase and its cache.
//!
//! A [`Trimmer`] turns the resolved module set of a half into the modules
//! that are actually built, written into the half's pre-build directory.
//! What it does to the modules is its own business; this module only
//! decides whether the previous result can be reused.
//!
//! Two lists persist the result between runs: `linked-modules.txt` holds
//! the source path of every module the trimmer produced, and
//! `entry-points.txt` the native symbols they require. On a hit, modules
//! the trimmer removed last time are dropped from the set and modules it
//! added are loaded back from the pre-build directory.

use std::fs;
use std::path::{Path, PathBuf};

use ub_diagnostic::{AggregateError, Diagnostic, DiagnosticBag, ErrorCode};

use crate::cache::{write_if_changed, CacheError, CacheGate};
use crate::config::BuildConfiguration;
use crate::half::{HalfLayout, HalfOutputs};
use crate::image::{EntryPoint, ModuleReader};
use crate::module::{file_name, Module, ModuleSet};

pub const LINKED_MODULES_LIST: &str = "linked-modules.txt";
pub const ENTRY_POINTS_LIST: &str = "entry-points.txt";

/// Rewrites a module closure into a directory.
pub trait Trimmer: Send + Sync {
    /// Short name; part of the cache fingerprint.
    fn name(&self) -> &str;

    /// Write the trimmed form of `modules` into `output_dir`, one file per
    /// module named after its source.
    ///
    /// Returns the source path of every module written, including modules
    /// the trimmer added. Modules left out of the result were removed.
    fn trim(&self, modules: &ModuleSet, output_dir: &Path) -> Result<Vec<PathBuf>, AggregateError>;
}

/// Keeps every module unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyTrimmer;

impl Trimmer for CopyTrimmer {
    fn name(&self) -> &str {
        "copy"
    }

    fn trim(&self, modules: &ModuleSet, output_dir: &Path) -> Result<Vec<PathBuf>, AggregateError> {
        let mut bag = DiagnosticBag::new();
        let mut kept = Vec::with_capacity(modules.len());
        for module in modules {
            let target = output_dir.join(module.file_name());
            let copied = fs::read(&module.path).and_then(|bytes| write_if_changed(&target, &bytes));
            match copied {
                Ok(_) => kept.push(module.path.clone()),
                Err(e) => bag.error(
                    ErrorCode::E1009,
                    format!(
                        "Could not copy '{}' to '{}': {e}",
                        module.path.display(),
                        target.display()
                    ),
                ),
            }
        }
        bag.into_result()?;
        Ok(kept)
    }
}

/// Runs a [`Trimmer`] behind the cache gate.
pub struct TrimPhase<'a> {
    config: &'a BuildConfiguration,
    trimmer: &'a dyn Trimmer,
    reader: &'a dyn ModuleReader,
    cache: &'a CacheGate,
}

impl<'a> TrimPhase<'a> {
    pub fn new(
        config: &'a BuildConfiguration,
        trimmer: &'a dyn Trimmer,
        reader: &'a dyn ModuleReader,
        cache: &'a CacheGate,
    ) -> Self {
        TrimPhase {
            config,
            trimmer,
            reader,
            cache,
        }
    }

    /// Trim `modules` into the half's pre-build directory.
    ///
    /// The returned set points at the pre-build copies. The entry points of
    /// the result are added to `outputs`.
    pub fn run(
        &self,
        layout: &HalfLayout,
        modules: &ModuleSet,
        outputs: &mut HalfOutputs,
    ) -> Result<ModuleSet, AggregateError> {
        let key = format!("trim:{}", layout.key());
        let linked_list = format!("{}/{LINKED_MODULES_LIST}", layout.key());
        let entry_list = format!("{}/{ENTRY_POINTS_LIST}", layout.key());
        let fingerprint = format!("trim\0{}", self.trimmer.name());

        if let Some(cached) = self.cache.read_list(&linked_list) {
            let cached: Vec<PathBuf> = cached.into_iter().map(PathBuf::from).collect();
            let inputs = gate_inputs(modules, &cached);
            let expected = targets(layout, &cached);
            if self.cache.is_fresh(&key, &inputs, &expected, &fingerprint) {
                let trimmed = self.reload(layout, modules, &cached)?;
                let entry_points = self
                    .cache
                    .read_list(&entry_list)
                    .unwrap_or_default()
                    .iter()
                    .map(String::as_str)
                    .filter_map(parse_entry_point)
                    .collect::<Vec<_>>();
                outputs.trim_cached = true;
                outputs.add_entry_points(&entry_points);
                tracing::info!(half = layout.key(), modules = trimmed.len(), "cached modules reloaded");
                return Ok(trimmed);
            }
        }
        outputs.trim_cached = false;

        fs::create_dir_all(&layout.pre_build_dir)
            .map_err(|e| CacheError::write(&layout.pre_build_dir, &e).to_diagnostic())?;
        tracing::info!(half = layout.key(), trimmer = self.trimmer.name(), modules = modules.len(), "trimming modules");
        let produced = self.trimmer.trim(modules, &layout.pre_build_dir)?;
        let trimmed = self.reload(layout, modules, &produced)?;

        let mut entry_points: Vec<EntryPoint> = trimmed
            .iter()
            .flat_map(|m| m.image.entry_points.iter().cloned())
            .collect();
        entry_points.sort();
        entry_points.dedup();

        let write = |name: &str, lines: &[String]| {
            self.cache
                .write_list(name, lines)
                .map_err(|e| AggregateError::single(e.to_diagnostic()))
        };
        write(&linked_list, &produced.iter().map(|p| p.display().to_string()).collect::<Vec<_>>())?;
        write(
            &entry_list,
            &entry_points
                .iter()
                .map(|e| format!("{}\t{}", e.symbol, e.member))
                .collect::<Vec<_>>(),
        )?;
        self.cache
            .record(
                &key,
                &gate_inputs(modules, &produced),
                &targets(layout, &produced),
                &fingerprint,
            )
            .map_err(|e| e.to_diagnostic())?;

        outputs.add_entry_points(&entry_points);
        Ok(trimmed)
    }

    /// Load the pre-build copy of every module in `sources`.
    ///
    /// Modules of `modules` missing from `sources` were removed by the
    /// trimmer; sources unknown to `modules` were added by it.
    fn reload(
        &self,
        layout: &HalfLayout,
        modules: &ModuleSet,
        sources: &[PathBuf],
    ) -> Result<ModuleSet, AggregateError> {
        let mut bag = DiagnosticBag::new();
        let mut trimmed = ModuleSet::new();
        for source in sources {
            let name = file_name(source);
            let path = layout.pre_build_dir.join(&name);
            let is_platform = match modules.get(&name) {
                Some(original) => original.is_platform_module,
                None => {
                    tracing::debug!(module = %name, "module added by the trimmer");
                    !self.config.platform_dir.as_os_str().is_empty()
                        && source.starts_with(&self.config.platform_dir)
                }
            };
            match self.reader.read(&path) {
                Ok(image) => {
                    if let Err(diag) = trimmed.insert(Module::new(path, image, is_platform)) {
                        bag.push(diag);
                    }
                }
                Err(e) => bag.push(
                    Diagnostic::error(ErrorCode::E2009)
                        .with_message(format!("Error while loading modules: {e}")),
                ),
            }
        }
        for removed in modules.iter().filter(|m| !trimmed.contains(&m.file_name())) {
            tracing::debug!(module = %removed.name, "module removed by the trimmer");
        }
        bag.into_result()?;
        Ok(trimmed)
    }
}

/// Everything that can change the trimmer's result: the resolved modules
/// and whatever else it produced.
fn gate_inputs(modules: &ModuleSet, produced: &[PathBuf]) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = modules.iter().map(|m| m.path.clone()).collect();
    for path in produced {
        if !inputs.contains(path) {
            inputs.push(path.clone());
        }
    }
    inputs
}

fn targets(layout: &HalfLayout, sources: &[PathBuf]) -> Vec<PathBuf> {
    sources
        .iter()
        .map(|source| layout.pre_build_dir.join(file_name(source)))
        .collect()
}

fn parse_entry_point(line: &str) -> Option<EntryPoint> {
    let (symbol, member) = line.split_once('\t')?;
    Some(EntryPoint {
        symbol: symbol.to_string(),
        member: member.to_string(),
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
