//! Module closure resolution.
//!
//! Starting from the root module, every directly referenced module and
//! every module reached only through a type-valued attribute argument is
//! loaded exactly once. Failures are collected and reported together
//! after the walk, so one run shows every missing reference.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use ub_diagnostic::{AggregateError, Diagnostic, DiagnosticBag, ErrorCode};

use crate::config::Platform;
use crate::image::{ModuleReader, MODULE_EXTENSION};
use crate::module::{Module, ModuleSet};

/// Maps module names to files.
#[derive(Clone, Debug)]
pub struct ModuleLocator {
    /// Directories searched in order; the root module's directory first.
    search_dirs: Vec<PathBuf>,
    platform_dir: PathBuf,
}

impl ModuleLocator {
    pub fn new(root_dir: &Path, search_dirs: &[PathBuf], platform_dir: &Path) -> Self {
        let mut dirs = vec![root_dir.to_path_buf()];
        dirs.extend(search_dirs.iter().cloned());
        if !platform_dir.as_os_str().is_empty() {
            dirs.push(platform_dir.to_path_buf());
        }
        Self {
            search_dirs: dirs,
            platform_dir: canonical(platform_dir),
        }
    }

    /// Find `<dir>/<name>.mod` in the search directories.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(format!("{name}.{MODULE_EXTENSION}")))
            .find(|candidate| candidate.is_file())
    }

    pub fn is_platform_module(&self, path: &Path) -> bool {
        !self.platform_dir.as_os_str().is_empty() && canonical(path).starts_with(&self.platform_dir)
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Computes the transitive closure of a root module.
pub struct ClosureResolver<'a> {
    locator: &'a ModuleLocator,
    reader: &'a dyn ModuleReader,
    platform: Platform,
}

impl<'a> ClosureResolver<'a> {
    pub fn new(locator: &'a ModuleLocator, reader: &'a dyn ModuleReader, platform: Platform) -> Self {
        Self {
            locator,
            reader,
            platform,
        }
    }

    /// Load the root and everything it reaches.
    ///
    /// Returns the complete set, or every problem found during the walk.
    pub fn resolve(&self, root: &Path) -> Result<ModuleSet, AggregateError> {
        let mut bag = DiagnosticBag::new();
        let mut set = ModuleSet::new();
        let mut visited: FxHashSet<PathBuf> = FxHashSet::default();
        let mut unresolved: FxHashSet<String> = FxHashSet::default();

        let mut stack: Vec<PathBuf> = Vec::new();
        if let Some(product) = self.locator.locate(self.platform.product_module()) {
            stack.push(product);
        }
        stack.push(root.to_path_buf());

        while let Some(path) = stack.pop() {
            if !visited.insert(canonical(&path)) {
                continue;
            }
            let image = match self.reader.read(&path) {
                Ok(image) => image,
                Err(e) => {
                    bag.push(Diagnostic::error(ErrorCode::E2009).with_message(format!(
                        "Error while loading modules: {e}"
                    )));
                    continue;
                }
            };
            tracing::trace!(module = image.name(), path = %path.display(), "loaded module");

            let mut edges: Vec<String> = image.references.clone();
            for name in image.attribute_references() {
                if !edges.contains(&name) {
                    edges.push(name);
                }
            }

            // Reverse so the first reference is visited first.
            for name in edges.iter().rev() {
                if let Some(other) = Platform::ALL
                    .iter()
                    .find(|p| **p != self.platform && p.product_module() == name)
                {
                    bag.push(Diagnostic::error(ErrorCode::E0034).with_message(format!(
                        "Cannot reference '{name}.{MODULE_EXTENSION}' in a {} project - it is implicitly referenced by '{}'.",
                        self.platform, image.name()
                    )).with_note(format!("'{name}' is the {other} platform module")));
                    continue;
                }
                match self.locator.locate(name) {
                    Some(found) => stack.push(found),
                    None => {
                        if unresolved.insert(name.clone()) {
                            bag.push(
                                Diagnostic::error(ErrorCode::E2002)
                                    .with_message(format!("Can not resolve reference: {name}"))
                                    .with_note(format!("referenced from '{}'", image.name())),
                            );
                        }
                    }
                }
            }

            let is_platform = self.locator.is_platform_module(&path);
            if let Err(diag) = set.insert(Module::new(path, image, is_platform)) {
                bag.push(diag);
            }
        }

        bag.into_result()?;
        tracing::debug!(count = set.len(), root = %root.display(), "resolved module closure");
        Ok(set)
    }
}
