//! Combining the outputs of the two halves of a dual build.
//!
//! Per-architecture executables and libraries are merged into universal
//! binaries with the merge tool. Managed outputs that come out identical
//! in both halves are deduplicated on disk (see [`dedup`]).

mod dedup;

pub use dedup::{relative_path, DedupStats, Deduplicator};

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ub_diagnostic::{Diagnostic, ErrorCode};

use crate::cache::{CacheError, CacheGate};
use crate::image::MODULE_EXTENSION;
use crate::toolchain::{Tool, ToolInvocation, ToolRunner};

/// How an identical second copy of a file is replaced.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DedupStrategy {
    /// Relative symbolic link to the first copy; falls back to a copy
    /// when the file system refuses the link.
    #[default]
    Symlink,
    /// Hard link to the first copy; falls back to a copy.
    HardLink,
    /// Keep both physical copies.
    Copy,
}

impl DedupStrategy {
    pub fn name(self) -> &'static str {
        match self {
            DedupStrategy::Symlink => "symlink",
            DedupStrategy::HardLink => "hardlink",
            DedupStrategy::Copy => "copy",
        }
    }
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "symlink" => Ok(DedupStrategy::Symlink),
            "hardlink" => Ok(DedupStrategy::HardLink),
            "copy" => Ok(DedupStrategy::Copy),
            _ => Err(format!("unknown dedup strategy '{s}'")),
        }
    }
}

/// Whether a merge ran the tool or reused its previous output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Copied,
    UpToDate,
}

/// Merge per-architecture binaries into one universal binary.
///
/// Skipped when the output is up to date with the same inputs.
pub fn lipo(
    runner: &dyn ToolRunner,
    cache: &CacheGate,
    inputs: &[PathBuf],
    output: &Path,
    timeout: Duration,
) -> Result<MergeOutcome, Diagnostic> {
    let mut invocation = ToolInvocation::new(Tool::Lipo);
    for input in inputs {
        invocation = invocation.with_path(input);
    }
    let invocation = invocation
        .with_arg("-create")
        .with_arg("-output")
        .with_path(output);

    let key = format!("lipo:{}", output.display());
    let fingerprint = invocation.fingerprint_text();
    let outputs = [output.to_path_buf()];
    if cache.is_fresh(&key, inputs, &outputs, &fingerprint) {
        tracing::debug!(target = %output.display(), "target is up-to-date");
        return Ok(MergeOutcome::UpToDate);
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| CacheError::write(parent, &e).to_diagnostic())?;
    }
    tracing::info!(output = %output.display(), inputs = inputs.len(), "merging architectures");
    let result = runner
        .run(&invocation, timeout)
        .map_err(|e| e.to_diagnostic())?;
    if !result.success() {
        let mut diagnostic = Diagnostic::error(ErrorCode::E5301).with_message(format!(
            "Failed to create the universal binary '{}'",
            output.display()
        ));
        if !result.output.trim().is_empty() {
            diagnostic = diagnostic.with_note(result.output.trim().to_string());
        }
        return Err(diagnostic);
    }
    cache.record(&key, inputs, &outputs, &fingerprint)?;
    Ok(MergeOutcome::Merged)
}

/// Final name of a per-architecture library: `libfoo.armv7.dylib` ships
/// as `libfoo.dylib`.
pub fn fat_library_name(library: &Path) -> String {
    let file = crate::module::file_name(library);
    let mut parts: Vec<&str> = file.split('.').collect();
    if parts.len() >= 3 {
        parts.remove(parts.len() - 2);
    }
    parts.join(".")
}

/// Group libraries shipped by the halves by their final name.
pub fn group_fat_libraries(shipped: &[Vec<PathBuf>]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for half in shipped {
        for library in half {
            let sources = groups.entry(fat_library_name(library)).or_default();
            if !sources.contains(library) {
                sources.push(library.clone());
            }
        }
    }
    groups
}

/// Produce one universal library per final name in `output_dir`.
///
/// A library shipped by a single half is copied as it is.
pub fn build_fat_libraries(
    runner: &dyn ToolRunner,
    cache: &CacheGate,
    shipped: &[Vec<PathBuf>],
    output_dir: &Path,
    timeout: Duration,
) -> Result<Vec<PathBuf>, Diagnostic> {
    let mut produced = Vec::new();
    for (name, sources) in group_fat_libraries(shipped) {
        let target = output_dir.join(&name);
        match sources.as_slice() {
            [single] => {
                cache.update_file(single, &target)?;
            }
            _ => {
                lipo(runner, cache, &sources, &target, timeout)?;
            }
        }
        produced.push(target);
    }
    Ok(produced)
}

/// Make identical modules in two build directories byte-identical.
///
/// Modules equal apart from their build identifier get the first copy
/// written over the second, so that both ahead-of-time compiles see the
/// same input. Returns how many files were rewritten.
pub fn align_identical_modules(
    cache: &CacheGate,
    first_dir: &Path,
    second_dir: &Path,
) -> Result<usize, CacheError> {
    let entries = match fs::read_dir(first_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };
    let mut first_modules: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == MODULE_EXTENSION))
        .collect();
    first_modules.sort();

    let mut aligned = 0;
    for first in first_modules {
        let second = second_dir.join(crate::module::file_name(&first));
        if !second.is_file() || !cache.compare_files(&first, &second)? {
            continue;
        }
        if cache.update_file(&first, &second)? {
            tracing::debug!(first = %first.display(), second = %second.display(), "modules found to be identical");
            aligned += 1;
        }
    }
    Ok(aligned)
}
