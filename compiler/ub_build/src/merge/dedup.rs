//! Directory deduplication between the halves of a dual build.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ub_diagnostic::{Diagnostic, ErrorCode};

use super::DedupStrategy;
use crate::cache::{CacheError, CacheGate};

/// What one deduplication pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Second copies replaced by a link.
    pub linked: usize,
    /// Identical files kept as physical copies (strategy or link failure).
    pub copied: usize,
    /// Files whose contents differ.
    pub distinct: usize,
    /// Second copies that were already links from an earlier run.
    pub already_linked: usize,
}

/// Replaces identical files in a second directory tree with links to the
/// files of a first tree.
pub struct Deduplicator<'a> {
    cache: &'a CacheGate,
    strategy: DedupStrategy,
}

impl<'a> Deduplicator<'a> {
    pub fn new(cache: &'a CacheGate, strategy: DedupStrategy) -> Self {
        Deduplicator { cache, strategy }
    }

    /// Deduplicate `second` against `first`, recursing into subdirectories.
    ///
    /// Entries only present in one tree are left alone.
    pub fn dedup_dirs(&self, first: &Path, second: &Path) -> Result<DedupStats, Diagnostic> {
        let mut stats = DedupStats::default();
        self.dedup_dir(first, second, &mut stats)
            .map_err(|e| {
                Diagnostic::error(ErrorCode::E5305).with_message(format!(
                    "Could not deduplicate '{}' and '{}': {e}",
                    first.display(),
                    second.display()
                ))
            })?;
        tracing::debug!(
            linked = stats.linked,
            copied = stats.copied,
            distinct = stats.distinct,
            "deduplicated output directories"
        );
        Ok(stats)
    }

    fn dedup_dir(&self, first: &Path, second: &Path, stats: &mut DedupStats) -> Result<(), DedupError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(first)
            .map_err(|e| DedupError::Io(first.to_path_buf(), e))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        entries.sort();

        for f1 in entries {
            let Some(name) = f1.file_name() else { continue };
            let f2 = second.join(name);
            let meta = fs::symlink_metadata(&f1).map_err(|e| DedupError::Io(f1.clone(), e))?;
            if meta.is_dir() {
                if f2.is_dir() {
                    self.dedup_dir(&f1, &f2, stats)?;
                }
            } else {
                self.dedup_file(&f1, &f2, stats)?;
            }
        }
        Ok(())
    }

    fn dedup_file(&self, f1: &Path, f2: &Path, stats: &mut DedupStats) -> Result<(), DedupError> {
        let Ok(meta) = fs::symlink_metadata(f2) else {
            return Ok(());
        };
        if meta.file_type().is_symlink() {
            // Linked by an earlier run.
            stats.already_linked += 1;
            return Ok(());
        }
        if !meta.is_file() {
            return Ok(());
        }

        if !self.cache.compare_files(f1, f2)? {
            tracing::debug!(first = %f1.display(), second = %f2.display(), "not identical; keeping both");
            stats.distinct += 1;
            return Ok(());
        }
        if self.strategy == DedupStrategy::Copy {
            stats.copied += 1;
            return Ok(());
        }

        fs::remove_file(f2).map_err(|e| DedupError::Io(f2.to_path_buf(), e))?;
        match self.link(f1, f2) {
            Ok(()) => {
                tracing::debug!(first = %f1.display(), second = %f2.display(), strategy = %self.strategy, "replaced identical file with a link");
                stats.linked += 1;
            }
            Err(e) => {
                tracing::debug!(second = %f2.display(), error = %e, "could not link; copying instead");
                fs::copy(f1, f2).map_err(|e| DedupError::Io(f2.to_path_buf(), e))?;
                stats.copied += 1;
            }
        }
        Ok(())
    }

    fn link(&self, f1: &Path, f2: &Path) -> io::Result<()> {
        match self.strategy {
            DedupStrategy::Symlink => {
                let from_dir = f2.parent().unwrap_or_else(|| Path::new(""));
                symlink_file(&relative_path(from_dir, f1)?, f2)
            }
            DedupStrategy::HardLink => fs::hard_link(f1, f2),
            DedupStrategy::Copy => fs::copy(f1, f2).map(|_| ()),
        }
    }
}

#[derive(Debug)]
enum DedupError {
    Io(PathBuf, io::Error),
    Cache(CacheError),
}

impl From<CacheError> for DedupError {
    fn from(e: CacheError) -> Self {
        DedupError::Cache(e)
    }
}

impl std::fmt::Display for DedupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupError::Io(path, e) => write!(f, "{}: {e}", path.display()),
            DedupError::Cache(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links are not supported"))
}

/// Path of `target` relative to the directory `from_dir`.
///
/// Both paths are made absolute against the current directory and
/// compared lexically, so neither needs to exist.
pub fn relative_path(from_dir: &Path, target: &Path) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let from_abs = cwd.join(from_dir);
    let to_abs = cwd.join(target);
    let from = normalize(&from_abs);
    let to = normalize(&to_abs);

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for part in &to[common..] {
        relative.push(part);
    }
    Ok(relative)
}

fn normalize(path: &Path) -> Vec<Component<'_>> {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }
    parts
}
