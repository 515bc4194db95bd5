//! Content-based cache gate.
//!
//! Every phase asks the gate whether its outputs are still valid for its
//! current inputs. The answer never depends on timestamps: the gate keeps
//! a *stamp* per phase key with the content hash of each input and output
//! from the last successful run, and compares against those.
//!
//! Comparison goes through [`ContentNormalizer`]s so that fields which
//! change on every rebuild (the module image's build identifier) do not
//! defeat the cache.

mod normalize;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ub_diagnostic::{Diagnostic, ErrorCode};

pub use normalize::{ContentNormalizer, ModuleHeaderNormalizer};

use crate::hash::{hash_bytes, hash_string, ContentHash};

/// Bumped whenever the stamp layout or a phase's output layout changes.
pub const CACHE_VERSION: &str = "ubuild-cache-1";

const VERSION_FILE: &str = "version";
const STAMP_DIR: &str = "stamps";

/// Error during cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("could not read '{}': {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("could not write '{}': {message}", path.display())]
    Write { path: PathBuf, message: String },
}

impl CacheError {
    pub(crate) fn read(path: &Path, e: &io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, e: &io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let code = match self {
            Self::Read { .. } => ErrorCode::E1001,
            Self::Write { .. } => ErrorCode::E1002,
        };
        Diagnostic::error(code).with_message(self.to_string())
    }
}

impl From<CacheError> for Diagnostic {
    fn from(e: CacheError) -> Self {
        e.to_diagnostic()
    }
}

/// What a phase consumed and produced on its last successful run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct Stamp {
    key: String,
    fingerprint: String,
    inputs: Vec<(PathBuf, ContentHash)>,
    outputs: Vec<(PathBuf, ContentHash)>,
}

/// Decides whether a phase may skip its work.
pub struct CacheGate {
    dir: PathBuf,
    version_line: String,
    normalizers: Vec<Arc<dyn ContentNormalizer>>,
}

impl fmt::Debug for CacheGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheGate")
            .field("dir", &self.dir)
            .field("normalizers", &self.normalizers.len())
            .finish()
    }
}

impl CacheGate {
    /// Open the cache in `dir` for a configuration fingerprint.
    ///
    /// A cache written by another tool version or another configuration
    /// is wiped (reported as a warning). `force` always wipes it.
    pub fn open(
        dir: impl Into<PathBuf>,
        fingerprint: ContentHash,
        force: bool,
    ) -> Result<(Self, Option<Diagnostic>), CacheError> {
        let dir = dir.into();
        let gate = Self {
            version_line: format!("{CACHE_VERSION} {fingerprint}"),
            dir,
            normalizers: vec![Arc::new(ModuleHeaderNormalizer)],
        };

        let version_path = gate.dir.join(VERSION_FILE);
        let mut warning = None;
        if gate.dir.exists() {
            let current = fs::read_to_string(&version_path).ok();
            let valid = current.as_deref().map(str::trim) == Some(gate.version_line.as_str());
            if force || !valid {
                if !force && current.is_some() {
                    warning = Some(Diagnostic::warning(ErrorCode::E1003).with_message(format!(
                        "The build cache in '{}' was created by a different tool version or configuration and has been cleared",
                        gate.dir.display()
                    )));
                }
                tracing::debug!(dir = %gate.dir.display(), force, "clearing build cache");
                fs::remove_dir_all(&gate.dir).map_err(|e| CacheError::write(&gate.dir, &e))?;
            }
        }
        fs::create_dir_all(gate.dir.join(STAMP_DIR))
            .map_err(|e| CacheError::write(&gate.dir, &e))?;
        Ok((gate, warning))
    }

    /// Register an additional normalizer, consulted before the built-in ones.
    ///
    /// The last one registered is consulted first.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Arc<dyn ContentNormalizer>) -> Self {
        self.normalizers.insert(0, normalizer);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mark the cache valid. Written last so an interrupted build leaves a
    /// cache that the next run discards.
    pub fn finish(&self) -> Result<(), CacheError> {
        let path = self.dir.join(VERSION_FILE);
        fs::write(&path, format!("{}\n", self.version_line)).map_err(|e| CacheError::write(&path, &e))
    }

    /// Normalized content of a file.
    pub fn normalized_content(&self, path: &Path) -> Result<Vec<u8>, CacheError> {
        let bytes = fs::read(path).map_err(|e| CacheError::read(path, &e))?;
        for normalizer in &self.normalizers {
            if let Some(normalized) = normalizer.normalize(path, &bytes) {
                return Ok(normalized);
            }
        }
        Ok(bytes)
    }

    /// Hash of a file's normalized content.
    pub fn content_hash(&self, path: &Path) -> Result<ContentHash, CacheError> {
        Ok(hash_bytes(&self.normalized_content(path)?))
    }

    /// Whether two files are equal after normalization.
    ///
    /// The same equality decides cache freshness and module deduplication.
    pub fn compare_files(&self, a: &Path, b: &Path) -> Result<bool, CacheError> {
        Ok(self.normalized_content(a)? == self.normalized_content(b)?)
    }

    fn stamp_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(STAMP_DIR)
            .join(format!("{}.stamp", hash_string(key).to_hex()))
    }

    fn load_stamp(&self, key: &str) -> Option<Stamp> {
        let bytes = fs::read(self.stamp_path(key)).ok()?;
        let stamp: Stamp = bincode::deserialize(&bytes).ok()?;
        (stamp.key == key).then_some(stamp)
    }

    /// Whether the phase `key` can be skipped.
    ///
    /// True only if the last successful run recorded exactly these inputs
    /// with the same contents, the same command fingerprint, and every
    /// output still exists with the content it had then.
    pub fn is_fresh(&self, key: &str, inputs: &[PathBuf], outputs: &[PathBuf], fingerprint: &str) -> bool {
        let Some(stamp) = self.load_stamp(key) else {
            tracing::trace!(key, "no stamp");
            return false;
        };
        if stamp.fingerprint != fingerprint {
            tracing::debug!(key, "command changed");
            return false;
        }
        let mut wanted_inputs = inputs.to_vec();
        wanted_inputs.sort();
        wanted_inputs.dedup();
        let mut wanted_outputs = outputs.to_vec();
        wanted_outputs.sort();
        wanted_outputs.dedup();
        if stamp.inputs.len() != wanted_inputs.len()
            || stamp.outputs.len() != wanted_outputs.len()
            || stamp.inputs.iter().zip(&wanted_inputs).any(|((p, _), w)| p != w)
            || stamp.outputs.iter().zip(&wanted_outputs).any(|((p, _), w)| p != w)
        {
            tracing::debug!(key, "input or output set changed");
            return false;
        }
        for (path, hash) in stamp.inputs.iter().chain(&stamp.outputs) {
            match self.content_hash(path) {
                Ok(current) if current == *hash => {}
                _ => {
                    tracing::debug!(key, path = %path.display(), "content changed");
                    return false;
                }
            }
        }
        tracing::debug!(key, "up-to-date");
        true
    }

    /// Record a successful run of phase `key`.
    pub fn record(
        &self,
        key: &str,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
        fingerprint: &str,
    ) -> Result<(), CacheError> {
        let hash_all = |paths: &[PathBuf]| -> Result<Vec<(PathBuf, ContentHash)>, CacheError> {
            let mut sorted = paths.to_vec();
            sorted.sort();
            sorted.dedup();
            sorted
                .into_iter()
                .map(|p| {
                    let h = self.content_hash(&p)?;
                    Ok((p, h))
                })
                .collect()
        };
        let stamp = Stamp {
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            inputs: hash_all(inputs)?,
            outputs: hash_all(outputs)?,
        };
        let path = self.stamp_path(key);
        let bytes = bincode::serialize(&stamp).map_err(|e| CacheError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("stamp.tmp");
        fs::write(&tmp, bytes).map_err(|e| CacheError::write(&tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| CacheError::write(&path, &e))
    }

    /// Forget phase `key`; its next check is a miss.
    pub fn invalidate(&self, key: &str) {
        let _ = fs::remove_file(self.stamp_path(key));
    }

    /// Copy `src` to `dst` unless `dst` already has identical bytes.
    ///
    /// Returns whether a copy happened.
    pub fn update_file(&self, src: &Path, dst: &Path) -> Result<bool, CacheError> {
        let bytes = fs::read(src).map_err(|e| CacheError::read(src, &e))?;
        write_if_changed(dst, &bytes).map_err(|e| CacheError::write(dst, &e))
    }

    /// Write a line-oriented list file inside the cache.
    pub fn write_list(&self, name: &str, lines: &[String]) -> Result<(), CacheError> {
        let path = self.dir.join(name);
        let mut text = lines.join("\n");
        text.push('\n');
        write_if_changed(&path, text.as_bytes())
            .map(|_| ())
            .map_err(|e| CacheError::write(&path, &e))
    }

    /// Read a list written by [`Self::write_list`].
    pub fn read_list(&self, name: &str) -> Option<Vec<String>> {
        let text = fs::read_to_string(self.dir.join(name)).ok()?;
        Some(
            text.lines()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Write `bytes` to `path` unless it already holds exactly those bytes.
///
/// Leaves an unchanged destination untouched. Returns whether it wrote.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == bytes {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // A symlinked destination must not write through to its target.
    if fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(path)?;
    }
    fs::write(path, bytes)?;
    Ok(true)
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
