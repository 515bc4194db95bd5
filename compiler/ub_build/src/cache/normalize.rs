use std::path::Path;

use crate::image::{ModuleImage, MODULE_EXTENSION};

/// Rewrites file contents before comparison so that fields which change
/// on every rebuild do not count as changes.
pub trait ContentNormalizer: Send + Sync {
    /// Normalized bytes, or `None` when this normalizer does not apply.
    fn normalize(&self, path: &Path, bytes: &[u8]) -> Option<Vec<u8>>;
}

/// Clears the build identifier in module images.
///
/// Files that fail to decode are compared raw.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleHeaderNormalizer;

impl ContentNormalizer for ModuleHeaderNormalizer {
    fn normalize(&self, path: &Path, bytes: &[u8]) -> Option<Vec<u8>> {
        if path.extension().and_then(|e| e.to_str()) != Some(MODULE_EXTENSION) {
            return None;
        }
        ModuleImage::normalized_bytes(bytes, path).ok()
    }
}
