//! Top-level build failure.

use ub_diagnostic::{AggregateError, Diagnostic, ErrorCode};

use crate::cache::CacheError;
use crate::image::ImageError;
use crate::process::ProcessError;

/// Why a build did not produce its outputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// One or more phases reported errors.
    #[error("{0}")]
    Diagnostics(#[from] AggregateError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{0}")]
    Image(#[from] ImageError),
}

impl BuildError {
    /// Every diagnostic of the failure, each with its stable code.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            BuildError::Diagnostics(error) => error.diagnostics,
            BuildError::Cache(error) => vec![error.to_diagnostic()],
            BuildError::Process(error) => vec![error.to_diagnostic()],
            BuildError::Image(error) => vec![image_diagnostic(&error)],
        }
    }
}

impl From<Diagnostic> for BuildError {
    fn from(diagnostic: Diagnostic) -> Self {
        BuildError::Diagnostics(AggregateError::single(diagnostic))
    }
}

impl From<BuildError> for AggregateError {
    fn from(error: BuildError) -> Self {
        AggregateError {
            diagnostics: error.into_diagnostics(),
        }
    }
}

fn image_diagnostic(error: &ImageError) -> Diagnostic {
    Diagnostic::error(ErrorCode::E2009)
        .with_message(format!("Error while loading modules: {error}"))
}
