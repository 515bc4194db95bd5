//! The `ubuild` commands.

mod build;
mod explain;

pub use build::{build_file, parse_build_options, BuildOptions};
pub use explain::explain_error;

use ub_diagnostic::Diagnostic;

/// Print diagnostics to stderr, one per entry, in the order given.
pub fn print_diagnostics<'a>(diagnostics: impl IntoIterator<Item = &'a Diagnostic>) {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}
