//! Diagnostics for the ubuild native build orchestrator.
//!
//! Every failure a build can report carries a stable [`ErrorCode`] so that
//! tooling and documentation can refer to it by number. Phases collect
//! diagnostics into a [`DiagnosticBag`] instead of failing on the first
//! problem, then raise everything at once as an [`AggregateError`].

mod bag;
mod diagnostic;
mod error_code;

pub use bag::{AggregateError, DiagnosticBag};
pub use diagnostic::{Diagnostic, Severity};
pub use error_code::ErrorCode;
