//! Multi-architecture native build orchestration.
//!
//! Given a root module and a target platform, this crate computes the
//! module closure, trims it, compiles every module ahead of time for each
//! architecture, generates and compiles the glue code, links one native
//! executable per build half, merges the halves into a universal binary
//! and produces the post-link artifacts.
//!
//! Every step is gated by a content-based cache ([`cache::CacheGate`]), so
//! a rebuild with unchanged inputs runs no tools at all.
//!
//! # Debug Environment Variables
//!
//! - `RUST_LOG=ub_build=debug`: phase boundaries and every cache decision.
//! - `RUST_LOG=ub_build::cache=trace`: why each stamp did or did not match.
//!
//! # Key Types
//!
//! - [`BuildConfiguration`](config::BuildConfiguration): validated settings
//! - [`Application`](pipeline::Application): runs the whole build
//! - [`ToolRunner`](toolchain::ToolRunner): seam to the external tools
//! - [`TaskGraph`](tasks::TaskGraph): per-architecture compile steps

pub mod cache;
pub mod config;
pub mod error;
pub mod flags;
pub mod glue;
pub mod half;
pub mod hash;
pub mod image;
pub mod link;
pub mod merge;
pub mod module;
pub mod pipeline;
pub mod postlink;
pub mod process;
pub mod resolve;
pub mod tasks;
pub mod toolchain;
pub mod trim;

#[cfg(test)]
mod test_util;

pub use cache::{CacheError, CacheGate};
pub use config::{Abi, BitcodeMode, BuildConfiguration, BuildConfigurationBuilder, BuildTarget, Platform, Version};
pub use error::BuildError;
pub use merge::DedupStrategy;
pub use pipeline::{Application, BuildReport, HalfReport};
pub use toolchain::{SystemToolchain, Tool, ToolInvocation, ToolRunner};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for log output.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (such as
/// `"ub_build=debug"`) is used, and without either nothing is installed.
/// Safe to call multiple times.
pub fn init_tracing(default_directive: Option<&str>) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if let Some(directive) = default_directive {
            EnvFilter::new(directive)
        } else {
            return;
        };
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    });
}
