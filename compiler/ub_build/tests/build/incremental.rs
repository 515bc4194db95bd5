use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use ub_build::cache::ContentNormalizer;
use ub_build::link::LinkOutcome;
use ub_build::postlink::StepOutcome;
use ub_build::{Application, Tool};
use ub_diagnostic::ErrorCode;

use crate::common::{app, lib, FakeToolchain, Fixture};

#[test]
fn second_build_runs_no_tools() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "armv7,arm64").build().unwrap();
    let tools = FakeToolchain::new();
    Application::new(&config, &tools).build().unwrap();
    tools.clear();

    let report = Application::new(&config, &tools).build().unwrap();

    assert_eq!(tools.calls(), Vec::new());
    assert!(report.is_up_to_date());
    assert_eq!(report.strip, StepOutcome::UpToDate);
    assert_eq!(report.dsym, StepOutcome::UpToDate);
    assert_eq!(report.stats().run, 0);
    assert!(report.halves.iter().all(|h| h.trim_cached));
}

#[test]
fn new_build_id_with_same_content_runs_no_tools() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").build().unwrap();
    let tools = FakeToolchain::new();
    Application::new(&config, &tools).build().unwrap();
    tools.clear();

    fx.write_module(&lib().with_build_id([7; 16]));
    let report = Application::new(&config, &tools).build().unwrap();

    assert_eq!(tools.calls(), Vec::new());
    assert!(report.is_up_to_date());
}

#[test]
fn changed_module_relinks() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").build().unwrap();
    let tools = FakeToolchain::new();
    Application::new(&config, &tools).build().unwrap();
    let first = std::fs::read(fx.path("out/App")).unwrap();
    tools.clear();

    fx.write_module(&lib().with_code(b"lib code v2".to_vec()));
    let report = Application::new(&config, &tools).build().unwrap();

    let recompiled: Vec<String> = tools
        .calls_of(Tool::Aot)
        .iter()
        .filter_map(|c| c.args.last().cloned())
        .collect();
    assert!(recompiled.iter().any(|m| m.ends_with("Lib.mod")));
    assert_eq!(tools.links().len(), 1);
    assert_eq!(report.halves[0].link, LinkOutcome::Linked);
    assert!(!report.halves[0].trim_cached);
    assert!(!report.is_up_to_date());
    assert_ne!(std::fs::read(fx.path("out/App")).unwrap(), first);
}

#[test]
fn changed_root_recompiles_only_the_root() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "armv7,arm64").build().unwrap();
    let tools = FakeToolchain::new();
    Application::new(&config, &tools).build().unwrap();
    tools.clear();

    fx.write_module(&app().with_code(b"app code v2".to_vec()));
    Application::new(&config, &tools).build().unwrap();

    let recompiled: Vec<String> = tools
        .calls_of(Tool::Aot)
        .iter()
        .filter_map(|c| c.args.last().cloned())
        .collect();
    assert_eq!(recompiled.len(), 2);
    assert!(recompiled.iter().all(|m| m.ends_with("App.mod")), "{recompiled:?}");
    assert_eq!(tools.links().len(), 2);
}

/// Considers every version of `Lib.mod` the same.
struct FrozenLib;

impl ContentNormalizer for FrozenLib {
    fn normalize(&self, path: &Path, _bytes: &[u8]) -> Option<Vec<u8>> {
        path.file_name().is_some_and(|n| n == "Lib.mod").then(|| b"Lib".to_vec())
    }
}

#[test]
fn registered_normalizer_decides_what_changed() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").build().unwrap();
    let tools = FakeToolchain::new();
    let build = || {
        Application::new(&config, &tools)
            .with_normalizer(Arc::new(FrozenLib))
            .build()
            .unwrap()
    };
    build();
    tools.clear();

    fx.write_module(&lib().with_code(b"lib code v2".to_vec()));
    let report = build();

    assert_eq!(tools.calls(), Vec::new());
    assert!(report.is_up_to_date());
}

#[test]
fn changed_setting_clears_the_cache() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let tools = FakeToolchain::new();
    let config = fx.builder(&root, "arm64").build().unwrap();
    Application::new(&config, &tools).build().unwrap();
    tools.clear();

    let config = fx.builder(&root, "arm64").with_dead_strip(false).build().unwrap();
    let report = Application::new(&config, &tools).build().unwrap();

    assert!(report.warnings.iter().any(|w| w.code == ErrorCode::E1003));
    assert_eq!(tools.count(Tool::Aot), 2);
    assert_eq!(tools.links().len(), 1);
}

#[test]
fn failed_step_runs_again_on_the_next_build() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").build().unwrap();
    let failing = FakeToolchain::new();
    failing.fail_when(Tool::Aot, "Lib.mod", "Mono Ahead of Time compiler - compiling assembly Lib.mod\nerror\n");

    let error = Application::new(&config, &failing).build().unwrap_err();
    assert!(error
        .into_diagnostics()
        .iter()
        .any(|d| d.code == ErrorCode::E3001));

    let tools = FakeToolchain::new();
    let report = Application::new(&config, &tools).build().unwrap();

    assert!(tools
        .calls_of(Tool::Aot)
        .iter()
        .any(|c| c.args.last().is_some_and(|m| m.ends_with("Lib.mod"))));
    assert_eq!(report.halves[0].link, LinkOutcome::Linked);
    assert!(fx.path("out/App").is_file());
}
