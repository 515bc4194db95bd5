use std::fs;

use pretty_assertions::assert_eq;
use ub_build::link::LinkOutcome;
use ub_build::postlink::StepOutcome;
use ub_build::{Application, Tool};
use ub_diagnostic::{ErrorCode, Severity};

use crate::common::{count_args, FakeToolchain, Fixture};

#[test]
fn dual_device_build() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "armv7,arm64").build().unwrap();
    let tools = FakeToolchain::new();

    let report = Application::new(&config, &tools).build().unwrap();

    // Two modules for each of two architectures.
    let aot = tools.calls_of(Tool::Aot);
    assert_eq!(aot.len(), 4);
    for arch in ["armv7", "arm64"] {
        let compiled: Vec<&String> = aot
            .iter()
            .filter(|c| c.args[0].contains(&format!("mtriple={arch}-apple-ios")))
            .map(|c| c.args.last().unwrap())
            .collect();
        assert_eq!(compiled.len(), 2, "{arch}");
    }

    let links = tools.links();
    assert_eq!(links.len(), 2);
    for link in &links {
        assert_eq!(count_args(&link.args, &["-framework", "Foo"]), 1);
        assert_eq!(count_args(&link.args, &["-weak_framework", "Bar"]), 1);
        assert_eq!(count_args(&link.args, &["-u", "_app_startup"]), 1);
        assert!(link.args.contains(&"-Wl,-pie".to_string()));
    }
    assert_eq!(tools.count(Tool::Lipo), 1);
    assert_eq!(tools.count(Tool::Strip), 1);
    assert_eq!(tools.count(Tool::Dsymutil), 1);

    assert_eq!(report.halves.len(), 2);
    assert!(report.halves.iter().all(|h| h.link == LinkOutcome::Linked));
    assert_eq!(report.strip, StepOutcome::Ran);
    assert!(fx.path("out/App").is_file());
    assert!(fx.path("out/App.dSYM/Contents/Resources/DWARF").is_dir());
    assert!(fx.path("out/App.mSYM/App/App.msym").is_file());
    assert!(fx.path("out/modules-64/App.mod").is_file());
    assert!(fx.path("out/modules-32/Lib.mod").exists());
    assert!(report.warnings.iter().all(|w| w.severity == Severity::Warning));
}

#[test]
fn merged_executable_holds_both_halves() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "armv7,arm64").with_native_strip(false).build().unwrap();
    let tools = FakeToolchain::new();

    Application::new(&config, &tools).build().unwrap();

    let merged = fs::read(fx.path("out/App")).unwrap();
    let arm64 = fs::read(fx.path("cache/64/Output/App")).unwrap();
    let armv7 = fs::read(fx.path("cache/32/Output/App")).unwrap();
    assert_eq!(merged, [arm64, armv7].concat());
    assert_eq!(tools.count(Tool::Strip), 0);
}

#[test]
fn simulator_build_skips_device_only_steps() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = ub_build::BuildConfiguration::builder(
        ub_build::Platform::Ios,
        ub_build::BuildTarget::Simulator,
        &root,
    )
    .with_abis("x86_64")
    .with_runtime(fx.path("runtime"), vec!["libruntime.a".to_string()])
    .with_cache_dir(fx.path("cache"))
    .with_output_dir(fx.path("out"))
    .build()
    .unwrap();
    let tools = FakeToolchain::new();

    let report = Application::new(&config, &tools).build().unwrap();

    assert_eq!(report.dsym, StepOutcome::Disabled);
    assert_eq!(tools.count(Tool::Strip), 0);
    assert_eq!(tools.count(Tool::Dsymutil), 0);
    assert_eq!(tools.count(Tool::Lipo), 0);
    let link = &tools.links()[0];
    assert!(link.args.iter().any(|a| a.starts_with("-mios-simulator-version-min=")));
    assert_eq!(count_args(&link.args, &["-arch", "x86_64"]), 1);
    assert!(fx.path("out/App").is_file());
    assert!(!fx.path("out/App.mSYM").exists());
}

#[test]
fn link_failure_is_classified() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx
        .builder(&root, "arm64")
        .with_user_linker_flags("-lmissing")
        .build()
        .unwrap();
    let tools = FakeToolchain::new();
    tools.fail_when(
        Tool::Compiler,
        "-lmissing",
        "Undefined symbols for architecture arm64:\n  \"_app_startup\", referenced from:\n      _main in main.arm64.o\nld: symbol(s) not found for architecture arm64\nclang: error: linker command failed with exit code 1 (use -v to see invocation)\n",
    );

    let error = Application::new(&config, &tools).build().unwrap_err();

    let codes: Vec<ErrorCode> = error.into_diagnostics().iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![ErrorCode::E5214, ErrorCode::E5201, ErrorCode::E5202]);
    assert!(!fx.path("out/App").exists());
}

#[test]
fn aot_restrictions_name_every_method() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").build().unwrap();
    let tools = FakeToolchain::new();
    tools.fail_when(
        Tool::Aot,
        "Lib.mod",
        "AOT restriction: Method 'Lib.Native:Callback' must be static since it is decorated with [MonoPInvokeCallback].\n\
         AOT restriction: Method 'Lib.Native:Other' must be static since it is decorated with [MonoPInvokeCallback].\n",
    );

    let error = Application::new(&config, &tools).build().unwrap_err();

    let diagnostics = error.into_diagnostics();
    let restrictions: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.code == ErrorCode::E3002)
        .collect();
    assert_eq!(restrictions.len(), 2);
    assert!(restrictions[0].message.contains("Lib.Native:Callback"));
    assert!(restrictions[0].notes.iter().any(|n| n == "architecture: arm64"));
    assert_eq!(tools.links().len(), 0);
}
