use std::fs;

use pretty_assertions::assert_eq;
use ub_build::{Application, DedupStrategy};

use crate::common::{FakeToolchain, Fixture};

const MODULES: [&str; 2] = ["App.mod", "Lib.mod"];

#[cfg(unix)]
#[test]
fn identical_modules_become_symlinks() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "armv7,arm64").build().unwrap();
    let tools = FakeToolchain::new();

    let report = Application::new(&config, &tools).build().unwrap();

    let stats = report.dedup.unwrap();
    assert_eq!(stats.linked, 2);
    assert_eq!(stats.distinct, 0);
    for name in MODULES {
        let second = fx.path("out/modules-32").join(name);
        let meta = fs::symlink_metadata(&second).unwrap();
        assert!(meta.file_type().is_symlink(), "{name}");
        assert!(fs::read_link(&second).unwrap().is_relative());
        assert_eq!(
            fs::read(&second).unwrap(),
            fs::read(fx.path("out/modules-64").join(name)).unwrap()
        );
        assert!(fs::symlink_metadata(fx.path("out/modules-64").join(name))
            .unwrap()
            .is_file());
    }
}

#[cfg(unix)]
#[test]
fn links_survive_a_rebuild() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "armv7,arm64").build().unwrap();
    let tools = FakeToolchain::new();
    Application::new(&config, &tools).build().unwrap();

    let report = Application::new(&config, &tools).build().unwrap();

    let stats = report.dedup.unwrap();
    assert_eq!(stats.already_linked, 2);
    assert_eq!(stats.linked, 0);
    let second = fx.path("out/modules-32/Lib.mod");
    assert!(fs::symlink_metadata(second).unwrap().file_type().is_symlink());
}

#[cfg(unix)]
#[test]
fn hard_link_strategy_shares_the_file() {
    use std::os::unix::fs::MetadataExt;

    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx
        .builder(&root, "armv7,arm64")
        .with_dedup(DedupStrategy::HardLink)
        .build()
        .unwrap();
    let tools = FakeToolchain::new();

    let report = Application::new(&config, &tools).build().unwrap();

    assert_eq!(report.dedup.unwrap().linked, 2);
    let meta = fs::symlink_metadata(fx.path("out/modules-32/App.mod")).unwrap();
    assert!(meta.is_file());
    assert_eq!(meta.nlink(), 2);
}

#[test]
fn copy_strategy_keeps_physical_files() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx
        .builder(&root, "armv7,arm64")
        .with_dedup(DedupStrategy::Copy)
        .build()
        .unwrap();
    let tools = FakeToolchain::new();

    let report = Application::new(&config, &tools).build().unwrap();

    let stats = report.dedup.unwrap();
    assert_eq!(stats.copied, 2);
    assert_eq!(stats.linked, 0);
    for name in MODULES {
        let meta = fs::symlink_metadata(fx.path("out/modules-32").join(name)).unwrap();
        assert!(meta.is_file(), "{name}");
    }
}

#[test]
fn single_architecture_ships_one_directory() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").build().unwrap();
    let tools = FakeToolchain::new();

    let report = Application::new(&config, &tools).build().unwrap();

    assert!(report.dedup.is_none());
    assert!(fx.path("out/modules/App.mod").is_file());
    assert!(!fx.path("out/modules-32").exists());
}
