use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use ub_build::{Application, Tool};

use crate::common::{FakeToolchain, Fixture};

const TOOLS: [Tool; 5] = [Tool::Aot, Tool::Compiler, Tool::Lipo, Tool::Strip, Tool::Dsymutil];

/// Relative paths of every file below `dir`, sorted.
fn listing(dir: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, files);
            } else {
                files.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut files = Vec::new();
    walk(dir, dir, &mut files);
    files.sort();
    files
}

/// Build the standard application with `jobs` workers; returns per-tool
/// invocation counts and the output listing.
fn build_with_jobs(abis: &str, jobs: usize) -> (Vec<usize>, Vec<PathBuf>) {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, abis).with_jobs(jobs).build().unwrap();
    let tools = FakeToolchain::new();
    Application::new(&config, &tools).build().unwrap();
    let counts = TOOLS.iter().map(|&tool| tools.count(tool)).collect();
    (counts, listing(&fx.path("out")))
}

#[test]
fn worker_count_does_not_change_the_result() {
    let sequential = build_with_jobs("armv7,arm64", 1);
    let parallel = build_with_jobs("armv7,arm64", 8);

    assert_eq!(sequential, parallel);
}

#[test]
fn parallel_rebuild_is_byte_identical() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let tools = FakeToolchain::new();
    let config = fx.builder(&root, "armv7,arm64").with_jobs(1).build().unwrap();
    Application::new(&config, &tools).build().unwrap();
    let files = listing(&fx.path("out"));
    let sequential: Vec<Vec<u8>> = files
        .iter()
        .map(|f| std::fs::read(fx.path("out").join(f)).unwrap())
        .collect();

    let config = fx
        .builder(&root, "armv7,arm64")
        .with_jobs(8)
        .with_force(true)
        .build()
        .unwrap();
    tools.clear();
    Application::new(&config, &tools).build().unwrap();

    assert_eq!(tools.count(Tool::Aot), 4);
    assert_eq!(listing(&fx.path("out")), files);
    for (file, before) in files.iter().zip(&sequential) {
        assert_eq!(&std::fs::read(fx.path("out").join(file)).unwrap(), before, "{}", file.display());
    }
}

#[test]
fn single_worker_runs_one_tool_at_a_time() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").with_jobs(1).build().unwrap();
    let tools = FakeToolchain::new().with_delay(Duration::from_millis(5));

    Application::new(&config, &tools).build().unwrap();

    assert_eq!(tools.max_concurrency(), 1);
}

#[test]
fn concurrency_is_bounded_by_jobs() {
    let fx = Fixture::new();
    let root = fx.standard_app();
    let config = fx.builder(&root, "arm64").with_jobs(2).build().unwrap();
    let tools = FakeToolchain::new().with_delay(Duration::from_millis(20));

    Application::new(&config, &tools).build().unwrap();

    assert!(tools.max_concurrency() <= 2, "{}", tools.max_concurrency());
    assert_eq!(tools.count(Tool::Aot), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn any_worker_count_matches_sequential(jobs in 2usize..=8) {
        let sequential = build_with_jobs("arm64", 1);
        let parallel = build_with_jobs("arm64", jobs);
        prop_assert_eq!(sequential, parallel);
    }
}
