use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;
use crate::config::{BuildTarget, Platform};
use crate::hash::ContentHash;
use crate::image::{ImageReader, ModuleImage};

struct Fixture {
    dir: TempDir,
    config: BuildConfiguration,
    layout: HalfLayout,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = BuildConfiguration::builder(Platform::Ios, BuildTarget::Device, dir.path().join("src/App.mod"))
            .with_abis("arm64")
            .with_cache_dir(dir.path().join("cache"))
            .with_output_dir(dir.path().join("out"))
            .build()
            .unwrap();
        let layout = HalfLayout::new(&config, config.halves()[0].clone());
        fs::create_dir_all(dir.path().join("src")).unwrap();
        Fixture { dir, config, layout }
    }

    fn cache(&self) -> CacheGate {
        CacheGate::open(self.dir.path().join("cache"), ContentHash::new(1), false)
            .unwrap()
            .0
    }

    fn write(&self, image: &ModuleImage) -> PathBuf {
        let path = self.dir.path().join("src").join(format!("{}.mod", image.name()));
        image.write_to(&path).unwrap();
        path
    }

    fn modules(&self, images: &[ModuleImage]) -> ModuleSet {
        let mut set = ModuleSet::new();
        for image in images {
            let path = self.write(image);
            set.insert(Module::new(path, image.clone(), false)).unwrap();
        }
        set
    }
}

/// Drops `Unused.mod` and adds a module the closure never named.
struct RewritingTrimmer {
    extra: PathBuf,
    calls: AtomicUsize,
}

impl Trimmer for RewritingTrimmer {
    fn name(&self) -> &str {
        "rewriting"
    }

    fn trim(&self, modules: &ModuleSet, output_dir: &Path) -> Result<Vec<PathBuf>, AggregateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut produced = Vec::new();
        for module in modules.iter().filter(|m| m.name != "Unused") {
            fs::copy(&module.path, output_dir.join(module.file_name())).unwrap();
            produced.push(module.path.clone());
        }
        fs::copy(&self.extra, output_dir.join(file_name(&self.extra))).unwrap();
        produced.push(self.extra.clone());
        Ok(produced)
    }
}

/// Base file names of a set, sorted.
fn names(set: &ModuleSet) -> Vec<String> {
    let mut names: Vec<String> = set.iter().map(Module::file_name).collect();
    names.sort();
    names
}

fn app() -> ModuleImage {
    ModuleImage::new("App")
        .with_reference("Lib")
        .with_entry_point("native_foo", "App.Native::Foo")
}

fn lib() -> ModuleImage {
    ModuleImage::new("Lib").with_entry_point("bar", "Lib.Interop::Bar")
}

#[test]
fn copy_trimmer_result_is_reused() {
    let fx = Fixture::new();
    let cache = fx.cache();
    let modules = fx.modules(&[app(), lib()]);
    let phase = TrimPhase::new(&fx.config, &CopyTrimmer, &ImageReader, &cache);

    let mut first = HalfOutputs::new();
    let trimmed = phase.run(&fx.layout, &modules, &mut first).unwrap();
    assert!(!first.trim_cached);
    assert_eq!(names(&trimmed), vec!["App.mod", "Lib.mod"]);
    assert!(trimmed
        .iter()
        .all(|m| m.path.starts_with(&fx.layout.pre_build_dir)));
    assert_eq!(first.required_symbols, vec!["bar", "native_foo"]);
    assert_eq!(
        cache.read_list("main/entry-points.txt").unwrap(),
        vec!["bar\tLib.Interop::Bar", "native_foo\tApp.Native::Foo"]
    );

    let mut second = HalfOutputs::new();
    let again = phase.run(&fx.layout, &modules, &mut second).unwrap();
    assert!(second.trim_cached);
    assert_eq!(names(&again), names(&trimmed));
    assert_eq!(second.required_symbols, first.required_symbols);
    assert_eq!(
        second.symbol_members.get("native_foo").map(String::as_str),
        Some("App.Native::Foo")
    );
}

#[test]
fn rebuilt_module_with_same_content_keeps_the_cache() {
    let fx = Fixture::new();
    let cache = fx.cache();
    let modules = fx.modules(&[app(), lib()]);
    let phase = TrimPhase::new(&fx.config, &CopyTrimmer, &ImageReader, &cache);
    phase.run(&fx.layout, &modules, &mut HalfOutputs::new()).unwrap();

    fx.write(&lib().with_build_id([9; 16]));
    let mut outputs = HalfOutputs::new();
    phase.run(&fx.layout, &modules, &mut outputs).unwrap();
    assert!(outputs.trim_cached);

    fx.write(&lib().with_entry_point("baz", "Lib.Interop::Baz"));
    let mut outputs = HalfOutputs::new();
    let trimmed = phase.run(&fx.layout, &modules, &mut outputs).unwrap();
    assert!(!outputs.trim_cached);
    assert!(outputs.required_symbols.contains(&"baz".to_string()));
    assert_eq!(trimmed.get("Lib.mod").unwrap().image.entry_points.len(), 2);
}

#[test]
fn removed_and_added_modules_survive_a_cache_hit() {
    let fx = Fixture::new();
    let cache = fx.cache();
    let modules = fx.modules(&[app(), lib(), ModuleImage::new("Unused")]);
    let extra_dir = fx.dir.path().join("extra");
    fs::create_dir_all(&extra_dir).unwrap();
    let extra = extra_dir.join("Extra.mod");
    ModuleImage::new("Extra").write_to(&extra).unwrap();
    let trimmer = RewritingTrimmer {
        extra,
        calls: AtomicUsize::new(0),
    };
    let phase = TrimPhase::new(&fx.config, &trimmer, &ImageReader, &cache);

    let trimmed = phase.run(&fx.layout, &modules, &mut HalfOutputs::new()).unwrap();
    assert_eq!(names(&trimmed), vec!["App.mod", "Extra.mod", "Lib.mod"]);

    let mut outputs = HalfOutputs::new();
    let cached = phase.run(&fx.layout, &modules, &mut outputs).unwrap();
    assert!(outputs.trim_cached);
    assert_eq!(trimmer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(names(&cached), vec!["App.mod", "Extra.mod", "Lib.mod"]);
    assert!(!cached.contains("Unused.mod"));
}

#[test]
fn unreadable_pre_build_copy_is_reported() {
    let fx = Fixture::new();
    let cache = fx.cache();
    let modules = fx.modules(&[app()]);
    let phase = TrimPhase::new(&fx.config, &CopyTrimmer, &ImageReader, &cache);
    phase.run(&fx.layout, &modules, &mut HalfOutputs::new()).unwrap();

    fs::write(fx.layout.pre_build_dir.join("App.mod"), b"garbage").unwrap();
    // The damaged copy fails the gate, so the module is copied again.
    let trimmed = phase.run(&fx.layout, &modules, &mut HalfOutputs::new()).unwrap();
    assert_eq!(trimmed.len(), 1);

    struct Failing;
    impl Trimmer for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn trim(&self, _: &ModuleSet, output_dir: &Path) -> Result<Vec<PathBuf>, AggregateError> {
            fs::write(output_dir.join("App.mod"), b"garbage").unwrap();
            Ok(vec![PathBuf::from("/src/App.mod")])
        }
    }
    let error = TrimPhase::new(&fx.config, &Failing, &ImageReader, &cache)
        .run(&fx.layout, &modules, &mut HalfOutputs::new())
        .unwrap_err();
    assert!(error.contains(ErrorCode::E2009));
}
