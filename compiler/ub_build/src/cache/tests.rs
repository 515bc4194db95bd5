use std::sync::Arc;

use super::*;
use crate::image::ModuleImage;
use pretty_assertions::assert_eq;

fn open(dir: &Path) -> CacheGate {
    CacheGate::open(dir.join("cache"), ContentHash::new(1), false)
        .unwrap()
        .0
}

#[test]
fn test_fresh_after_record() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let input = tmp.path().join("in.txt");
    let output = tmp.path().join("out.o");
    fs::write(&input, "source").unwrap();
    fs::write(&output, "object").unwrap();

    let inputs = vec![input.clone()];
    let outputs = vec![output.clone()];
    assert!(!gate.is_fresh("compile", &inputs, &outputs, "cc -c"));

    gate.record("compile", &inputs, &outputs, "cc -c").unwrap();
    assert!(gate.is_fresh("compile", &inputs, &outputs, "cc -c"));
}

#[test]
fn test_content_change_invalidates_but_timestamp_does_not() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let input = tmp.path().join("in.txt");
    let output = tmp.path().join("out.o");
    fs::write(&input, "source").unwrap();
    fs::write(&output, "object").unwrap();
    let (inputs, outputs) = (vec![input.clone()], vec![output.clone()]);
    gate.record("k", &inputs, &outputs, "").unwrap();

    // Rewriting identical bytes bumps the mtime only.
    fs::write(&input, "source").unwrap();
    assert!(gate.is_fresh("k", &inputs, &outputs, ""));

    fs::write(&input, "changed").unwrap();
    assert!(!gate.is_fresh("k", &inputs, &outputs, ""));
}

#[test]
fn test_missing_or_modified_output_is_stale() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let input = tmp.path().join("in.txt");
    let output = tmp.path().join("out.o");
    fs::write(&input, "source").unwrap();
    fs::write(&output, "object").unwrap();
    let (inputs, outputs) = (vec![input], vec![output.clone()]);
    gate.record("k", &inputs, &outputs, "").unwrap();

    fs::write(&output, "tampered").unwrap();
    assert!(!gate.is_fresh("k", &inputs, &outputs, ""));

    fs::remove_file(&output).unwrap();
    assert!(!gate.is_fresh("k", &inputs, &outputs, ""));
}

#[test]
fn test_input_set_and_fingerprint_matter() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    fs::write(&a, "a").unwrap();
    fs::write(&b, "b").unwrap();
    gate.record("k", &[a.clone()], &[], "flags").unwrap();

    assert!(!gate.is_fresh("k", &[a.clone(), b], &[], "flags"));
    assert!(!gate.is_fresh("k", &[a.clone()], &[], "other flags"));
    assert!(gate.is_fresh("k", &[a], &[], "flags"));
}

#[test]
fn test_module_build_id_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let module = tmp.path().join("A.mod");
    ModuleImage::new("A")
        .with_build_id([1; 16])
        .write_to(&module)
        .unwrap();
    gate.record("aot", &[module.clone()], &[], "").unwrap();

    ModuleImage::new("A")
        .with_build_id([2; 16])
        .write_to(&module)
        .unwrap();
    assert!(gate.is_fresh("aot", &[module.clone()], &[], ""));

    ModuleImage::new("A")
        .with_build_id([2; 16])
        .with_code(vec![9])
        .write_to(&module)
        .unwrap();
    assert!(!gate.is_fresh("aot", &[module], &[], ""));
}

#[test]
fn test_compare_files_ignores_build_id() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let a = tmp.path().join("one").join("A.mod");
    let b = tmp.path().join("two").join("A.mod");
    fs::create_dir_all(a.parent().unwrap()).unwrap();
    fs::create_dir_all(b.parent().unwrap()).unwrap();
    ModuleImage::new("A").with_build_id([1; 16]).write_to(&a).unwrap();
    ModuleImage::new("A").with_build_id([7; 16]).write_to(&b).unwrap();

    assert!(gate.compare_files(&a, &b).unwrap());
    assert_ne!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
}

#[test]
fn test_version_mismatch_clears_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("cache");
    let (gate, warning) = CacheGate::open(&dir, ContentHash::new(1), false).unwrap();
    assert!(warning.is_none());
    fs::write(dir.join("leftover"), "x").unwrap();
    gate.finish().unwrap();

    // Same fingerprint: kept.
    let (_, warning) = CacheGate::open(&dir, ContentHash::new(1), false).unwrap();
    assert!(warning.is_none());
    assert!(dir.join("leftover").exists());

    // Different configuration: wiped with a warning.
    let (_, warning) = CacheGate::open(&dir, ContentHash::new(2), false).unwrap();
    assert_eq!(warning.unwrap().code, ErrorCode::E1003);
    assert!(!dir.join("leftover").exists());
}

#[test]
fn test_unfinished_cache_is_discarded_silently() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("cache");
    let _ = CacheGate::open(&dir, ContentHash::new(1), false).unwrap();
    fs::write(dir.join("partial"), "x").unwrap();

    let (_, warning) = CacheGate::open(&dir, ContentHash::new(1), false).unwrap();
    assert!(warning.is_none());
    assert!(!dir.join("partial").exists());
}

#[test]
fn test_force_clears() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("cache");
    let (gate, _) = CacheGate::open(&dir, ContentHash::new(1), false).unwrap();
    fs::write(dir.join("leftover"), "x").unwrap();
    gate.finish().unwrap();

    let (_, warning) = CacheGate::open(&dir, ContentHash::new(1), true).unwrap();
    assert!(warning.is_none());
    assert!(!dir.join("leftover").exists());
}

#[test]
fn test_update_file_only_copies_on_change() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    let src = tmp.path().join("src.bin");
    let dst = tmp.path().join("nested").join("dst.bin");
    fs::write(&src, "payload").unwrap();

    assert!(gate.update_file(&src, &dst).unwrap());
    assert!(!gate.update_file(&src, &dst).unwrap());
    assert_eq!(fs::read(&dst).unwrap(), b"payload");
}

#[test]
fn test_lists() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path());
    assert!(gate.read_list("linked-modules.txt").is_none());

    let lines = vec!["A.mod".to_string(), "B.mod".to_string()];
    gate.write_list("linked-modules.txt", &lines).unwrap();
    assert_eq!(gate.read_list("linked-modules.txt").unwrap(), lines);
}

/// Treats every `.mod` file as empty.
struct IgnoreModules;

impl ContentNormalizer for IgnoreModules {
    fn normalize(&self, path: &Path, _bytes: &[u8]) -> Option<Vec<u8>> {
        (path.extension().and_then(|e| e.to_str()) == Some("mod")).then(Vec::new)
    }
}

#[test]
fn test_registered_normalizer_decides_equality() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path()).with_normalizer(Arc::new(IgnoreModules));
    let a = tmp.path().join("one").join("App.mod");
    let b = tmp.path().join("two").join("App.mod");
    fs::create_dir_all(a.parent().unwrap()).unwrap();
    fs::create_dir_all(b.parent().unwrap()).unwrap();
    ModuleImage::new("App").with_code(vec![1]).write_to(&a).unwrap();
    ModuleImage::new("App").with_code(vec![2]).write_to(&b).unwrap();
    let (txt_a, txt_b) = (tmp.path().join("a.txt"), tmp.path().join("b.txt"));
    fs::write(&txt_a, "a").unwrap();
    fs::write(&txt_b, "b").unwrap();

    assert!(gate.compare_files(&a, &b).unwrap());
    assert_eq!(gate.content_hash(&a).unwrap(), gate.content_hash(&b).unwrap());
    assert!(!gate.compare_files(&txt_a, &txt_b).unwrap());
}

#[test]
fn test_registered_normalizer_keeps_stamps_fresh() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = open(tmp.path()).with_normalizer(Arc::new(IgnoreModules));
    let module = tmp.path().join("App.mod");
    ModuleImage::new("App").with_code(vec![1]).write_to(&module).unwrap();
    gate.record("aot", &[module.clone()], &[], "").unwrap();

    ModuleImage::new("App").with_code(vec![2]).write_to(&module).unwrap();
    assert!(gate.is_fresh("aot", &[module], &[], ""));
}
