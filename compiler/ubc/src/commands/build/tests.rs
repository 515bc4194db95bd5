use pretty_assertions::assert_eq;
use ub_build::Abi;

use super::*;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

#[test]
fn options_are_parsed() {
    let options = parse_build_options(&args(&[
        "--platform=tvos",
        "--target=simulator",
        "--abi=x86_64",
        "--search=lib",
        "--search=vendor",
        "--jobs=3",
        "--timeout=30",
        "--dedup=copy",
        "--gcc-flags=-lsqlite3 -lz",
        "--force",
        "-v",
    ]));

    assert_eq!(options.platform.as_deref(), Some("tvos"));
    assert_eq!(options.target.as_deref(), Some("simulator"));
    assert_eq!(options.abi.as_deref(), Some("x86_64"));
    assert_eq!(options.search, vec![PathBuf::from("lib"), PathBuf::from("vendor")]);
    assert_eq!(options.jobs, Some(3));
    assert_eq!(options.timeout, Some(30));
    assert_eq!(options.dedup, Some(DedupStrategy::Copy));
    assert_eq!(options.gcc_flags.as_deref(), Some("-lsqlite3 -lz"));
    assert!(options.force);
    assert!(options.verbose);
    assert!(!options.debug);
}

#[test]
fn malformed_numbers_are_ignored() {
    let options = parse_build_options(&args(&["--jobs=many", "--timeout=soon", "--dedup=reflink"]));

    assert_eq!(options, BuildOptions::default());
}

#[test]
fn merge_keeps_earlier_values_unless_overridden() {
    let mut options = parse_build_options(&args(&["--abi=armv7", "--debug", "--search=a"]));
    options.merge(&parse_build_options(&args(&["--name=Game", "--search=b"])));
    options.merge(&parse_build_options(&args(&["--abi=arm64"])));

    assert_eq!(options.abi.as_deref(), Some("arm64"));
    assert_eq!(options.name.as_deref(), Some("Game"));
    assert_eq!(options.search, vec![PathBuf::from("a"), PathBuf::from("b")]);
    assert!(options.debug);
}

#[test]
fn options_reach_the_configuration() {
    let options = parse_build_options(&args(&[
        "--abi=armv7,arm64",
        "--sdk=10.0",
        "--deployment=9.0",
        "--name=Game",
        "--dedup=hardlink",
        "--no-strip",
        "--marshal-native-exceptions",
    ]));

    let config = options
        .to_builder(Path::new("src/App.mod"), None)
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(config.abis, vec![Abi::ARMV7, Abi::ARM64]);
    assert_eq!(config.sdk_version, Version::new(10, 0));
    assert_eq!(config.deployment_target, Version::new(9, 0));
    assert_eq!(config.executable_name, "Game");
    assert_eq!(config.dedup, DedupStrategy::HardLink);
    assert!(!config.native_strip);
    assert!(config.native_exception_wrappers);
}

#[test]
fn job_count_falls_back_to_the_environment() {
    let from_env = BuildOptions::default()
        .to_builder(Path::new("App.mod"), Some("6"))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(from_env.jobs, 6);

    let options = parse_build_options(&args(&["--jobs=2"]));
    let explicit = options
        .to_builder(Path::new("App.mod"), Some("6"))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(explicit.jobs, 2);
}

#[test]
fn every_invalid_value_is_reported() {
    let options = parse_build_options(&args(&["--platform=android", "--target=emulator", "--sdk=ten"]));

    let error = options.to_builder(Path::new("App.mod"), None).unwrap_err();

    let codes: Vec<ErrorCode> = error.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![ErrorCode::E0071, ErrorCode::E0071, ErrorCode::E0073]);
}
