//! `ubuild`: multi-architecture native build orchestrator.

use std::path::PathBuf;

use ubc::commands::{build_file, explain_error, parse_build_options, BuildOptions};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let command = &args[1];

    let status = match command.as_str() {
        "build" => {
            if args.len() < 3 || args[2].starts_with('-') {
                eprintln!("Usage: ubuild build <root.mod> [options]");
                eprintln!();
                eprintln!("Run `ubuild help` for the list of options.");
                std::process::exit(1);
            }

            // Parse options, handling -o specially (needs lookahead)
            let mut options = BuildOptions::default();
            let mut i = 3;
            while i < args.len() {
                if args[i] == "-o" && i + 1 < args.len() {
                    options.output = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    let parsed = parse_build_options(&args[i..=i]);
                    options.merge(&parsed);
                    i += 1;
                }
            }

            build_file(&args[2], &options)
        }
        "explain" | "--explain" => {
            if args.len() < 3 {
                eprintln!("Usage: ubuild explain <ERROR_CODE>");
                eprintln!("Example: ubuild explain E5210");
                std::process::exit(1);
            }
            explain_error(&args[2])
        }
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        "version" | "--version" => {
            println!("ubuild {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!();
            print_usage();
            1
        }
    };

    std::process::exit(status);
}

fn print_usage() {
    println!("ubuild: multi-architecture native build orchestrator");
    println!();
    println!("Usage: ubuild <command> [options]");
    println!();
    println!("Commands:");
    println!("  build <root.mod>     Build a native executable from a root module");
    println!("  explain <code>       Explain an error code (e.g., E5210)");
    println!("  help                 Show this help message");
    println!("  version              Show version information");
    println!();
    println!("Build options:");
    println!("  --platform=<name>          ios, tvos, watchos (default: ios)");
    println!("  --target=<kind>            device, simulator (default: device)");
    println!("  --abi=<list>               Architectures, e.g. armv7,arm64");
    println!("  --bitcode=<mode>           none, asmonly, llvmonly, markeronly");
    println!("  --deployment=<version>     Minimum OS version (default: the SDK version)");
    println!("  --sdk=<version>            SDK version");
    println!("  --sdk-root=<dir>           SDK directory");
    println!("  --developer-dir=<dir>      Directory with usr/bin/clang, lipo, strip");
    println!("  --aot-compiler=<path>      AOT compiler executable");
    println!("  --runtime-dir=<dir>        Directory with the runtime libraries");
    println!("  --search=<dir>             Additional module directory (repeatable)");
    println!("  --platform-dir=<dir>       Directory of the platform modules");
    println!("  --cache=<dir>              Build cache directory");
    println!("  -o <dir>                   Output directory");
    println!("  --name=<name>              Executable name (default: root module name)");
    println!("  --jobs=<n>                 Parallel tool invocations (or UBUILD_JOBS)");
    println!("  --timeout=<secs>           Wall-clock limit per tool invocation");
    println!("  --debug                    Debug build");
    println!("  --profiling                Link the profiler");
    println!("  --dedup=<strategy>         symlink, hardlink, copy");
    println!("  --gcc-flags=<flags>        Additional native linker flags");
    println!("  --no-strip                 Keep native symbols");
    println!("  --marshal-native-exceptions  Wrap native calls to marshal exceptions");
    println!("  --force                    Discard the build cache");
    println!("  -v, --verbose              Debug logging (RUST_LOG overrides)");
    println!();
    println!("Examples:");
    println!("  ubuild build App.mod --abi=armv7,arm64 --sdk-root=$SDK -o out");
    println!("  ubuild build App.mod --target=simulator --abi=x86_64");
    println!("  ubuild explain E5210");
}
