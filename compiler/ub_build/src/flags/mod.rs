//! Accumulated native compiler and linker flags.
//!
//! Requirements from many modules are merged here. Every list keeps its
//! first-insertion order and drops duplicates, so a framework declared by
//! two modules is passed to the linker once.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::config::Version;

/// Search path added for frameworks shipped inside the application.
const EMBEDDED_FRAMEWORK_RPATH: &str = "@executable_path/Frameworks";

/// Framework availability used by [`CompilerFlags::prepare`].
#[derive(Clone, Copy, Debug)]
pub struct FrameworkContext<'a> {
    /// Framework name to the platform version that introduced it.
    pub catalog: &'a FxHashMap<String, Version>,
    pub deployment_target: Version,
    pub sdk_version: Version,
}

/// Ordered, duplicate-free collection of native tool flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompilerFlags {
    frameworks: Vec<String>,
    weak_frameworks: Vec<String>,
    link_with: Vec<PathBuf>,
    force_load: Vec<PathBuf>,
    other_flags: Vec<String>,
    defines: Vec<String>,
    unresolved_symbols: Vec<String>,
    inputs: Vec<PathBuf>,
}

fn push_unique<T: PartialEq + Clone>(list: &mut Vec<T>, value: &T) {
    if !list.contains(value) {
        list.push(value.clone());
    }
}

impl CompilerFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_framework(&mut self, framework: &str) {
        push_unique(&mut self.frameworks, &framework.to_string());
    }

    pub fn add_weak_framework(&mut self, framework: &str) {
        push_unique(&mut self.weak_frameworks, &framework.to_string());
    }

    pub fn add_frameworks(&mut self, frameworks: &[String], weak_frameworks: &[String]) {
        for fw in frameworks {
            self.add_framework(fw);
        }
        for fw in weak_frameworks {
            self.add_weak_framework(fw);
        }
    }

    /// Link with a static library, optionally force-loading all its members.
    pub fn add_link_with(&mut self, library: &Path, force_load: bool) {
        let library = library.to_path_buf();
        if force_load {
            push_unique(&mut self.force_load, &library);
        } else {
            push_unique(&mut self.link_with, &library);
        }
    }

    pub fn add_link_with_all(&mut self, libraries: &[PathBuf], force_load: &[PathBuf]) {
        for lib in libraries {
            self.add_link_with(lib, force_load.contains(lib));
        }
    }

    /// Add one argument verbatim. Repeated flags are kept once.
    pub fn add_other_flag(&mut self, flag: impl Into<String>) {
        push_unique(&mut self.other_flags, &flag.into());
    }

    /// Add a flag that takes a value, such as `-arch armv7`. The pair is
    /// only deduplicated as a whole.
    pub fn add_flag_with_value(&mut self, flag: &str, value: impl Into<String>) {
        let value = value.into();
        let present = self
            .other_flags
            .windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value);
        if !present {
            self.other_flags.push(flag.to_string());
            self.other_flags.push(value);
        }
    }

    /// Append user-provided arguments in order, without deduplication.
    pub fn add_raw_flags(&mut self, flags: &[String]) {
        self.other_flags.extend(flags.iter().cloned());
    }

    pub fn add_define(&mut self, define: &str) {
        push_unique(&mut self.defines, &define.to_string());
    }

    /// Keep `symbol` alive with `-u _symbol`.
    pub fn reference_symbol(&mut self, symbol: &str) {
        push_unique(&mut self.unresolved_symbols, &symbol.to_string());
    }

    /// Record a file the command reads (for up-to-date checks).
    pub fn add_input(&mut self, input: &Path) {
        push_unique(&mut self.inputs, &input.to_path_buf());
    }

    pub fn frameworks(&self) -> &[String] {
        &self.frameworks
    }

    pub fn weak_frameworks(&self) -> &[String] {
        &self.weak_frameworks
    }

    pub fn link_with(&self) -> &[PathBuf] {
        &self.link_with
    }

    pub fn force_load(&self) -> &[PathBuf] {
        &self.force_load
    }

    pub fn unresolved_symbols(&self) -> &[String] {
        &self.unresolved_symbols
    }

    /// Normalize the framework and library lists before emitting arguments.
    ///
    /// Catalog frameworks newer than the SDK are dropped, catalog frameworks
    /// newer than the deployment target become weak, and a framework listed
    /// both ways is linked weakly. Frameworks missing from the catalog are
    /// left as declared. A library that is force-loaded is not also linked
    /// normally.
    pub fn prepare(&mut self, context: &FrameworkContext<'_>) {
        let mut strong = Vec::new();
        for fw in std::mem::take(&mut self.frameworks) {
            match context.catalog.get(&fw) {
                Some(introduced) if *introduced > context.sdk_version => {
                    tracing::debug!(framework = %fw, %introduced, "framework not available in the SDK; not linking");
                }
                Some(introduced) if *introduced > context.deployment_target => {
                    tracing::debug!(framework = %fw, %introduced, "linking framework weakly");
                    push_unique(&mut self.weak_frameworks, &fw);
                }
                _ => strong.push(fw),
            }
        }
        self.weak_frameworks.retain(|fw| match context.catalog.get(fw) {
            Some(introduced) => *introduced <= context.sdk_version,
            None => true,
        });
        strong.retain(|fw| !self.weak_frameworks.contains(fw));
        self.frameworks = strong;

        let force_load = &self.force_load;
        self.link_with.retain(|lib| !force_load.contains(lib));
    }

    /// Files the command reads, including libraries and user frameworks.
    pub fn inputs(&self) -> Vec<PathBuf> {
        let mut inputs = self.inputs.clone();
        for lib in self.link_with.iter().chain(&self.force_load) {
            push_unique(&mut inputs, lib);
        }
        for fw in self.frameworks.iter().chain(&self.weak_frameworks) {
            if let Some(binary) = user_framework_binary(fw) {
                push_unique(&mut inputs, &binary);
            }
        }
        inputs
    }

    /// Render the argument list.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut embeds_frameworks = false;

        for (list, flag) in [
            (&self.frameworks, "-framework"),
            (&self.weak_frameworks, "-weak_framework"),
        ] {
            for fw in list {
                let path = Path::new(fw);
                if fw.ends_with(".framework") {
                    if let Some(dir) = path.parent() {
                        args.push("-F".to_string());
                        args.push(dir.to_string_lossy().into_owned());
                    }
                    args.push(flag.to_string());
                    args.push(framework_name(fw));
                    embeds_frameworks = true;
                } else {
                    args.push(flag.to_string());
                    args.push(fw.clone());
                }
            }
        }
        if embeds_frameworks {
            args.extend(
                ["-Xlinker", "-rpath", "-Xlinker", EMBEDDED_FRAMEWORK_RPATH].map(String::from),
            );
        }

        for lib in &self.link_with {
            args.push(lib.to_string_lossy().into_owned());
        }
        for lib in &self.force_load {
            args.push("-force_load".to_string());
            args.push(lib.to_string_lossy().into_owned());
        }
        args.extend(self.other_flags.iter().cloned());
        for define in &self.defines {
            args.push(format!("-D{define}"));
        }
        for symbol in &self.unresolved_symbols {
            args.push("-u".to_string());
            args.push(format!("_{symbol}"));
        }
        args
    }
}

fn framework_name(framework: &str) -> String {
    Path::new(framework)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `Foo.framework` paths resolve to the `Foo.framework/Foo` binary.
fn user_framework_binary(framework: &str) -> Option<PathBuf> {
    if !framework.ends_with(".framework") {
        return None;
    }
    Some(Path::new(framework).join(framework_name(framework)))
}

/// Split a user-supplied flag string into arguments.
///
/// Whitespace separates arguments; single or double quotes group, and a
/// backslash escapes the next character.
pub fn split_arguments(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_arg = true;
            }
            (q, Some(open)) if q == open => quote = None,
            (_, Some(_)) => current.push(c),
            ('"' | '\'', None) => {
                quote = Some(c);
                in_arg = true;
            }
            (c, None) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (c, None) => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}
