//! Modules and their native requirements.

use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashMap;
use ub_diagnostic::{Diagnostic, ErrorCode};

use crate::cache::write_if_changed;
use crate::image::{AttrArg, Attribute, ModuleImage};

/// Attribute type that declares native link requirements.
pub const LINK_WITH_ATTRIBUTE: &str = "LinkWith";

/// A loaded module and everything the native side needs to know about it.
#[derive(Clone, Debug)]
pub struct Module {
    /// Module name from the image header.
    pub name: String,
    /// Current location. Moves as the module flows through the trim and
    /// build directories.
    pub path: PathBuf,
    pub image: ModuleImage,
    /// Lives in the platform directory; never carries link markers.
    pub is_platform_module: bool,
    pub native: NativeRequirements,
}

impl Module {
    pub fn new(path: PathBuf, image: ModuleImage, is_platform_module: bool) -> Self {
        Self {
            name: image.name().to_string(),
            path,
            image,
            is_platform_module,
            native: NativeRequirements::default(),
        }
    }

    /// Base file name, e.g. `A.mod`.
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    /// Read the `LinkWith` markers and native references of this module.
    ///
    /// Embedded libraries are extracted into `extract_dir` (only rewritten
    /// when their content changed). Problems with one marker do not stop
    /// the others; they are returned as diagnostics.
    pub fn extract_native_requirements(&mut self, extract_dir: &Path) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if self.is_platform_module {
            return diagnostics;
        }

        let markers: Vec<Attribute> = self
            .image
            .attributes
            .iter()
            .filter(|a| a.type_name == LINK_WITH_ATTRIBUTE)
            .cloned()
            .collect();

        for marker in &markers {
            let link_with = LinkWithMarker::decode(marker);
            let native = &mut self.native;

            if !link_with.smart_link {
                native.smart_link = false;
            }
            if link_with.is_cxx {
                native.is_cxx = true;
            }
            if link_with.needs_gcc_exception_handling {
                native.needs_gcc_exception_handling = true;
            }
            for flag in link_with.linker_flags.split_whitespace() {
                native.linker_flags.push(flag.to_string());
            }
            for fw in link_with.frameworks.split_whitespace() {
                push_unique(&mut native.frameworks, fw);
            }
            for fw in link_with.weak_frameworks.split_whitespace() {
                push_unique(&mut native.weak_frameworks, fw);
            }

            let Some(library) = link_with.library else {
                continue;
            };
            if !is_plain_file_name(&library) {
                diagnostics.push(Diagnostic::warning(ErrorCode::E1302).with_message(format!(
                    "Could not extract the native library '{library}' from '{}'. The library name must be a plain file name.",
                    self.path.display()
                )));
                continue;
            }
            let target = extract_dir.join(&library);
            match self.image.resource(&library) {
                Some(resource) => {
                    if let Err(e) = write_if_changed(&target, &resource.data) {
                        diagnostics.push(
                            Diagnostic::warning(ErrorCode::E1302).with_message(format!(
                                "Could not extract the native library '{library}' from '{}': {e}",
                                self.path.display()
                            )),
                        );
                        continue;
                    }
                    tracing::debug!(library = %library, module = %self.name, "extracted native library");
                }
                None => {
                    diagnostics.push(Diagnostic::warning(ErrorCode::E1302).with_message(format!(
                        "Could not extract the native library '{library}' from '{}'. The library is not embedded in the module.",
                        self.path.display()
                    )));
                    continue;
                }
            }
            if library.ends_with(".framework") {
                push_unique(&mut self.native.frameworks, &target.to_string_lossy());
            } else {
                if link_with.force_load {
                    self.native.force_load.push(target.clone());
                }
                self.native.link_with.push(target);
            }
        }

        for reference in self.image.native_references.clone() {
            self.native.add_native_reference(&reference);
        }

        // Weak wins: a framework can only be linked one way.
        let weak = self.native.weak_frameworks.clone();
        self.native.frameworks.retain(|fw| !weak.contains(fw));

        diagnostics
    }
}

/// A single normal path component: no separators, no `.` or `..`.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Native requirements of a single module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeRequirements {
    pub frameworks: Vec<String>,
    pub weak_frameworks: Vec<String>,
    pub linker_flags: Vec<String>,
    /// Extracted static libraries.
    pub link_with: Vec<PathBuf>,
    /// Subset of `link_with` that must be force-loaded.
    pub force_load: Vec<PathBuf>,
    pub is_cxx: bool,
    pub needs_gcc_exception_handling: bool,
    /// `false` if any marker disabled smart linking; disables dead stripping.
    pub smart_link: bool,
    /// Native library names that could not be mapped to a linker input.
    pub unresolved_native_references: Vec<String>,
}

impl Default for NativeRequirements {
    fn default() -> Self {
        Self {
            frameworks: Vec::new(),
            weak_frameworks: Vec::new(),
            linker_flags: Vec::new(),
            link_with: Vec::new(),
            force_load: Vec::new(),
            is_cxx: false,
            needs_gcc_exception_handling: false,
            smart_link: true,
            unresolved_native_references: Vec::new(),
        }
    }
}

impl NativeRequirements {
    /// Map a foreign-function library name onto linker inputs.
    pub fn add_native_reference(&mut self, reference: &str) {
        let stem = Path::new(reference)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match stem.as_str() {
            "__Internal" | "libc" | "libSystem" | "libobjc" | "libdyld" | "libsystem_kernel" => {}
            "sqlite3" | "libsqlite3" => push_unique(&mut self.linker_flags, "-lsqlite3"),
            "libGLES" | "libGLESv2" => push_unique(&mut self.frameworks, "OpenGLES"),
            "vImage" | "vecLib" => push_unique(&mut self.frameworks, "Accelerate"),
            "openal32" => push_unique(&mut self.frameworks, "OpenAL"),
            _ if reference.contains(".framework/") => push_unique(&mut self.frameworks, &stem),
            _ => push_unique(&mut self.unresolved_native_references, &stem),
        }
    }
}

/// Decoded `LinkWith` marker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct LinkWithMarker {
    pub library: Option<String>,
    pub frameworks: String,
    pub weak_frameworks: String,
    pub linker_flags: String,
    pub force_load: bool,
    pub is_cxx: bool,
    pub needs_gcc_exception_handling: bool,
    pub smart_link: bool,
}

impl LinkWithMarker {
    /// Decode a marker. The library name is the first constructor
    /// argument or the `LibraryName` property.
    pub fn decode(attr: &Attribute) -> Self {
        let text = |name: &str| {
            attr.named(name)
                .and_then(AttrArg::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let flag = |name: &str, default: bool| {
            attr.named(name).and_then(AttrArg::as_bool).unwrap_or(default)
        };
        let library = attr
            .ctor_args
            .first()
            .and_then(AttrArg::as_str)
            .map(str::to_string)
            .or_else(|| attr.named("LibraryName").and_then(AttrArg::as_str).map(str::to_string))
            .filter(|s| !s.is_empty());
        Self {
            library,
            frameworks: text("Frameworks"),
            weak_frameworks: text("WeakFrameworks"),
            linker_flags: text("LinkerFlags"),
            force_load: flag("ForceLoad", false),
            is_cxx: flag("IsCxx", false),
            needs_gcc_exception_handling: flag("NeedsGccExceptionHandling", false),
            smart_link: flag("SmartLink", true),
        }
    }
}

/// The modules of one build half, keyed by base file name.
#[derive(Clone, Debug, Default)]
pub struct ModuleSet {
    modules: Vec<Module>,
    by_file_name: FxHashMap<String, usize>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module. Two different files with the same base name are an
    /// error; adding the same file again replaces the entry.
    pub fn insert(&mut self, module: Module) -> Result<(), Diagnostic> {
        let key = module.file_name();
        if let Some(&idx) = self.by_file_name.get(&key) {
            let existing = &self.modules[idx];
            if existing.path != module.path {
                return Err(Diagnostic::error(ErrorCode::E2003).with_message(format!(
                    "Two modules have the same file name '{key}': '{}' and '{}'",
                    existing.path.display(),
                    module.path.display()
                )));
            }
            self.modules[idx] = module;
            return Ok(());
        }
        self.by_file_name.insert(key, self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    pub fn get(&self, file_name: &str) -> Option<&Module> {
        self.by_file_name.get(file_name).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.by_file_name.contains_key(file_name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Module> {
        self.modules.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Module> {
        self.modules.iter_mut()
    }

    pub fn as_mut_slice(&mut self) -> &mut [Module] {
        &mut self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl<'a> IntoIterator for &'a ModuleSet {
    type Item = &'a Module;
    type IntoIter = std::slice::Iter<'a, Module>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.iter()
    }
}
