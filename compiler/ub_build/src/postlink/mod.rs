//! Steps after the native link.
//!
//! The linked executable stays in the cache untouched; the shipped copy is
//! produced from it by the strip step, so stripping never invalidates the
//! link. Debug bundles and the symbol manifest are derived from the linked
//! executable and cache-gated on its content.

mod manifest;

pub use manifest::{format_uuid, mach_build_ids, same_apart_from_date, MsymManifest};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ub_diagnostic::{Diagnostic, ErrorCode};

use crate::cache::{write_if_changed, CacheError, CacheGate};
use crate::config::BuildConfiguration;
use crate::toolchain::{Tool, ToolInvocation, ToolRunner};

/// Name of the symbol list inside the cache.
pub const SYMBOL_LIST: &str = "symbol-file";

const DSYMUTIL_THREADS: &str = "4";

/// `_<symbol>` lines for every required and configured no-strip symbol,
/// duplicates removed.
pub fn symbol_list<'s>(required: impl IntoIterator<Item = &'s String>, no_strip: &[String]) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut push = |symbol: &str| {
        let line = format!("_{symbol}");
        if !lines.contains(&line) {
            lines.push(line);
        }
    };
    for symbol in required {
        push(symbol.as_str());
    }
    for symbol in no_strip {
        push(symbol.as_str());
    }
    lines
}

/// Write the symbol list. Returns whether it holds any symbol.
pub fn write_symbol_list(path: &Path, lines: &[String]) -> io::Result<bool> {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    write_if_changed(path, text.as_bytes())?;
    Ok(!lines.is_empty())
}

/// What a post-link step did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Ran,
    UpToDate,
    Disabled,
}

pub struct PostLinker<'a> {
    config: &'a BuildConfiguration,
    runner: &'a dyn ToolRunner,
    cache: &'a CacheGate,
}

impl<'a> PostLinker<'a> {
    pub fn new(config: &'a BuildConfiguration, runner: &'a dyn ToolRunner, cache: &'a CacheGate) -> Self {
        PostLinker {
            config,
            runner,
            cache,
        }
    }

    pub fn dsym_dir(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.dSYM", self.config.executable_name))
    }

    pub fn msym_dir(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.mSYM", self.config.executable_name))
    }

    /// Native stripping applies to optimized device builds only.
    pub fn strips(&self) -> bool {
        self.config.native_strip && self.config.is_device() && !self.config.debug
    }

    /// Produce the shipped executable from the linked one.
    ///
    /// With stripping enabled, everything except `symbols` is stripped; an
    /// empty list strips all local symbols. Otherwise the executable is
    /// copied.
    pub fn finalize_executable(&self, linked: &Path, symbols: &[String]) -> Result<StepOutcome, Diagnostic> {
        let target = self.config.final_executable();
        if !self.strips() {
            let copied = self.cache.update_file(linked, &target)?;
            return Ok(if copied { StepOutcome::Ran } else { StepOutcome::UpToDate });
        }

        let list = self.cache.dir().join(SYMBOL_LIST);
        let has_symbols =
            write_symbol_list(&list, symbols).map_err(|e| CacheError::write(&list, &e).to_diagnostic())?;
        let mut invocation = ToolInvocation::new(Tool::Strip);
        let mut inputs = vec![linked.to_path_buf()];
        if has_symbols {
            invocation = invocation.with_arg("-i").with_arg("-s").with_path(&list);
            inputs.push(list);
        }
        let invocation = invocation.with_arg("-o").with_path(&target).with_path(linked);

        let key = format!("strip:{}", target.display());
        let fingerprint = invocation.fingerprint_text();
        let outputs = [target.clone()];
        if self.cache.is_fresh(&key, &inputs, &outputs, &fingerprint) {
            tracing::debug!(target = %target.display(), "target is up-to-date");
            return Ok(StepOutcome::UpToDate);
        }

        ensure_parent(&target)?;
        tracing::info!(executable = %target.display(), symbols = symbols.len(), "stripping native code");
        let result = self
            .runner
            .run(&invocation, self.config.tool_timeout)
            .map_err(|e| e.to_diagnostic())?;
        if !result.success() {
            self.cache.invalidate(&key);
            return Err(tool_failure(
                ErrorCode::E5302,
                format!("Failed to strip the executable '{}'", linked.display()),
                &result.output,
            ));
        }
        self.cache.record(&key, &inputs, &outputs, &fingerprint)?;
        Ok(StepOutcome::Ran)
    }

    /// Generate the debug-symbol bundle next to the application.
    pub fn generate_dsym(&self, linked: &Path) -> Result<StepOutcome, Diagnostic> {
        if !self.config.dsym {
            return Ok(StepOutcome::Disabled);
        }
        let dsym = self.dsym_dir();
        let invocation = ToolInvocation::new(Tool::Dsymutil)
            .with_arg("-num-threads")
            .with_arg(DSYMUTIL_THREADS)
            .with_arg("-z")
            .with_arg("-o")
            .with_path(&dsym)
            .with_path(linked);

        // The bundle is a directory; its presence stands in for output hashes.
        let key = format!("dsym:{}", dsym.display());
        let fingerprint = invocation.fingerprint_text();
        let inputs = [linked.to_path_buf()];
        if dsym.exists() && self.cache.is_fresh(&key, &inputs, &[], &fingerprint) {
            tracing::debug!(target = %dsym.display(), "target is up-to-date");
            return Ok(StepOutcome::UpToDate);
        }

        remove_path(&dsym).map_err(|e| CacheError::write(&dsym, &e).to_diagnostic())?;
        ensure_parent(&dsym)?;
        tracing::info!(bundle = %dsym.display(), "linking DWARF symbols");
        let result = self
            .runner
            .run(&invocation, self.config.tool_timeout)
            .map_err(|e| e.to_diagnostic())?;
        if !result.success() {
            self.cache.invalidate(&key);
            return Err(tool_failure(
                ErrorCode::E5303,
                format!("Failed to generate the debug symbols for '{}'", linked.display()),
                &result.output,
            ));
        }
        self.cache.record(&key, &inputs, &[], &fingerprint)?;
        Ok(StepOutcome::Ran)
    }

    /// Write the symbol manifest and collect the AOT debug data of every
    /// half into the `.mSYM` directory.
    ///
    /// Problems here never fail the build; they come back as warnings.
    pub fn generate_msym(&self, executable: &Path, aot_data_dirs: &[PathBuf]) -> Vec<Diagnostic> {
        let mut warnings = Vec::new();
        if !self.config.msym {
            return warnings;
        }
        let target = self.msym_dir();
        if let Err(e) = fs::create_dir_all(&target) {
            warnings.push(msym_warning(&target, &e.to_string()));
            return warnings;
        }

        match self.write_manifest(executable, &target) {
            Ok(true) => tracing::debug!(dir = %target.display(), "wrote symbol manifest"),
            Ok(false) => {}
            Err(message) => warnings.push(msym_warning(&target, &message)),
        }

        for dir in aot_data_dirs {
            if !dir.is_dir() {
                warnings.push(msym_warning(&target, &format!("'{}' does not exist", dir.display())));
                continue;
            }
            if let Err(e) = self.copy_tree(dir, &target) {
                warnings.push(msym_warning(&target, &e.to_string()));
            }
        }
        warnings
    }

    /// Returns whether the manifest file was (re)written.
    fn write_manifest(&self, executable: &Path, target: &Path) -> Result<bool, String> {
        let data = fs::read(executable).map_err(|e| format!("could not read '{}': {e}", executable.display()))?;
        let Some(build_ids) = mach_build_ids(&data).map_err(|e| e.to_string())? else {
            tracing::debug!(executable = %executable.display(), "not a Mach-O executable; no symbol manifest");
            return Ok(false);
        };
        let manifest = MsymManifest {
            app_id: self.config.executable_name.clone(),
            build_date: chrono::Local::now().to_rfc3339(),
            build_ids,
        };
        let path = target.join("manifest.xml");
        let xml = manifest.to_xml();
        if fs::read_to_string(&path).is_ok_and(|existing| same_apart_from_date(&existing, &xml)) {
            return Ok(false);
        }
        write_if_changed(&path, xml.as_bytes())
            .map_err(|e| format!("could not write '{}': {e}", path.display()))
    }

    fn copy_tree(&self, from: &Path, to: &Path) -> Result<(), CacheError> {
        let entries = fs::read_dir(from).map_err(|e| CacheError::read(from, &e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::read(from, &e))?;
            let source = entry.path();
            let dest = to.join(entry.file_name());
            if source.is_dir() {
                self.copy_tree(&source, &dest)?;
            } else {
                self.cache.update_file(&source, &dest)?;
            }
        }
        Ok(())
    }
}

fn msym_warning(target: &Path, detail: &str) -> Diagnostic {
    Diagnostic::warning(ErrorCode::E0095).with_message(format!(
        "AOT debug data could not be copied to the destination directory {}: {detail}",
        target.display()
    ))
}

fn tool_failure(code: ErrorCode, message: String, output: &str) -> Diagnostic {
    let diagnostic = Diagnostic::error(code).with_message(message);
    if output.trim().is_empty() {
        diagnostic
    } else {
        diagnostic.with_note(output.trim().to_string())
    }
}

fn ensure_parent(path: &Path) -> Result<(), Diagnostic> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CacheError::write(parent, &e).to_diagnostic())?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
