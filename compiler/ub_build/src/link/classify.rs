//! Classification of native linker output.
//!
//! The linker's combined output is walked line by line against an ordered
//! table of rules. The first rule that accepts a line handles it; some rules
//! consume the indented continuation lines that follow. Whether the findings
//! are errors or warnings depends only on the linker's exit status.

use std::path::PathBuf;

use rustc_hash::FxHashMap;
use ub_diagnostic::{Diagnostic, ErrorCode};

/// Classification stops after this many diagnostics.
pub const MAX_DIAGNOSTICS: usize = 100;

const OBJC_CLASS_PREFIX: &str = "_OBJC_CLASS_$_";

/// Turns linker output into diagnostics.
#[derive(Clone, Debug)]
pub struct LinkerOutputClassifier<'a> {
    /// Files we produced; architecture-mismatch warnings about them are
    /// expected in partial multi-architecture links.
    own_inputs: Vec<String>,
    /// Native symbol (without the leading underscore) to the managed member
    /// that requires it.
    symbol_members: Option<&'a FxHashMap<String, String>>,
    fatal: bool,
}

impl<'a> LinkerOutputClassifier<'a> {
    /// `fatal` is true when the linker exited with a failure status.
    pub fn new(fatal: bool) -> Self {
        LinkerOutputClassifier {
            own_inputs: Vec::new(),
            symbol_members: None,
            fatal,
        }
    }

    #[must_use]
    pub fn with_own_inputs(mut self, inputs: &[PathBuf]) -> Self {
        self.own_inputs
            .extend(inputs.iter().map(|p| p.to_string_lossy().into_owned()));
        self
    }

    #[must_use]
    pub fn with_symbol_members(mut self, members: &'a FxHashMap<String, String>) -> Self {
        self.symbol_members = Some(members);
        self
    }

    pub fn classify(&self, output: &str) -> Vec<Diagnostic> {
        let mut pass = Pass {
            classifier: self,
            lines: output.lines().filter(|l| !l.trim().is_empty()).collect(),
            pos: 0,
            diagnostics: Vec::new(),
        };
        while pass.pos < pass.lines.len() && pass.diagnostics.len() < MAX_DIAGNOSTICS {
            let line = pass.lines[pass.pos];
            for rule in RULES {
                if (rule.apply)(&mut pass, line) {
                    tracing::trace!(rule = rule.name, line, "classified linker output");
                    break;
                }
            }
            pass.pos += 1;
        }
        pass.diagnostics.truncate(MAX_DIAGNOSTICS);
        pass.diagnostics
    }
}

/// State of one walk over the output.
struct Pass<'c, 'o> {
    classifier: &'c LinkerOutputClassifier<'c>,
    lines: Vec<&'o str>,
    /// Index of the line being classified. Rules that consume continuation
    /// lines leave it on the last line they consumed.
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Pass<'_, '_> {
    fn emit(&mut self, code: ErrorCode, message: String) {
        let diagnostic = if self.classifier.fatal {
            Diagnostic::error(code)
        } else {
            Diagnostic::warning(code)
        };
        self.diagnostics.push(diagnostic.with_message(message));
    }

    /// The line after the current one, if it is indented deeper than `indent`.
    fn continuation(&self, indent: usize) -> Option<&str> {
        self.lines
            .get(self.pos + 1)
            .copied()
            .filter(|next| indentation(next) > indent)
    }

    fn member_for(&self, symbol: &str) -> Option<&str> {
        let name = symbol.strip_prefix('_').unwrap_or(symbol);
        self.classifier
            .symbol_members
            .and_then(|members| members.get(name))
            .map(String::as_str)
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// One entry of the rule table. `apply` returns whether it handled the line.
struct Rule {
    name: &'static str,
    apply: fn(&mut Pass<'_, '_>, &str) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        name: "foreign-architecture-input",
        apply: ignore_foreign_architecture,
    },
    Rule {
        name: "symbols-not-found-summary",
        apply: ignore_not_found_summary,
    },
    Rule {
        name: "driver-exit-status",
        apply: ignore_driver_exit_status,
    },
    Rule {
        name: "undefined-symbols",
        apply: undefined_symbols,
    },
    Rule {
        name: "duplicate-symbol",
        apply: duplicate_symbol,
    },
    Rule {
        name: "generic",
        apply: generic,
    },
];

fn ignore_foreign_architecture(pass: &mut Pass<'_, '_>, line: &str) -> bool {
    line.contains("ld: warning: ignoring file ")
        && line.contains("file was built for")
        && line.contains("which is not the architecture being linked")
        && pass
            .classifier
            .own_inputs
            .iter()
            .any(|input| line.contains(input.as_str()))
}

fn ignore_not_found_summary(pass: &mut Pass<'_, '_>, line: &str) -> bool {
    line.contains("ld: symbol(s) not found for architecture") && !pass.diagnostics.is_empty()
}

fn ignore_driver_exit_status(_: &mut Pass<'_, '_>, line: &str) -> bool {
    line.contains("linker command failed with exit code")
}

fn undefined_symbols(pass: &mut Pass<'_, '_>, line: &str) -> bool {
    if !line.contains("Undefined symbols for architecture") {
        return false;
    }
    while let Some(next) = pass.lines.get(pass.pos + 1).copied() {
        let Some(symbol) = next.strip_suffix(", referenced from:") else {
            break;
        };
        pass.pos += 1;
        let symbol = symbol.trim_matches(['"', ' ']);

        if let Some(class) = symbol.strip_prefix(OBJC_CLASS_PREFIX) {
            pass.emit(
                ErrorCode::E5211,
                format!(
                    "Native linking failed, undefined Objective-C class: {class}. The symbol '{symbol}' could not be found in any of the libraries or frameworks linked with your application."
                ),
            );
        } else if let Some(member) = pass.member_for(symbol).map(str::to_string) {
            pass.emit(
                ErrorCode::E5214,
                format!(
                    "Native linking failed, undefined symbol: {symbol}. This symbol was referenced by the managed member {member}. Please verify that all the necessary frameworks have been referenced and native libraries linked."
                ),
            );
        } else {
            pass.emit(
                ErrorCode::E5210,
                format!(
                    "Native linking failed, undefined symbol: {symbol}. Please verify that all the necessary frameworks have been referenced and native libraries are properly linked in."
                ),
            );
        }

        let indent = indentation(next);
        while pass.continuation(indent).is_some() {
            pass.pos += 1;
        }
    }
    true
}

fn duplicate_symbol(pass: &mut Pass<'_, '_>, line: &str) -> bool {
    let Some(symbol) = line
        .strip_prefix("duplicate symbol ")
        .and_then(|rest| rest.strip_suffix(" in:"))
    else {
        return false;
    };
    pass.emit(
        ErrorCode::E5212,
        format!("Native linking failed, duplicate symbol: '{}'.", symbol.trim()),
    );
    let indent = indentation(line);
    while let Some(location) = pass.continuation(indent).map(str::to_string) {
        pass.pos += 1;
        pass.emit(
            ErrorCode::E5213,
            format!(
                "Duplicate symbol in: {} (Location related to previous error)",
                location.trim()
            ),
        );
    }
    true
}

fn generic(pass: &mut Pass<'_, '_>, line: &str) -> bool {
    let text = line.strip_prefix("ld: ").unwrap_or(line).trim();
    if pass.classifier.fatal {
        pass.emit(ErrorCode::E5209, format!("Native linking error: {text}"));
    } else {
        pass.emit(ErrorCode::E5203, format!("Native linking warning: {text}"));
    }
    true
}
