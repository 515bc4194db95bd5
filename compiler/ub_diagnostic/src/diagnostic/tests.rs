use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_diagnostic_builder() {
    let diag = Diagnostic::error(ErrorCode::E5210)
        .with_message("Native linking failed, undefined symbol: _foo")
        .with_note("architecture: arm64");

    assert_eq!(diag.code, ErrorCode::E5210);
    assert!(diag.is_error());
    assert!(!diag.is_warning());
    assert_eq!(diag.notes, vec!["architecture: arm64".to_string()]);
}

#[test]
fn test_default_severity_follows_code() {
    assert!(Diagnostic::for_code(ErrorCode::E5203).is_warning());
    assert!(Diagnostic::for_code(ErrorCode::E5209).is_error());
}

#[test]
fn test_display() {
    let diag = Diagnostic::warning(ErrorCode::E5203).with_message("Native linking warning: x");
    assert_eq!(diag.to_string(), "warning E5203: Native linking warning: x");

    let diag = Diagnostic::error(ErrorCode::E3001)
        .with_message("Could not AOT the module 'A.mod'")
        .with_note("armv7");
    assert_eq!(
        diag.to_string(),
        "error E3001: Could not AOT the module 'A.mod'\n  = note: armv7"
    );
}
