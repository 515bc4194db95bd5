use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_warnings_only_is_ok() {
    let mut bag = DiagnosticBag::new();
    bag.warning(ErrorCode::E5203, "ld: warning: something");

    let warnings = bag.into_result().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, ErrorCode::E5203);
}

#[test]
fn test_errors_are_raised_together() {
    let mut bag = DiagnosticBag::new();
    bag.error(ErrorCode::E2002, "Can not resolve reference: Missing");
    bag.warning(ErrorCode::E5215, "hint");
    bag.error(ErrorCode::E2002, "Can not resolve reference: Other");

    assert!(bag.has_errors());
    assert_eq!(bag.error_count(), 2);

    let err = bag.into_result().unwrap_err();
    assert_eq!(err.diagnostics.len(), 3);
    assert_eq!(err.errors().count(), 2);
    assert!(err.contains(ErrorCode::E5215));
}

#[test]
fn test_take_warnings() {
    let mut bag: DiagnosticBag = vec![
        Diagnostic::error(ErrorCode::E5209).with_message("a"),
        Diagnostic::warning(ErrorCode::E5203).with_message("b"),
    ]
    .into_iter()
    .collect();

    let warnings = bag.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(bag.len(), 1);
    assert!(bag.has_errors());
}

#[test]
fn test_absorb() {
    let mut bag = DiagnosticBag::new();
    bag.absorb(AggregateError::single(
        Diagnostic::error(ErrorCode::E3001).with_message("x"),
    ));
    assert_eq!(bag.error_count(), 1);
}

#[test]
fn test_aggregate_display() {
    let err = AggregateError::single(Diagnostic::error(ErrorCode::E5202).with_message("Native linking failed"));
    assert_eq!(
        err.to_string(),
        "build failed with 1 error\nerror E5202: Native linking failed"
    );
}
