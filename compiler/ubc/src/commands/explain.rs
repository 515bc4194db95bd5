//! The `explain` command.

use ub_diagnostic::ErrorCode;

/// Print the description of an error code; returns the exit status.
pub fn explain_error(code_str: &str) -> i32 {
    let Ok(code) = code_str.parse::<ErrorCode>() else {
        eprintln!("Unknown error code: {code_str}");
        eprintln!();
        eprintln!("Codes have the format EXXXX where X is a digit.");
        eprintln!("Examples: E0075, E2002, E5210");
        return 1;
    };

    let severity = if code.is_warning() { "warning" } else { "error" };
    println!("{code} ({severity} by default)");
    println!();
    println!("{}", code.description());
    0
}
