//! Stable error codes for build diagnostics.
//!
//! Each code is a unique identifier (e.g., `E5210`) with the first digit
//! indicating the build phase. Used for `ubuild explain` lookups.

use std::fmt;

/// Error codes for all build diagnostics.
///
/// Format: E#### where first digit indicates phase:
/// - E0xxx: Configuration errors
/// - E1xxx: File system and cache errors
/// - E2xxx: Module resolution errors
/// - E3xxx: AOT compilation errors
/// - E4xxx: Generated source (glue, registration, wrappers) errors
/// - E5xxx: Native compile, link, merge and post-link errors
/// - E9xxx: Internal errors
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ErrorCode {
    // Configuration (E0xxx)
    /// Invalid ABI string
    E0015,
    /// Root module name conflicts with a referenced module
    E0023,
    /// Reference to a different platform product module
    E0034,
    /// Unknown platform or build target
    E0071,
    /// Deployment target below the platform minimum
    E0073,
    /// Deployment target above the SDK version
    E0074,
    /// Architecture not valid for the platform
    E0075,
    /// No architecture specified
    E0076,
    /// Debug data for the symbol manifest is missing (warning)
    E0095,

    // File system and cache (E1xxx)
    /// Could not read a file
    E1001,
    /// Could not write a file
    E1002,
    /// Build cache was invalid and has been cleared (warning)
    E1003,
    /// Could not copy a file
    E1009,
    /// Could not extract an embedded native library (warning)
    E1302,

    // Module resolution (E2xxx)
    /// Cannot resolve a module reference
    E2002,
    /// Two modules in one build half share a base file name
    E2003,
    /// A module file could not be loaded
    E2009,

    // AOT compilation (E3xxx)
    /// AOT compilation of a module failed
    E3001,
    /// AOT restriction violated by a managed method
    E3002,
    /// Debugging disabled because LLVM is enabled (warning)
    E3003,
    /// Bitcode requires LLVM
    E3008,

    // Generated sources (E4xxx)
    /// Failed to generate a glue source file
    E4001,
    /// Failed to compile foreign-function wrappers
    E4002,
    /// Failed to compile the bridging registration code
    E4109,

    // Native compile, link, merge, post-link (E5xxx)
    /// Failed to compile the glue stub
    E5103,
    /// Failed to compile a native source or assembly file
    E5106,
    /// Native linking failed; review the user-supplied linker flags
    E5201,
    /// Native linking failed
    E5202,
    /// Native linker warning (warning)
    E5203,
    /// Native linker error
    E5209,
    /// Undefined native symbol
    E5210,
    /// Undefined Objective-C class
    E5211,
    /// Duplicate native symbol
    E5212,
    /// Location of a duplicate native symbol
    E5213,
    /// Undefined symbol referenced by a managed member
    E5214,
    /// Native reference may need additional frameworks (warning)
    E5215,
    /// Universal-binary merge failed
    E5301,
    /// Native strip failed
    E5302,
    /// Debug-symbol bundle generation failed
    E5303,
    /// Output deduplication failed
    E5305,
    /// External tool exceeded its wall-clock timeout
    E5310,
    /// External tool not found
    E5311,

    // Internal (E9xxx)
    /// Internal error
    E9001,
    /// Worker thread panicked
    E9002,
}

impl ErrorCode {
    /// All error codes, for iteration and lookup.
    pub const ALL: &[ErrorCode] = &[
        ErrorCode::E0015,
        ErrorCode::E0023,
        ErrorCode::E0034,
        ErrorCode::E0071,
        ErrorCode::E0073,
        ErrorCode::E0074,
        ErrorCode::E0075,
        ErrorCode::E0076,
        ErrorCode::E0095,
        ErrorCode::E1001,
        ErrorCode::E1002,
        ErrorCode::E1003,
        ErrorCode::E1009,
        ErrorCode::E1302,
        ErrorCode::E2002,
        ErrorCode::E2003,
        ErrorCode::E2009,
        ErrorCode::E3001,
        ErrorCode::E3002,
        ErrorCode::E3003,
        ErrorCode::E3008,
        ErrorCode::E4001,
        ErrorCode::E4002,
        ErrorCode::E4109,
        ErrorCode::E5103,
        ErrorCode::E5106,
        ErrorCode::E5201,
        ErrorCode::E5202,
        ErrorCode::E5203,
        ErrorCode::E5209,
        ErrorCode::E5210,
        ErrorCode::E5211,
        ErrorCode::E5212,
        ErrorCode::E5213,
        ErrorCode::E5214,
        ErrorCode::E5215,
        ErrorCode::E5301,
        ErrorCode::E5302,
        ErrorCode::E5303,
        ErrorCode::E5305,
        ErrorCode::E5310,
        ErrorCode::E5311,
        ErrorCode::E9001,
        ErrorCode::E9002,
    ];

    /// Get the code as a string (e.g., "E5210").
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E0015 => "E0015",
            ErrorCode::E0023 => "E0023",
            ErrorCode::E0034 => "E0034",
            ErrorCode::E0071 => "E0071",
            ErrorCode::E0073 => "E0073",
            ErrorCode::E0074 => "E0074",
            ErrorCode::E0075 => "E0075",
            ErrorCode::E0076 => "E0076",
            ErrorCode::E0095 => "E0095",
            ErrorCode::E1001 => "E1001",
            ErrorCode::E1002 => "E1002",
            ErrorCode::E1003 => "E1003",
            ErrorCode::E1009 => "E1009",
            ErrorCode::E1302 => "E1302",
            ErrorCode::E2002 => "E2002",
            ErrorCode::E2003 => "E2003",
            ErrorCode::E2009 => "E2009",
            ErrorCode::E3001 => "E3001",
            ErrorCode::E3002 => "E3002",
            ErrorCode::E3003 => "E3003",
            ErrorCode::E3008 => "E3008",
            ErrorCode::E4001 => "E4001",
            ErrorCode::E4002 => "E4002",
            ErrorCode::E4109 => "E4109",
            ErrorCode::E5103 => "E5103",
            ErrorCode::E5106 => "E5106",
            ErrorCode::E5201 => "E5201",
            ErrorCode::E5202 => "E5202",
            ErrorCode::E5203 => "E5203",
            ErrorCode::E5209 => "E5209",
            ErrorCode::E5210 => "E5210",
            ErrorCode::E5211 => "E5211",
            ErrorCode::E5212 => "E5212",
            ErrorCode::E5213 => "E5213",
            ErrorCode::E5214 => "E5214",
            ErrorCode::E5215 => "E5215",
            ErrorCode::E5301 => "E5301",
            ErrorCode::E5302 => "E5302",
            ErrorCode::E5303 => "E5303",
            ErrorCode::E5305 => "E5305",
            ErrorCode::E5310 => "E5310",
            ErrorCode::E5311 => "E5311",
            ErrorCode::E9001 => "E9001",
            ErrorCode::E9002 => "E9002",
        }
    }

    /// The numeric part of the code (e.g., `5210` for `E5210`).
    pub fn number(&self) -> u16 {
        self.as_str()[1..].parse().unwrap_or(0)
    }

    /// One-line description used by `ubuild explain`.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::E0015 => "The ABI string is not one of the recognized architectures",
            ErrorCode::E0023 => "The root module has the same name as a module it references",
            ErrorCode::E0034 => {
                "A module references the product module of a different platform"
            }
            ErrorCode::E0071 => "Unknown platform or build target",
            ErrorCode::E0073 => "The deployment target is below the minimum supported version",
            ErrorCode::E0074 => "The deployment target is newer than the SDK",
            ErrorCode::E0075 => "The architecture is not valid for the selected platform",
            ErrorCode::E0076 => "No architecture was specified for a platform that requires one",
            ErrorCode::E0095 => "AOT debug data could not be found for the symbol manifest",
            ErrorCode::E1001 => "A file could not be read",
            ErrorCode::E1002 => "A file could not be written",
            ErrorCode::E1003 => "The build cache was invalid and has been cleared",
            ErrorCode::E1009 => "A file could not be copied",
            ErrorCode::E1302 => "A native library embedded in a module could not be extracted",
            ErrorCode::E2002 => "A module reference could not be resolved",
            ErrorCode::E2003 => "Two modules in the same build share a file name",
            ErrorCode::E2009 => "A module file could not be loaded",
            ErrorCode::E3001 => "The AOT compiler failed on a module",
            ErrorCode::E3002 => "A managed method violates an AOT restriction",
            ErrorCode::E3003 => "Debugging was disabled because LLVM code generation is enabled",
            ErrorCode::E3008 => "Bitcode requires LLVM code generation",
            ErrorCode::E4001 => "A glue source file could not be generated",
            ErrorCode::E4002 => "The foreign-function wrappers failed to compile",
            ErrorCode::E4109 => "The bridging registration code failed to compile",
            ErrorCode::E5103 => "The glue stub failed to compile",
            ErrorCode::E5106 => "A native source or assembly file failed to compile",
            ErrorCode::E5201 => {
                "Native linking failed; review the additional linker flags supplied to the build"
            }
            ErrorCode::E5202 => "Native linking failed",
            ErrorCode::E5203 => "The native linker reported a warning",
            ErrorCode::E5209 => "The native linker reported an error",
            ErrorCode::E5210 => "A native symbol is undefined",
            ErrorCode::E5211 => "An Objective-C class is undefined",
            ErrorCode::E5212 => "A native symbol is defined more than once",
            ErrorCode::E5213 => "One of the locations of a duplicate native symbol",
            ErrorCode::E5214 => "A native symbol referenced from managed code is undefined",
            ErrorCode::E5215 => "A native library reference may require additional frameworks",
            ErrorCode::E5301 => "The universal-binary merge tool failed",
            ErrorCode::E5302 => "The native strip tool failed",
            ErrorCode::E5303 => "The debug-symbol bundle could not be generated",
            ErrorCode::E5305 => "Deduplicating the output directories failed",
            ErrorCode::E5310 => "An external tool exceeded its wall-clock timeout",
            ErrorCode::E5311 => "An external tool could not be found",
            ErrorCode::E9001 => "Internal error",
            ErrorCode::E9002 => "A worker thread panicked",
        }
    }

    /// Check if this is a configuration error (E0xxx).
    pub fn is_config_error(&self) -> bool {
        self.as_str().starts_with("E0")
    }

    /// Check if this is a native link, merge or post-link code (E5xxx).
    pub fn is_native_error(&self) -> bool {
        self.as_str().starts_with("E5")
    }

    /// Check if this is an internal error (E9xxx).
    pub fn is_internal_error(&self) -> bool {
        self.as_str().starts_with("E9")
    }

    /// Check if diagnostics with this code default to warning severity.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ErrorCode::E0095
                | ErrorCode::E1003
                | ErrorCode::E3003
                | ErrorCode::E1302
                | ErrorCode::E5203
                | ErrorCode::E5215
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse an error code string like `"E5210"` or a bare number like `"5210"`.
///
/// Case-insensitive.
impl std::str::FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let wanted = if upper.starts_with('E') {
            upper
        } else {
            format!("E{upper:0>4}")
        };
        Self::ALL
            .iter()
            .find(|code| code.as_str() == wanted)
            .copied()
            .ok_or(())
    }
}
