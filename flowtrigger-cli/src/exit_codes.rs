//! Exit code constants for CLI commands
//!
//! - 0: Success
//! - 1: General error, or trigger conditions not met
//! - 2: Validation errors or unreadable definitions

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// General error or a negative result
pub const EXIT_WARNING: i32 = 1;

/// Validation errors or critical failures
pub const EXIT_ERROR: i32 = 2;
