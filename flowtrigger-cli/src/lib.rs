//! FlowTrigger CLI Library
//!
//! Command-line definitions and the commands behind the `flowtrigger`
//! binary, exposed for integration tests.

/// Command-line interface definitions and argument parsing
pub mod cli;
/// Error type carrying the process exit code
pub mod error;
/// Exit codes used by the CLI application
pub mod exit_codes;
/// Local flow runs
pub mod flow;
/// Execution log inspection
pub mod history;
/// Dry-run evaluation of trigger files
pub mod test_trigger;
/// Validation of flow and trigger definition files
pub mod validate;
