//! Error handling for the flowtrigger CLI
//!
//! A [`CliError`] pairs an [`anyhow::Error`] with the exit code the process
//! ends with. Context added with [`anyhow::Context`] shows up as the cause
//! chain when the error is printed.

use crate::exit_codes::{EXIT_ERROR, EXIT_WARNING};
use std::fmt;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub exit_code: i32,
    error: anyhow::Error,
}

impl CliError {
    /// Error with a plain message
    pub fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            exit_code,
            error: anyhow::Error::msg(message.into()),
        }
    }

    fn wrap(error: impl Into<anyhow::Error>, exit_code: i32) -> Self {
        Self {
            exit_code,
            error: error.into(),
        }
    }

    /// Message followed by one `Caused by:` line per source
    pub fn report(&self) -> String {
        let mut report = self.error.to_string();
        for cause in self.error.chain().skip(1) {
            report.push_str(&format!("\n  Caused by: {cause}"));
        }
        report
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Attach an exit code to any error `anyhow` can hold
pub trait IntoCliResult<T> {
    /// Runtime failure, exit code 1
    fn cli_general_error(self) -> CliResult<T>;
    /// Bad input or definition, exit code 2
    fn cli_validation_error(self) -> CliResult<T>;
}

impl<T, E: Into<anyhow::Error>> IntoCliResult<T> for Result<T, E> {
    fn cli_general_error(self) -> CliResult<T> {
        self.map_err(|e| CliError::wrap(e, EXIT_WARNING))
    }

    fn cli_validation_error(self) -> CliResult<T> {
        self.map_err(|e| CliError::wrap(e, EXIT_ERROR))
    }
}

/// Exit code of a command, printing the error report on failure
pub fn handle_cli_result(result: CliResult<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e.report());
            e.exit_code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes::EXIT_SUCCESS;
    use anyhow::Context;

    #[test]
    fn test_report_lists_context_then_cause() {
        let err = std::fs::read_to_string("/nonexistent/flow.yaml")
            .context("reading flow definition")
            .cli_validation_error()
            .unwrap_err();
        assert_eq!(err.exit_code, EXIT_ERROR);
        let report = err.report();
        assert!(report.starts_with("reading flow definition"));
        assert!(report.contains("\n  Caused by: "));
    }

    #[test]
    fn test_handle_result_passes_exit_codes_through() {
        assert_eq!(handle_cli_result(Ok(EXIT_SUCCESS)), EXIT_SUCCESS);
        assert_eq!(handle_cli_result(Ok(EXIT_WARNING)), EXIT_WARNING);
        assert_eq!(
            handle_cli_result(Err(CliError::new("bad", EXIT_ERROR))),
            EXIT_ERROR
        );
    }
}
