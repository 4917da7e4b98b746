//! Validation of flow and trigger definition files

use crate::cli::OutputFormat;
use crate::error::{CliResult, IntoCliResult};
use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use colored::*;
use flowtrigger::storage::{load_flow_file, load_trigger_file};
use flowtrigger::validation::Validatable;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Kind of definition a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Flow,
    Trigger,
}

/// Validation outcome of one file
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub kind: Option<DefinitionKind>,
    pub id: Option<String>,
    pub error: Option<String>,
}

impl FileReport {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Decide whether a file holds a flow or a trigger
///
/// JSON is a subset of YAML, so one parser covers both extensions.
pub fn detect_kind(path: &Path) -> Result<DefinitionKind, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| e.to_string())?;
    let mapping = value
        .as_mapping()
        .ok_or_else(|| "definition must be a mapping".to_string())?;
    if mapping.contains_key("levels") {
        Ok(DefinitionKind::Flow)
    } else {
        Ok(DefinitionKind::Trigger)
    }
}

/// Validate one file
pub fn validate_file(path: &Path) -> FileReport {
    let mut report = FileReport {
        path: path.to_path_buf(),
        kind: None,
        id: None,
        error: None,
    };

    let kind = match detect_kind(path) {
        Ok(kind) => kind,
        Err(e) => {
            report.error = Some(e);
            return report;
        }
    };
    report.kind = Some(kind);

    let outcome = match kind {
        DefinitionKind::Flow => load_flow_file(path)
            .map_err(|e| e.to_string())
            .and_then(|flow| {
                report.id = Some(flow.id().to_string());
                flow.validate().map_err(|e| e.to_string())
            }),
        DefinitionKind::Trigger => load_trigger_file(path)
            .map(|trigger| report.id = Some(trigger.id.to_string()))
            .map_err(|e| e.to_string()),
    };
    report.error = outcome.err();
    report
}

pub fn run_validate(files: &[PathBuf], format: OutputFormat, quiet: bool) -> CliResult<i32> {
    let reports: Vec<FileReport> = files.iter().map(|path| validate_file(path)).collect();
    let failed = reports.iter().filter(|r| !r.is_valid()).count();
    tracing::debug!(files = reports.len(), failed, "validation finished");

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&reports).cli_general_error()?;
            println!("{json}");
        }
        OutputFormat::Table => {
            for report in &reports {
                let kind = match report.kind {
                    Some(DefinitionKind::Flow) => "flow",
                    Some(DefinitionKind::Trigger) => "trigger",
                    None => "unknown",
                };
                match &report.error {
                    None if !quiet => println!(
                        "{} {} ({} {})",
                        "✓".green(),
                        report.path.display(),
                        kind,
                        report.id.as_deref().unwrap_or("-")
                    ),
                    None => {}
                    Some(error) => println!(
                        "{} {} ({})\n    {}",
                        "✗".red(),
                        report.path.display(),
                        kind,
                        error.red()
                    ),
                }
            }
            if failed > 0 {
                println!("\n{} {} of {} files invalid.", "✗".red(), failed, reports.len());
            } else if !quiet {
                println!("\n{} Validation passed!", "✓".green());
            }
        }
    }

    Ok(if failed > 0 { EXIT_ERROR } else { EXIT_SUCCESS })
}
