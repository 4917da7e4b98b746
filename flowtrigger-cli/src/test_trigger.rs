use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult, IntoCliResult};
use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_WARNING};
use anyhow::Context;
use colored::*;
use flowtrigger::storage::load_trigger_file;
use flowtrigger::{EventData, TestReport, TriggerDispatcher};
use std::path::Path;

/// Read a JSON object from a file
pub fn load_sample(path: &Path) -> CliResult<EventData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading sample data {}", path.display()))
        .cli_validation_error()?;
    parse_object(&content).map_err(|message| {
        CliError::new(format!("{}: {}", path.display(), message), EXIT_ERROR)
    })
}

/// Parse a JSON object, rejecting other JSON values
pub fn parse_object(content: &str) -> Result<EventData, String> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {other}")),
        Err(e) => Err(e.to_string()),
    }
}

pub fn run_test_trigger(trigger_file: &Path, data: &Path, format: OutputFormat) -> CliResult<i32> {
    let trigger = load_trigger_file(trigger_file).cli_validation_error()?;
    let sample = load_sample(data)?;
    tracing::debug!(trigger_id = %trigger.id, "evaluating trigger against {:?}", data);

    let report = TriggerDispatcher::test_definition(&trigger, &sample);
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).cli_general_error()?;
            println!("{json}");
        }
        OutputFormat::Table => print_report(&report),
    }

    Ok(if report.conditions_met {
        EXIT_SUCCESS
    } else {
        EXIT_WARNING
    })
}

fn print_report(report: &TestReport) {
    let verdict = if report.conditions_met {
        "conditions met".green().bold()
    } else {
        "conditions not met".red().bold()
    };
    println!(
        "{} {} ({:.3} ms)",
        report.trigger_id.to_string().cyan(),
        verdict,
        report.evaluation_time_ms
    );
    print!("{}", report.trace);
}
