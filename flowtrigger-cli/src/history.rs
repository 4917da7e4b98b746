use crate::cli::OutputFormat;
use crate::error::{CliResult, IntoCliResult};
use crate::exit_codes::EXIT_SUCCESS;
use colored::*;
use flowtrigger::{ExecutionLog, ExecutionStatus, TriggerExecution, TriggerId};
use is_terminal::IsTerminal;
use std::path::Path;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};

#[derive(Tabled)]
struct ExecutionRow {
    #[tabled(rename = "Executed At")]
    executed_at: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Conditions")]
    conditions: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Actions")]
    actions: String,
    #[tabled(rename = "Time (ms)")]
    time_ms: u64,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&TriggerExecution> for ExecutionRow {
    fn from(record: &TriggerExecution) -> Self {
        let succeeded = record
            .actions_executed
            .iter()
            .filter(|a| a.result.ok)
            .count();
        Self {
            executed_at: record.executed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            trigger: record.trigger_id.to_string(),
            event: record.event_type.as_str().to_string(),
            conditions: if record.conditions_met { "met" } else { "not met" }.to_string(),
            status: record.status.to_string(),
            actions: format!("{}/{}", succeeded, record.actions_executed.len()),
            time_ms: record.execution_time_ms,
            message: record.error_message.clone().unwrap_or_default(),
        }
    }
}

pub fn run_history(
    log_dir: &Path,
    trigger: Option<&str>,
    cleanup_days: Option<u32>,
    format: OutputFormat,
) -> CliResult<i32> {
    let log = ExecutionLog::file_system(log_dir).cli_validation_error()?;

    if let Some(days) = cleanup_days {
        let removed = log.cleanup_older_than(days).cli_general_error()?;
        tracing::info!(removed, days, "old execution records removed");
    }

    let records = match trigger {
        Some(id) => log.list(&TriggerId::from(id)),
        None => log.list_all(),
    }
    .cli_general_error()?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&records).cli_general_error()?;
            println!("{json}");
        }
        OutputFormat::Table => print_table(&records),
    }
    Ok(EXIT_SUCCESS)
}

fn print_table(records: &[TriggerExecution]) {
    if records.is_empty() {
        println!("No executions recorded.");
        return;
    }

    let is_tty = std::io::stdout().is_terminal();
    let rows: Vec<ExecutionRow> = records.iter().map(ExecutionRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::modern());

    if is_tty {
        table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));
        for (i, record) in records.iter().enumerate() {
            // row 0 is the header
            let color = match record.status {
                ExecutionStatus::Success => Color::FG_GREEN,
                ExecutionStatus::PartialSuccess => Color::FG_YELLOW,
                ExecutionStatus::Failed => Color::FG_RED,
                ExecutionStatus::Scheduled => Color::FG_BLUE,
                ExecutionStatus::Skipped => continue,
            };
            table.with(Modify::new(Rows::one(i + 1)).with(color));
        }
    }

    table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));
    println!("{table}");

    let failed = records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Failed)
        .count();
    let summary = format!("{} executions, {} failed", records.len(), failed);
    if failed > 0 {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}
