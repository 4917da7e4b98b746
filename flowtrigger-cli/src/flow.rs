use crate::cli::{FlowSubcommand, OutputFormat};
use crate::error::{CliError, CliResult, IntoCliResult};
use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use crate::test_trigger::parse_object;
use anyhow::Context;
use colored::*;
use flowtrigger::events::EventPublisher;
use flowtrigger::flow::{LevelTransition, ResolvedBy};
use flowtrigger::storage::{load_flow_file, MemoryFlowStore};
use flowtrigger::{DomainEvent, EventData, FlowProgression, InstanceStatus, NextLevel};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub async fn run_flow_command(subcommand: FlowSubcommand) -> CliResult<i32> {
    match subcommand {
        FlowSubcommand::Run {
            flow_file,
            level_data,
            format,
        } => run_flow(&flow_file, &level_data, format).await,
    }
}

/// Resolve a `--level-data` value: inline JSON or `@path`
pub fn level_data_from_arg(arg: &str) -> CliResult<EventData> {
    let content = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading --level-data file {path}"))
            .cli_validation_error()?,
        None => arg.to_string(),
    };
    parse_object(&content)
        .map_err(|message| CliError::new(format!("invalid --level-data '{arg}': {message}"), EXIT_ERROR))
}

#[derive(Serialize)]
struct RunReport {
    flow_id: String,
    instance_id: String,
    transitions: Vec<LevelTransition>,
    events: Vec<DomainEvent>,
}

async fn run_flow(flow_file: &Path, level_args: &[String], format: OutputFormat) -> CliResult<i32> {
    let mut flow = load_flow_file(flow_file).cli_validation_error()?;
    if !flow.is_published() {
        tracing::debug!(flow_id = %flow.id(), "publishing draft flow for the run");
        flow.publish().cli_validation_error()?;
    }
    let flow_id = flow.id().clone();

    let mut submissions = level_args
        .iter()
        .map(|arg| level_data_from_arg(arg))
        .collect::<CliResult<Vec<_>>>()?
        .into_iter();

    let store = Arc::new(MemoryFlowStore::new());
    store.store_flow(flow);
    let (publisher, mut events) = EventPublisher::channel();
    let progression = FlowProgression::new(store, publisher);

    let instance = progression.start(&flow_id).await.cli_validation_error()?;
    let mut transitions = Vec::new();
    let mut current = instance.clone();

    while current.status() == InstanceStatus::Running {
        let Some(level_id) = current.current_level_id().cloned() else {
            break;
        };
        let data = submissions.next().unwrap_or_else(EventData::new);
        let transition = progression
            .complete_level(current.id(), &level_id, data)
            .await
            .cli_general_error()?;
        current = transition.instance.clone();
        transitions.push(transition);
    }

    if submissions.next().is_some() {
        tracing::warn!("flow completed before all --level-data values were used");
    }

    let mut emitted = Vec::new();
    while let Ok(event) = events.try_recv() {
        emitted.push(event);
    }

    match format {
        OutputFormat::Json => {
            let report = RunReport {
                flow_id: flow_id.to_string(),
                instance_id: instance.id().to_string(),
                transitions,
                events: emitted,
            };
            let json = serde_json::to_string_pretty(&report).cli_general_error()?;
            println!("{json}");
        }
        OutputFormat::Table => {
            println!(
                "{} {} ({})",
                "Started".green().bold(),
                flow_id.to_string().cyan(),
                instance.id()
            );
            for transition in &transitions {
                println!("{}", describe_transition(transition));
            }
            println!(
                "{} {} events emitted",
                "Completed".green().bold(),
                emitted.len()
            );
        }
    }

    Ok(EXIT_SUCCESS)
}

fn describe_transition(transition: &LevelTransition) -> String {
    let next = match &transition.resolution.next {
        NextLevel::Level(id) => id.to_string(),
        NextLevel::Complete => "complete".to_string(),
    };
    let via = match &transition.resolution.via {
        ResolvedBy::Branch(id) => format!("branch {id}"),
        ResolvedBy::Sequential => "sequential".to_string(),
        ResolvedBy::End => "end of flow".to_string(),
    };
    let mut line = format!("  {} -> {} via {}", transition.completed_level, next.bold(), via);
    for evaluation in &transition.resolution.evaluations {
        let mark = if evaluation.matched {
            "matched".green()
        } else {
            "no match".yellow()
        };
        line.push_str(&format!(
            "\n      branch {} (priority {}) -> {}: {}",
            evaluation.branch_id, evaluation.priority, evaluation.to_level_id, mark
        ));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_and_file_level_data() {
        assert_eq!(level_data_from_arg("{\"amount\": 3}").unwrap()["amount"], 3);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("level.json");
        std::fs::write(&path, "{\"ok\": true}").unwrap();
        let data = level_data_from_arg(&format!("@{}", path.display())).unwrap();
        assert_eq!(data["ok"], true);

        let err = level_data_from_arg("[1]").unwrap_err();
        assert_eq!(err.exit_code, EXIT_ERROR);
    }
}
