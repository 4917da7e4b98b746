use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "flowtrigger")]
#[command(version)]
#[command(about = "Test triggers, validate definitions and run flows locally")]
#[command(long_about = "
flowtrigger evaluates trigger conditions and walks flows through their
levels without any connectors attached. Use it to check definitions
before they are deployed.

Example usage:
  flowtrigger test-trigger notify.yaml --data sample.json
  flowtrigger validate flows/*.yaml triggers/*.yaml
  flowtrigger flow run approval.yaml --level-data '{\"amount\": 5000}'
  flowtrigger history ./logs --trigger notify
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a trigger definition against sample event data
    #[command(long_about = "
Evaluates the conditions of a trigger file against a JSON sample without
gating, deduplication or actions, and prints the condition trace.

Exit codes:
  0 - Conditions met
  1 - Conditions not met
  2 - The trigger or the sample could not be loaded

Example:
  flowtrigger test-trigger notify.yaml --data sample.json --format json
")]
    TestTrigger {
        /// Trigger definition (.yaml, .yml or .json)
        trigger_file: PathBuf,

        /// JSON file holding the event data
        #[arg(long)]
        data: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Validate flow and trigger definition files
    #[command(long_about = "
Checks each file for syntax and structural errors. Files with a `levels`
key are validated as flows, everything else as triggers.

Exit codes:
  0 - All files are valid
  2 - At least one file is invalid
")]
    Validate {
        /// Files to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Flow commands
    Flow {
        #[command(subcommand)]
        subcommand: FlowSubcommand,
    },
    /// Show recorded trigger executions
    History {
        /// Directory of the file-backed execution log
        log_dir: PathBuf,

        /// Only show this trigger
        #[arg(long)]
        trigger: Option<String>,

        /// Delete records older than this many days first
        #[arg(long)]
        cleanup_days: Option<u32>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum FlowSubcommand {
    /// Run a flow through the state machine, printing every transition
    #[command(long_about = "
Starts one instance of the flow and completes its levels in order. Each
--level-data value is a JSON object (or @file) submitted for the next
level; levels beyond the supplied data complete with empty data.

Example:
  flowtrigger flow run approval.yaml --level-data '{\"amount\": 5000}' --level-data @review.json
")]
    Run {
        /// Flow definition (.yaml, .yml or .json)
        flow_file: PathBuf,

        /// Data submitted for each level, in order
        #[arg(long = "level-data")]
        level_data: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn try_parse_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }
}
