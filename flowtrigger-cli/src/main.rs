use clap::CommandFactory;
use flowtrigger_cli::cli::{Cli, Commands};
use flowtrigger_cli::error::handle_cli_result;
use flowtrigger_cli::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use flowtrigger_cli::{flow, history, test_trigger, validate};
use std::process;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if cli.command.is_none() {
        let code = match Cli::command().print_help() {
            Ok(()) => EXIT_SUCCESS,
            Err(_) => EXIT_ERROR,
        };
        process::exit(code);
    }

    let log_level = if cli.quiet {
        Level::ERROR
    } else if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::TRACE
    } else {
        Level::WARN
    };

    // RUST_LOG overrides the flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let result = match cli.command {
        Some(Commands::TestTrigger {
            trigger_file,
            data,
            format,
        }) => {
            tracing::info!("Running test-trigger command");
            test_trigger::run_test_trigger(&trigger_file, &data, format)
        }
        Some(Commands::Validate { files, format }) => {
            tracing::info!("Running validate command");
            validate::run_validate(&files, format, cli.quiet)
        }
        Some(Commands::Flow { subcommand }) => {
            tracing::info!("Running flow command");
            flow::run_flow_command(subcommand).await
        }
        Some(Commands::History {
            log_dir,
            trigger,
            cleanup_days,
            format,
        }) => {
            tracing::info!("Running history command");
            history::run_history(&log_dir, trigger.as_deref(), cleanup_days, format)
        }
        None => Ok(EXIT_SUCCESS),
    };

    process::exit(handle_cli_result(result));
}
