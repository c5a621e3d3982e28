//! tlogsync command-line entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use ts_common::MonthKey;
use ts_core::commands;
use ts_core::logging::{init_logging, LogFormat};
use ts_core::{ExitCode, MigrationReport};

#[derive(Debug, Parser)]
#[command(name = "tlogsync", version, about = "Sync game tlog files into MySQL")]
struct Cli {
    /// Configuration file (default: $TLOGSYNC_CONFIG, ./tlogsync.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging and statement dumps
    #[arg(long, global = true)]
    debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the ingestion pipeline until SIGINT/SIGTERM (default)
    Run,

    /// Run one migration pass for the current and next month, then exit
    Migrate,

    /// Drop columns the latest models no longer declare (dry run unless --apply)
    PruneColumns {
        /// Month whose tables are pruned, as YYYYMM (default: current month)
        #[arg(long, value_parser = parse_month)]
        month: Option<MonthKey>,

        /// Execute the statements instead of printing them
        #[arg(long)]
        apply: bool,
    },

    /// Print the DDL derived from the model description
    ShowSql {
        /// Month used for sharded table names, as YYYYMM (default: current month)
        #[arg(long, value_parser = parse_month)]
        month: Option<MonthKey>,
    },
}

fn parse_month(s: &str) -> Result<MonthKey, String> {
    s.parse()
}

fn print_report(report: &MigrationReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "failed to render report"),
    }
}

fn report_exit(report: &MigrationReport) -> ExitCode {
    if report.is_clean() {
        ExitCode::Clean
    } else {
        ExitCode::MigrationIncomplete
    }
}

async fn dispatch(cli: Cli) -> ts_common::Result<ExitCode> {
    let (_, settings) = commands::load_settings(cli.config.as_deref())?;
    let debug = cli.debug || settings.debug;
    init_logging(debug, cli.log_format);
    let settings = ts_config::Settings { debug, ..settings };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            commands::run(&settings).await?;
            Ok(ExitCode::Clean)
        }
        Command::Migrate => {
            let report = commands::migrate(&settings).await?;
            print_report(&report);
            Ok(report_exit(&report))
        }
        Command::PruneColumns { month, apply } => {
            let report = commands::prune_columns(&settings, month, apply).await?;
            print_report(&report);
            Ok(report_exit(&report))
        }
        Command::ShowSql { month } => {
            let registry = commands::load_registry(&settings)?;
            let month = month.unwrap_or_else(MonthKey::current);
            print!("{}", commands::render_ddl(&registry, month));
            Ok(ExitCode::Clean)
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let fallback = (cli.debug, cli.log_format);
    match dispatch(cli).await {
        Ok(code) => code.into(),
        Err(e) => {
            init_logging(fallback.0, fallback.1);
            error!(code = e.code(), error = %e, "tlogsync failed");
            ExitCode::from(&e).into()
        }
    }
}
