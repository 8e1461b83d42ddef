pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "karigar",
    about = "Karigar operator CLI",
    long_about = "Inspect Karigar configuration, check runtime readiness, apply migrations, and look up mission weeks.",
    after_help = "Examples:\n  karigar doctor --json\n  karigar config\n  karigar week --date 2026-01-15"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Telegram token readiness, DB connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show the mission week key for a date (defaults to today in the mission timezone)")]
    Week {
        #[arg(long, help = "Calendar date as YYYY-MM-DD")]
        date: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Week { date } => commands::week::run(date.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
