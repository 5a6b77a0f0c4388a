pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "showroom",
    about = "Showroom operator CLI",
    long_about = "Inspect configuration, check readiness, migrate the session store, and manage conversation sessions.",
    after_help = "Examples:\n  showroom doctor --json\n  showroom journey --session session_1a2b --user dana\n  showroom purge-sessions --confirm"
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
    #[command(about = "Validate config, extractor readiness, DB connectivity and schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Delete every working-memory session; long-term preferences are kept")]
    PurgeSessions {
        #[arg(long, help = "Required: acknowledge that all sessions will be deleted")]
        confirm: bool,
    },
    #[command(about = "Print the current journey of one session as JSON")]
    Journey {
        #[arg(long, help = "Session id to read")]
        session: String,
        #[arg(long, help = "User id that owns the session")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let (passed, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code: if passed { 0 } else { 1 }, output }
        }
        Command::PurgeSessions { confirm } => commands::purge_sessions::run(confirm),
        Command::Journey { session, user } => commands::journey::run(&session, &user),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
