mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use notekeep::{Config, Engine, Error, ShutdownSignal};
use tracing_subscriber::EnvFilter;

use commands::Commands;
use output::{ErrorResponse, print_json};

/// notekeep - local note search, link graph and sanitized AI tasks
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/notekeep/config.toml)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Override the notes root
    #[arg(long, global = true, value_name = "DIR")]
    notes: Option<PathBuf>,

    /// Log notekeep internals at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(target: "notekeep.cli", error = %err, "command failed");
            print_json(&ErrorResponse::from(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, Error> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(Some(path))?,
        None => Config::load()?,
    };
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }
    if let Some(notes) = &cli.notes {
        config.notes_root = notes.clone();
    }

    // SIGINT/SIGTERM never kill the process: every command ends in
    // `Engine::shutdown`.
    let signal = ShutdownSignal::register()?;
    let mut engine = Engine::open(config)?;
    engine.watch_shutdown(&signal);
    let code = commands::execute(&cli.command, &mut engine, &signal)?;
    engine.shutdown()?;
    Ok(code)
}

/// `RUST_LOG` wins; otherwise `notekeep=info` (or debug with `--verbose`).
/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "notekeep=debug" } else { "notekeep=info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(err: &Error) -> u8 {
    match err {
        Error::Config(_) | Error::InvalidInput(_) => 2,
        Error::Security(_) => 3,
        Error::QuotaExceeded { .. } => 4,
        Error::SearchTimeout { .. } => 5,
        Error::Migration(_) => 6,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["notekeep", "--verbose", "search", "rust", "--tag", "lang"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Search { ref tags, .. } if tags == &["lang"]));
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::parse_from(["notekeep", "index", "--db", "/tmp/n.db"]);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/n.db")));
        assert!(matches!(cli.command, Commands::Index));
    }

    #[test]
    fn test_task_enqueue_parsing() {
        let cli = Cli::parse_from([
            "notekeep",
            "task",
            "enqueue",
            "classify",
            "--payload",
            r#"{"content":"x","categories":["a"]}"#,
        ]);
        assert!(matches!(
            cli.command,
            Commands::Task(commands::TaskCommand::Enqueue {
                task_type: notekeep::TaskType::Classify,
                ..
            })
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Error::Security("blocked".to_string())), 3);
        assert_eq!(
            exit_code(&Error::SearchTimeout {
                elapsed_ms: 10,
                budget_ms: 5
            }),
            5
        );
        assert_eq!(exit_code(&Error::Task("boom".to_string())), 1);
    }
}
