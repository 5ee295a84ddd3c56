//! Command handlers for the notekeep CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use notekeep::engine::SHUTDOWN_TIMEOUT;
use notekeep::{
    Engine, Error, GraphFormat, Maturity, SearchFilters, SearchOptions, ShutdownSignal,
    TaskStatus, TaskType,
};

use crate::output::{
    EnqueueResponse, ExportResponse, WorkerExitResponse, print_json, print_json_line,
};

/// How often `worker run` checks for events and termination signals.
const EVENT_POLL: Duration = Duration::from_millis(200);

/// Commands supported by the notekeep CLI.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Incrementally index the notes root
    Index,
    /// Drop the index and rebuild it from every note
    Reindex,
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results
        #[arg(short = 'l', long, default_value = "10")]
        limit: usize,

        /// Category prefix, e.g. 10 or 10.01
        #[arg(long)]
        category: Option<String>,

        /// Required tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Accepted maturity (repeatable): draft, review, stable, deprecated
        #[arg(long, value_parser = parse_maturity)]
        maturity: Vec<Maturity>,

        /// Include notes under archive directories
        #[arg(long)]
        include_archive: bool,

        /// Rebuild the index before searching
        #[arg(long)]
        reindex: bool,
    },
    /// Link graph reports and exports
    #[command(subcommand)]
    Graph(GraphCommand),
    /// AI task queue
    #[command(subcommand)]
    Task(TaskCommand),
    /// Background worker
    #[command(subcommand)]
    Worker(WorkerCommand),
    /// Queue counts and worker state
    Status,
    Version,
}

#[derive(clap::Subcommand)]
pub enum GraphCommand {
    Stats {
        /// Number of hubs to report
        #[arg(long, default_value = "10")]
        top: usize,

        #[arg(long)]
        include_archive: bool,
    },
    Export {
        /// Output file
        path: PathBuf,

        /// dot or json
        #[arg(long, default_value = "dot", value_parser = parse_graph_format)]
        format: GraphFormat,

        #[arg(long)]
        include_archive: bool,
    },
}

#[derive(clap::Subcommand)]
pub enum TaskCommand {
    Enqueue {
        /// classify, summarize or synthesize
        #[arg(value_parser = parse_task_type)]
        task_type: TaskType,

        /// JSON payload, e.g. '{"path": "10-19 Work/plan.md"}'
        #[arg(short = 'p', long, default_value = "{}")]
        payload: String,
    },
    Get {
        id: i64,
    },
    List {
        /// pending, processing, done or failed
        #[arg(long, value_parser = parse_task_status)]
        status: Option<TaskStatus>,

        #[arg(short = 'l', long, default_value = "20")]
        limit: usize,
    },
}

#[derive(clap::Subcommand)]
pub enum WorkerCommand {
    /// Run the worker until SIGINT or SIGTERM
    Run,
    /// Execute every pending task, then exit
    Drain,
}

fn parse_maturity(value: &str) -> Result<Maturity, String> {
    Maturity::parse(value).ok_or_else(|| format!("unknown maturity: {value}"))
}

fn parse_graph_format(value: &str) -> Result<GraphFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "dot" => Ok(GraphFormat::Dot),
        "json" => Ok(GraphFormat::Json),
        other => Err(format!("unknown graph format: {other}")),
    }
}

fn parse_task_type(value: &str) -> Result<TaskType, String> {
    TaskType::parse(value).ok_or_else(|| format!("unknown task type: {value}"))
}

fn parse_task_status(value: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(value).ok_or_else(|| format!("unknown task status: {value}"))
}

/// Execute a CLI command.
///
/// `signal` is the process-wide termination signal; `worker run` blocks on
/// it and indexing stops between batches when it fires.
pub fn execute(
    command: &Commands,
    engine: &mut Engine,
    signal: &ShutdownSignal,
) -> Result<ExitCode, Error> {
    match command {
        Commands::Index => print_json(&engine.index()?),
        Commands::Reindex => print_json(&engine.reindex()?),
        Commands::Search {
            query,
            limit,
            category,
            tags,
            maturity,
            include_archive,
            reindex,
        } => {
            let options = SearchOptions {
                limit: *limit,
                filters: SearchFilters {
                    category: category.clone(),
                    tags: tags.clone(),
                    maturity: maturity.clone(),
                },
                include_archive: *include_archive,
                reindex: *reindex,
            };
            print_json(&engine.search(query, &options)?);
        }
        Commands::Graph(graph) => handle_graph(graph, engine)?,
        Commands::Task(task) => return handle_task(task, engine),
        Commands::Worker(WorkerCommand::Run) => handle_worker_run(engine, signal)?,
        Commands::Worker(WorkerCommand::Drain) => print_json(&engine.run_pending()?),
        Commands::Status => print_json(&engine.worker_status()?),
        Commands::Version => print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "name": env!("CARGO_PKG_NAME")
        })),
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_graph(command: &GraphCommand, engine: &Engine) -> Result<(), Error> {
    match command {
        GraphCommand::Stats {
            top,
            include_archive,
        } => print_json(&engine.graph_stats(*include_archive, *top)?),
        GraphCommand::Export {
            path,
            format,
            include_archive,
        } => {
            engine.export_graph(path, *format, *include_archive)?;
            print_json(&ExportResponse {
                status: "exported".to_string(),
                path: path.display().to_string(),
            });
        }
    }
    Ok(())
}

fn handle_task(command: &TaskCommand, engine: &Engine) -> Result<ExitCode, Error> {
    match command {
        TaskCommand::Enqueue { task_type, payload } => {
            let payload: serde_json::Value = serde_json::from_str(payload)
                .map_err(|e| Error::InvalidInput(format!("payload is not JSON: {e}")))?;
            let id = engine.enqueue_task(*task_type, &payload)?;
            print_json(&EnqueueResponse {
                status: "queued".to_string(),
                id,
                task_type: *task_type,
            });
        }
        TaskCommand::Get { id } => match engine.task(*id)? {
            Some(task) => print_json(&task),
            None => {
                print_json(&serde_json::json!({ "error": format!("task {id} not found") }));
                return Ok(ExitCode::from(2));
            }
        },
        TaskCommand::List { status, limit } => print_json(&engine.tasks(*status, *limit)?),
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_worker_run(engine: &mut Engine, signal: &ShutdownSignal) -> Result<(), Error> {
    let events = engine.subscribe();
    engine.start_worker()?;

    let mut processed = 0;
    loop {
        for event in events.try_iter() {
            processed += 1;
            print_json_line(&event);
        }
        if signal.wait(Some(EVENT_POLL)) {
            break;
        }
    }

    let outcome = engine.stop_worker(SHUTDOWN_TIMEOUT);
    processed += events.try_iter().inspect(|e| print_json_line(e)).count();
    print_json(&WorkerExitResponse {
        status: "stopped".to_string(),
        outcome,
        processed,
    });
    Ok(())
}
