use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use taskweave::config::Config;
use taskweave::handlers::HandlerCatalog;
use taskweave::log::LogOptions;
use taskweave::orchestration::{parse_decomposition, RunReport, StaticDecomposer};
use taskweave::{Orchestrator, Outcome, Payload, Result};

/// taskweave - run dependency graphs of typed tasks across worker pools
#[derive(Parser, Debug)]
#[command(name = "taskweave")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    TASKWEAVE_DEBUG=1   Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.taskweave/taskweave.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute a decomposed plan with the configured workers
    Run {
        /// Plan file in decomposition JSON format
        #[arg(short, long)]
        plan: PathBuf,

        /// Abort the run after this many seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Print the outcome map as pretty JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a plan against the configured workers without running it
    Validate {
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// List built-in handler names
    Handlers,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    taskweave::log::init(LogOptions {
        debug: cli.debug,
        file: config.log_path(),
        json: config.log_json,
    })?;

    let catalog = HandlerCatalog::builtin();
    match cli.command {
        Command::Handlers => {
            for name in catalog.names() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Validate { plan } => {
            let orchestrator = config
                .into_builder(&catalog)?
                .build(StaticDecomposer::default())?;
            let graph = orchestrator.validate(read_plan(&plan)?)?;
            info!(tasks = graph.len(), depth = graph.depth(), "plan is valid");
            for id in graph.topological_order() {
                println!("{}", id);
            }
            Ok(())
        }
        Command::Run {
            plan,
            timeout,
            json,
        } => {
            let mut builder = config.into_builder(&catalog)?;
            if let Some(secs) = timeout {
                builder = builder.run_timeout(Duration::from_secs(secs));
            }
            let orchestrator = builder.build(StaticDecomposer::new(read_plan(&plan)?))?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(run(&orchestrator))?;
            print_report(&report, json)?;

            if !report.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run(orchestrator: &Orchestrator) -> Result<RunReport> {
    orchestrator.execute(&Payload::new()).await
}

fn read_plan(path: &Path) -> Result<Vec<taskweave::TaskDescriptor>> {
    parse_decomposition(&fs::read_to_string(path)?)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    let outcomes = report.outcomes()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    for (id, outcome) in &outcomes {
        match outcome {
            Outcome::Completed { output } => println!("{}\tcompleted\t{}", id, output),
            Outcome::Failed { error } => println!("{}\tfailed\t{}", id, error),
            Outcome::Blocked { reason } => println!("{}\tblocked\t{}", id, reason),
        }
    }
    let summary = report.summary();
    println!(
        "run {}: {} completed, {} failed, {} blocked{}",
        report.run_id.short(),
        summary.completed,
        summary.failed,
        summary.blocked,
        if report.timed_out { " (timed out)" } else { "" }
    );
    Ok(())
}
