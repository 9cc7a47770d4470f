use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stateset_demand::{
    config,
    ml::{
        artifact::{ArtifactStore, ModelRegistry},
        runner::InProcessRunner,
        worker::{self, WorkerCommand, WorkerResponse},
    },
};

#[derive(Parser)]
#[command(
    name = "demand-worker",
    about = "Runs one demand model call: JSON request on stdin, one RESULT line on stdout",
    version
)]
struct Cli {
    #[arg(long, help = "Directory holding model artifacts; defaults to the configured artifact_dir")]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Predict from a `{granularity, features}` request
    Predict,
    /// Fit a model from a training set and print it; the caller publishes it
    Fit,
}

impl From<Command> for WorkerCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Predict => WorkerCommand::Predict,
            Command::Fit => WorkerCommand::Fit,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout is reserved for the RESULT line
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let command = WorkerCommand::from(cli.command);
    let response = match run(cli).await {
        Ok(response) => response,
        Err(e) => WorkerResponse::Error {
            message: format!("{:#}", e),
        },
    };

    match response.to_result_line() {
        Ok(line) => println!("{}", line),
        Err(e) => {
            error!("failed to encode worker response: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if response.is_error() {
        error!(%command, "worker call failed");
        ExitCode::FAILURE
    } else {
        info!(%command, "worker call finished");
        ExitCode::SUCCESS
    }
}

async fn run(cli: Cli) -> Result<WorkerResponse> {
    let cfg = config::load_config().context("loading configuration")?;
    let artifact_dir = cli.artifact_dir.unwrap_or_else(|| cfg.artifact_dir.clone());

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading request from stdin")?;

    let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(artifact_dir)));
    let runner = InProcessRunner::new(registry, cfg.trainer_settings());
    Ok(worker::execute(&runner, cli.command.into(), &input).await)
}
