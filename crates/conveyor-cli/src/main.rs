//! Conveyor CLI tool.

use clap::{Parser, Subcommand};
use conveyor_config::load_system_config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor job scheduler CLI", long_about = None)]
struct Cli {
    /// Scheduler URL (defaults to the runner api-url in the config file)
    #[arg(long, env = "CONVEYOR_API_URL")]
    api_url: Option<String>,

    /// Path to the system configuration file
    #[arg(long, env = "CONVEYOR_CONFIG", default_value = "conveyor.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job definition
    Submit {
        /// Path to the job definition
        #[arg(default_value = "job.kdl")]
        path: String,
        /// Dispatch priority: low, normal, high or critical
        #[arg(long, default_value = "normal")]
        priority: String,
    },
    /// Cancel a job
    Cancel {
        /// Job ID
        id: String,
    },
    /// Show a job's status
    Status {
        /// Job ID
        id: String,
    },
    /// Print a job's logs
    Logs {
        /// Job ID
        id: String,
        /// Only this step's output
        #[arg(long)]
        step: Option<String>,
        /// Keep printing until the job finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Show queue statistics
    Stats,
    /// Show jobs waiting for a runner
    Pending,
    /// Inspect and manage runners
    Runners {
        #[command(subcommand)]
        command: RunnerCommands,
    },
    /// Validate a job definition
    Validate {
        /// Path to the job definition
        #[arg(default_value = "job.kdl")]
        path: String,
    },
    /// Start a runner agent on this machine
    Runner,
}

#[derive(Subcommand)]
enum RunnerCommands {
    /// List active runners
    List,
    /// List runners able to take work
    Available {
        /// Required capabilities, comma separated
        #[arg(long)]
        capabilities: Option<String>,
    },
    /// Change a runner's status (idle, busy, offline, draining)
    SetStatus {
        /// Runner ID
        id: String,
        /// New status
        status: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = load_system_config(&cli.config)?;
    let api_url = cli
        .api_url
        .clone()
        .unwrap_or_else(|| config.runner.api_url.clone());
    let api = commands::ApiClient::new(&api_url);

    match cli.command {
        Commands::Submit { path, priority } => {
            commands::jobs::submit(&api, &path, &priority).await?;
        }
        Commands::Cancel { id } => {
            commands::jobs::cancel(&api, &id).await?;
        }
        Commands::Status { id } => {
            commands::jobs::status(&api, &id).await?;
        }
        Commands::Logs { id, step, follow } => {
            commands::jobs::logs(&api, &id, step.as_deref(), follow).await?;
        }
        Commands::Stats => {
            commands::jobs::stats(&api).await?;
        }
        Commands::Pending => {
            commands::jobs::pending(&api).await?;
        }
        Commands::Runners { command } => match command {
            RunnerCommands::List => {
                commands::runners::list(&api).await?;
            }
            RunnerCommands::Available { capabilities } => {
                commands::runners::available(&api, capabilities.as_deref()).await?;
            }
            RunnerCommands::SetStatus { id, status } => {
                commands::runners::set_status(&api, &id, &status).await?;
            }
        },
        Commands::Runner => {
            commands::runner::run(config.runner, &api_url).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
