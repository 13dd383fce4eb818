//! Gradebatch CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "gradebatch")]
#[command(about = "Gradebatch batch grading CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "GRADEBATCH_API_URL", default_value = "http://localhost:3000")]
    api_url: Url,

    /// Log HTTP requests
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a batch of items for grading
    Submit {
        /// Exam the items belong to
        #[arg(long)]
        exam: String,
        /// Items as `payload-ref` or `payload-ref#category`
        items: Vec<String>,
        /// Read additional items from a file, one per line
        #[arg(long)]
        file: Option<String>,
        /// Assignment strategy: balanced, random, expertise, workload
        #[arg(long, default_value = "balanced")]
        strategy: String,
        /// Start the job right after submitting
        #[arg(long)]
        start: bool,
    },
    /// Start, pause, resume, stop or optimize a job
    Control {
        /// Job ID
        id: String,
        /// Action to apply
        action: String,
    },
    /// Show job status, or list all jobs when no ID is given
    Status {
        /// Job ID
        id: Option<String>,
    },
    /// Show per-grader workload for a job
    Workloads {
        /// Job ID
        id: String,
    },
    /// Manage the grader pool
    Graders {
        #[command(subcommand)]
        command: GraderCommands,
    },
    /// Register a grader
    RegisterGrader {
        /// Grader ID
        id: String,
        /// Items the grader can hold at once
        #[arg(long, default_value = "1")]
        capacity: u32,
        /// Category tags, comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Validate an orchestrator configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "gradebatch.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum GraderCommands {
    /// List registered graders
    List,
    /// Show items a grader currently holds
    Assignments {
        /// Grader ID
        id: String,
    },
    /// Remove an idle grader
    Remove {
        /// Grader ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("gradebatch=debug"))
            .with_writer(std::io::stderr)
            .init();
    }

    let api = ApiClient::new(cli.api_url);

    match cli.command {
        Commands::Submit {
            exam,
            items,
            file,
            strategy,
            start,
        } => {
            commands::batches::submit(&api, &exam, items, file.as_deref(), &strategy, start)
                .await?;
        }
        Commands::Control { id, action } => {
            commands::batches::control(&api, &id, &action).await?;
        }
        Commands::Status { id } => match id {
            Some(id) => commands::batches::status(&api, &id).await?,
            None => commands::batches::list(&api).await?,
        },
        Commands::Workloads { id } => {
            commands::batches::workloads(&api, &id).await?;
        }
        Commands::Graders { command } => match command {
            GraderCommands::List => commands::graders::list(&api).await?,
            GraderCommands::Assignments { id } => {
                commands::graders::assignments(&api, &id).await?;
            }
            GraderCommands::Remove { id } => commands::graders::remove(&api, &id).await?,
        },
        Commands::RegisterGrader { id, capacity, tags } => {
            commands::graders::register(&api, &id, capacity, tags).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
