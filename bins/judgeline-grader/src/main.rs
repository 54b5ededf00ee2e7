mod backend;
mod error;
mod evaluator;
mod orchestrator;
mod poller;
mod submitter;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use backend::Judge0Client;
use clap::{Parser, Subcommand};
use judgeline_common::config::Config;
use judgeline_common::language::supported_languages;
use judgeline_common::redis::RedisStore;
use judgeline_common::store::{GradingStore, MemoryStore};
use judgeline_common::types::{NewProblem, ProblemUpdate, RunRequest};
use orchestrator::Grader;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "judgeline-grader")]
#[command(about = "Judgeline - grade submissions through a remote execution backend", long_about = None)]
struct Cli {
    /// Keep everything in memory instead of Redis
    #[arg(long, global = true, default_value = "false")]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported languages and their backend ids
    Languages,

    /// Grade a submission against the test cases in a run file
    Run {
        /// Submitting user
        #[arg(short, long)]
        user: String,

        /// Problem being attempted
        #[arg(short, long)]
        problem: String,

        /// JSON run request (source_code, language, stdin, expected_outputs)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate reference solutions and create a problem
    CreateProblem {
        #[arg(short, long)]
        author: String,

        /// JSON problem definition
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Update a problem, re-validating reference solutions if they change
    UpdateProblem {
        #[arg(long)]
        id: Uuid,

        #[arg(short, long)]
        author: String,

        /// JSON partial update
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show a stored submission with its test case results
    Submission {
        #[arg(long)]
        id: Uuid,
    },

    /// List a user's submissions, newest first
    History {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        problem: Option<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(dry_run: bool, config: &Config) -> Result<Arc<dyn GradingStore>> {
    if dry_run {
        warn!("Dry run: results are not persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = RedisStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    info!("Connected to Redis: {}", config.redis_url);
    Ok(Arc::new(store))
}

/// Cancel in-flight grading on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling grading call...");
            trigger.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Languages = cli.command {
        for (name, id) in supported_languages() {
            println!("{:>4}  {}", id, name);
        }
        return Ok(());
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    let store = open_store(cli.dry_run, &config).await?;

    match cli.command {
        Commands::Languages => {}
        Commands::Submission { id } => match store.get_submission(id).await? {
            Some(submission) => print_json(&submission)?,
            None => anyhow::bail!("Submission {} not found", id),
        },
        Commands::History { user, problem } => {
            let submissions = store.submissions_for_user(&user, problem.as_deref()).await?;
            print_json(&submissions)?;
        }
        command => {
            let backend = Judge0Client::from_config(&config)
                .context("Failed to build execution backend client")?;
            info!(backend = %config.judge0_url, "Execution backend configured");

            let grader = Grader::new(Arc::new(backend), store, config.poll_policy());
            let cancel = cancel_on_ctrl_c();

            if let Err(e) = grade(&grader, command, &cancel).await {
                error!(error = %e, client_error = e.is_client_error(), "Grading call rejected");
                return Err(e.into());
            }
        }
    }

    Ok(())
}

async fn grade(
    grader: &Grader,
    command: Commands,
    cancel: &CancellationToken,
) -> std::result::Result<(), GradingFailure> {
    match command {
        Commands::Run { user, problem, file } => {
            let request: RunRequest = read_json(&file)?;
            let graded = grader.run_submission(&user, &problem, request, cancel).await?;
            print_json(&graded)?;
        }
        Commands::CreateProblem { author, file } => {
            let problem: NewProblem = read_json(&file)?;
            let created = grader.create_problem(&author, problem, cancel).await?;
            print_json(&created)?;
        }
        Commands::UpdateProblem { id, author, file } => {
            let update: ProblemUpdate = read_json(&file)?;
            let updated = grader.update_problem(id, &author, update, cancel).await?;
            print_json(&updated)?;
        }
        Commands::Languages | Commands::Submission { .. } | Commands::History { .. } => {}
    }
    Ok(())
}

/// Grading error or a local I/O problem around it
#[derive(Debug, thiserror::Error)]
enum GradingFailure {
    #[error(transparent)]
    Grading(#[from] error::GradingError),

    #[error(transparent)]
    Local(#[from] anyhow::Error),
}

impl GradingFailure {
    fn is_client_error(&self) -> bool {
        match self {
            GradingFailure::Grading(e) => e.is_client_error(),
            GradingFailure::Local(_) => true,
        }
    }
}
