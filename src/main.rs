use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "baton")]
#[command(version, about = "Resumable task orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the plan file. If not provided, checks .baton/plan.md then PLAN.md
    #[arg(long, global = true)]
    pub plan_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive the plan to completion or first escalation
    Run {
        /// Session identifier; reusing one resumes it
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Command spawned per worker invocation (overrides BATON_WORKER_CMD)
        #[arg(long)]
        worker_cmd: Option<String>,

        /// Command spawned per review (overrides BATON_REVIEWER_CMD)
        #[arg(long)]
        reviewer_cmd: Option<String>,

        /// Worker attempts per task before escalating
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Worker invocation timeout in seconds
        #[arg(long, default_value = "600")]
        worker_timeout: u64,

        /// Review timeout in seconds
        #[arg(long, default_value = "300")]
        review_timeout: u64,
    },
    /// Show session progress and escalations
    Status {
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Return an escalated task to the pending pool
    Reopen {
        /// Task id to reopen
        task: u64,

        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Delete a session's ledger and handoffs
    Reset {
        #[arg(short, long, default_value = "default")]
        session: String,

        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            session,
            worker_cmd,
            reviewer_cmd,
            max_attempts,
            worker_timeout,
            review_timeout,
        } => {
            cmd::cmd_run(
                &cli,
                project_dir,
                session,
                worker_cmd.as_deref(),
                reviewer_cmd.as_deref(),
                *max_attempts,
                *worker_timeout,
                *review_timeout,
            )
            .await?;
        }
        Commands::Status { session } => cmd::cmd_status(&cli, project_dir, session)?,
        Commands::Reopen { task, session } => cmd::cmd_reopen(&cli, project_dir, session, *task)?,
        Commands::Reset { session, force } => cmd::cmd_reset(&cli, project_dir, session, *force)?,
    }

    Ok(())
}
