use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on worker attempts before a task escalates.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default wall-clock budget for a single worker invocation.
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 600;
/// Default wall-clock budget for a single review.
pub const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 300;

/// Runtime configuration for Baton.
///
/// Resolves the project layout (plan file, `.baton` state dir) and carries
/// the commands and policy knobs the engine needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub baton_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub plan_file: PathBuf,
    pub worker_cmd: String,
    pub reviewer_cmd: String,
    pub max_attempts: u32,
    pub worker_timeout: Duration,
    pub review_timeout: Duration,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, plan_file: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let plan_file = match plan_file {
            Some(path) => path
                .canonicalize()
                .context("Failed to resolve plan file path")?,
            None => Self::find_plan_file(&project_dir)?,
        };

        let baton_dir = project_dir.join(".baton");
        let sessions_dir = baton_dir.join("sessions");

        let worker_cmd =
            std::env::var("BATON_WORKER_CMD").unwrap_or_else(|_| "claude --print".to_string());
        let reviewer_cmd =
            std::env::var("BATON_REVIEWER_CMD").unwrap_or_else(|_| worker_cmd.clone());

        Ok(Self {
            project_dir,
            baton_dir,
            sessions_dir,
            plan_file,
            worker_cmd,
            reviewer_cmd,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            review_timeout: Duration::from_secs(DEFAULT_REVIEW_TIMEOUT_SECS),
            verbose,
        })
    }

    pub fn with_worker_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.worker_cmd = cmd.into();
        self
    }

    pub fn with_reviewer_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.reviewer_cmd = cmd.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_review_timeout(mut self, timeout: Duration) -> Self {
        self.review_timeout = timeout;
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)
            .context("Failed to create sessions directory")?;
        Ok(())
    }

    /// Find the plan, checking .baton/plan.md first, then PLAN.md at the root.
    fn find_plan_file(project_dir: &PathBuf) -> Result<PathBuf> {
        let baton_plan = project_dir.join(".baton/plan.md");
        if baton_plan.exists() {
            return Ok(baton_plan);
        }

        let root_plan = project_dir.join("PLAN.md");
        if root_plan.exists() {
            return Ok(root_plan);
        }

        Err(anyhow!(
            "No plan file found. Create .baton/plan.md or provide --plan-file"
        ))
    }
}
