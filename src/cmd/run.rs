//! Plan execution, `baton run`.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use super::super::Cli;

#[allow(clippy::too_many_arguments)]
pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    session: &str,
    worker_cmd: Option<&str>,
    reviewer_cmd: Option<&str>,
    max_attempts: u32,
    worker_timeout: u64,
    review_timeout: u64,
) -> Result<()> {
    use baton::config::Config;
    use baton::engine::{Engine, ProcessWorker, RunOutcome};
    use baton::review::ProcessClassifier;

    let mut config = Config::new(project_dir, cli.verbose, cli.plan_file.clone())?
        .with_max_attempts(max_attempts)
        .with_worker_timeout(Duration::from_secs(worker_timeout))
        .with_review_timeout(Duration::from_secs(review_timeout));
    if let Some(cmd) = worker_cmd {
        config = config.with_worker_cmd(cmd);
    }
    if let Some(cmd) = reviewer_cmd {
        config = config.with_reviewer_cmd(cmd);
    }
    config.ensure_directories()?;

    println!();
    println!("Plan: {}", config.plan_file.display());
    println!("Session: {session}");
    println!();

    let worker = Box::new(ProcessWorker::new(config.worker_cmd.clone()));
    let classifier = Box::new(ProcessClassifier::new(
        config.reviewer_cmd.clone(),
        config.review_timeout,
    ));
    let engine = Engine::new(config, worker, classifier);

    match engine.run(session).await? {
        RunOutcome::Completed => {
            println!();
            println!("{}", console::style("All tasks complete.").green().bold());
        }
        RunOutcome::Escalated(escalation) => {
            println!();
            println!(
                "{}",
                console::style(format!(
                    "Task {} escalated after {} attempt(s): {}",
                    escalation.task_id, escalation.attempt_count, escalation.reason
                ))
                .red()
                .bold()
            );
            for challenge in escalation.challenges() {
                println!("  {challenge}");
            }
            if let Some(reason) = escalation
                .verdict
                .as_ref()
                .and_then(|v| v.ambiguity.as_deref())
            {
                println!("  Ambiguity: {reason}");
            }
            println!();
            println!(
                "Resolve manually, then 'baton reopen {}' to retry.",
                escalation.task_id
            );
        }
    }
    println!();

    Ok(())
}
