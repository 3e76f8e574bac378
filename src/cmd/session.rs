//! Session inspection and maintenance, `baton status`, `reopen`, and `reset`.

use anyhow::Result;
use std::path::PathBuf;

use super::super::Cli;

pub fn cmd_status(cli: &Cli, project_dir: PathBuf, session: &str) -> Result<()> {
    use baton::config::Config;
    use baton::handoff::HandoffStore;
    use baton::ledger::LedgerStore;
    use baton::plan::Plan;

    let config = Config::new(project_dir, cli.verbose, cli.plan_file.clone())?;
    let plan = Plan::load(&config.plan_file)?;
    let ledger = LedgerStore::new(config.sessions_dir.clone()).load(session)?;
    let handoffs = HandoffStore::new(config.sessions_dir.clone())
        .list_by_session(session)
        .unwrap_or_default();

    println!();
    println!("Session: {session}");
    println!("Plan: {}", config.plan_file.display());
    println!();

    for task in &plan.tasks {
        let status = if ledger.is_completed(task.id) {
            console::style("DONE").green()
        } else if ledger.is_escalated(task.id) {
            console::style("ESCALATED").red()
        } else if ledger.current_task_id == Some(task.id) {
            console::style("IN PROGRESS").yellow()
        } else {
            console::style("PENDING").dim()
        };
        let count = handoffs.iter().filter(|h| h.task_id == task.id).count();
        println!(
            "{:<12} {}. {} ({} handoff{})",
            status,
            task.id,
            task.description,
            count,
            if count == 1 { "" } else { "s" }
        );
    }

    println!();
    println!(
        "{}/{} tasks complete, {} escalated, {} handoffs on record",
        ledger.completed_task_ids.len(),
        plan.len(),
        ledger.escalated_task_ids.len(),
        handoffs.len()
    );
    if let Some(r) = &ledger.last_handoff_ref {
        println!("Last handoff: {r}");
    }
    println!();
    Ok(())
}

pub fn cmd_reopen(cli: &Cli, project_dir: PathBuf, session: &str, task_id: u64) -> Result<()> {
    use baton::config::Config;
    use baton::ledger::LedgerStore;
    use baton::plan::{Plan, TaskStatus, mark_task_status};

    let config = Config::new(project_dir, cli.verbose, cli.plan_file.clone())?;
    let plan = Plan::load(&config.plan_file)?;
    if plan.task(task_id).is_none() {
        anyhow::bail!("Task {task_id} is not in the plan");
    }

    let store = LedgerStore::new(config.sessions_dir.clone());
    let mut ledger = store.load(session)?;
    if !ledger.is_escalated(task_id) {
        anyhow::bail!("Task {task_id} is not escalated; only escalated tasks can be reopened");
    }

    store.record_transition(&mut ledger, task_id, TaskStatus::Pending, 0, None)?;
    mark_task_status(&config.plan_file, task_id, TaskStatus::Pending)?;

    println!(
        "Task {task_id} reopened. The next 'baton run --session {session}' will retry it with a fresh attempt budget."
    );
    Ok(())
}

pub fn cmd_reset(cli: &Cli, project_dir: PathBuf, session: &str, force: bool) -> Result<()> {
    use baton::config::Config;

    if !force {
        anyhow::bail!(
            "Reset deletes the session ledger and all handoffs. Re-run with --force to confirm."
        );
    }

    let config = Config::new(project_dir, cli.verbose, cli.plan_file.clone())?;
    let session_dir = config.sessions_dir.join(session);
    if session_dir.exists() {
        std::fs::remove_dir_all(&session_dir)?;
        println!("Session '{session}' removed.");
    } else {
        println!("Session '{session}' has no recorded state.");
    }
    Ok(())
}
