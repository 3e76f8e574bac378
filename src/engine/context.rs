//! Worker invocation context.
//!
//! Everything a worker needs to pick up a task cold: the plan, the ledger
//! snapshot, the task and its requirements, the latest handoff when retrying,
//! and the reviewer's challenges verbatim.

use crate::handoff::Handoff;
use crate::ledger::Ledger;
use crate::plan::{Plan, Task};
use crate::review::Challenge;

/// The full context passed across the worker invocation boundary.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub session_id: String,
    pub task: Task,
    pub plan: Plan,
    pub ledger: Ledger,
    /// The latest worker handoff for this task, present when retrying.
    pub previous_handoff: Option<Handoff>,
    /// The reviewer's challenges from the failed attempt, verbatim.
    pub challenges: Vec<Challenge>,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl WorkerContext {
    /// Render the context as the prompt document fed to the worker.
    pub fn render(&self) -> String {
        let mut prompt = String::from("## PLAN\n");
        for task in &self.plan.tasks {
            let marker = if self.ledger.is_completed(task.id) {
                'x'
            } else if self.ledger.is_escalated(task.id) {
                '!'
            } else if task.id == self.task.id {
                '~'
            } else {
                ' '
            };
            prompt.push_str(&format!("- [{}] {}. {}\n", marker, task.id, task.description));
        }

        prompt.push_str(&format!(
            "\n## PROGRESS\nSession: {}\nCompleted tasks: {}\n",
            self.session_id,
            if self.ledger.completed_task_ids.is_empty() {
                "none".to_string()
            } else {
                self.ledger
                    .completed_task_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        ));

        prompt.push_str(&format!(
            "\n## TASK\nTask {} (attempt {}/{}): {}\n",
            self.task.id, self.attempt, self.max_attempts, self.task.description
        ));

        if !self.task.requirements.is_empty() {
            prompt.push_str("\n## REQUIREMENTS\n");
            for (i, requirement) in self.task.requirements.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, requirement));
            }
        }

        if let Some(previous) = &self.previous_handoff {
            prompt.push_str(&format!(
                "\n## PREVIOUS HANDOFF (seq {})\n{}\n",
                previous.sequence_number, previous.content
            ));
        }

        if !self.challenges.is_empty() {
            prompt.push_str("\n## REVIEW CHALLENGES\nThe previous attempt failed review. Address each challenge:\n");
            for (i, challenge) in self.challenges.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, challenge));
            }
        }

        prompt.push_str(
            "\n## RULES\n\
             1. Work only on the task above.\n\
             2. Describe what you did and the evidence for each requirement.\n\
             3. If you cannot proceed, output <blocked>reason</blocked> instead of guessing.\n",
        );

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::{HandoffRole, HandoffStatus};
    use crate::review::Severity;

    fn make_context() -> WorkerContext {
        let plan = Plan::parse(
            "- [x] Scaffold the crate\n- [ ] Add the importer\n  - reads the legacy CSV\n- [ ] Wire the endpoint\n",
        )
        .unwrap();
        let mut ledger = Ledger::new("s1");
        ledger.completed_task_ids.insert(1);
        let task = plan.task(2).unwrap().clone();
        WorkerContext {
            session_id: "s1".into(),
            task,
            plan,
            ledger,
            previous_handoff: None,
            challenges: Vec::new(),
            attempt: 1,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_render_includes_plan_and_progress() {
        let prompt = make_context().render();
        assert!(prompt.contains("## PLAN"));
        assert!(prompt.contains("- [x] 1. Scaffold the crate"));
        assert!(prompt.contains("- [~] 2. Add the importer"));
        assert!(prompt.contains("- [ ] 3. Wire the endpoint"));
        assert!(prompt.contains("Completed tasks: 1"));
    }

    #[test]
    fn test_render_includes_task_and_requirements() {
        let prompt = make_context().render();
        assert!(prompt.contains("Task 2 (attempt 1/3): Add the importer"));
        assert!(prompt.contains("## REQUIREMENTS"));
        assert!(prompt.contains("1. reads the legacy CSV"));
        assert!(prompt.contains("<blocked>"));
    }

    #[test]
    fn test_render_omits_retry_sections_on_first_attempt() {
        let prompt = make_context().render();
        assert!(!prompt.contains("## PREVIOUS HANDOFF"));
        assert!(!prompt.contains("## REVIEW CHALLENGES"));
    }

    #[test]
    fn test_render_includes_challenges_verbatim_on_retry() {
        let mut ctx = make_context();
        ctx.attempt = 2;
        ctx.previous_handoff = Some(Handoff::new(
            "s1",
            2,
            HandoffRole::Worker,
            3,
            "first try output",
            HandoffStatus::Complete,
        ));
        ctx.challenges = vec![Challenge {
            observation: "no CSV reader in the diff".into(),
            rationale: "the importer cannot run without it".into(),
            suggested_action: "add the reader".into(),
            evidence_requested: "a test reading a fixture file".into(),
            severity: Severity::P0,
        }];

        let prompt = ctx.render();
        assert!(prompt.contains("## PREVIOUS HANDOFF (seq 3)"));
        assert!(prompt.contains("first try output"));
        assert!(prompt.contains("## REVIEW CHALLENGES"));
        assert!(prompt.contains("no CSV reader in the diff"));
        assert!(prompt.contains("attempt 2/3"));
    }
}
