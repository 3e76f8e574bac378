//! The orchestration state machine.
//!
//! ## Execution Model
//!
//! The engine drives plan tasks strictly in order. Each task goes through a
//!   worker attempt -> handoff -> review
//! cycle, retried on a failed review up to the configured attempt bound.
//! Every observable step is recorded before the next one starts: the worker
//! handoff is appended before review, the reviewer handoff before the ledger
//! transition. A run that dies mid-task can therefore be resumed by reading
//! the ledger and the latest handoff back.
//!
//! ## Escalation
//!
//! A task leaves the loop without completing in three ways: the retry bound
//! is exhausted, the reviewer could not produce a clear verdict, or the
//! worker reported a blocker. All three halt the run and surface the full
//! review context to the operator. Escalated tasks stay escalated until
//! explicitly reopened.

use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::context::WorkerContext;
use crate::engine::worker::{Worker, WorkerOutput, parse_blocked};
use crate::errors::EngineError;
use crate::handoff::{Handoff, HandoffRole, HandoffStatus, HandoffStore};
use crate::ledger::{Ledger, LedgerStore};
use crate::plan::{Plan, TaskStatus, mark_task_status};
use crate::review::{
    Challenge, EvidenceClassifier, ReviewGate, ReviewVerdict, VerdictOutcome, embed_verdict,
    extract_verdict,
};

/// Why a task left the run without completing.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationReason {
    /// The review failed on the final permitted attempt.
    RetryExhausted,
    /// The reviewer could not reach a clear verdict.
    ReviewAmbiguous,
    /// The worker reported an obstacle it cannot resolve.
    WorkerBlocked(String),
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryExhausted => write!(f, "retry budget exhausted"),
            Self::ReviewAmbiguous => write!(f, "review outcome ambiguous"),
            Self::WorkerBlocked(reason) => write!(f, "worker blocked: {reason}"),
        }
    }
}

/// Everything the operator needs to act on a halted task.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub task_id: u64,
    pub attempt_count: u32,
    pub reason: EscalationReason,
    /// The final review verdict, when one was reached.
    pub verdict: Option<ReviewVerdict>,
}

impl Escalation {
    /// The unmet challenges from the final review, verbatim.
    pub fn challenges(&self) -> &[Challenge] {
        self.verdict
            .as_ref()
            .map(|v| v.challenges.as_slice())
            .unwrap_or(&[])
    }
}

/// Terminal state of one engine run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every plan task is done.
    Completed,
    /// A task halted the run; later tasks were not started.
    Escalated(Escalation),
}

enum TaskOutcome {
    Done,
    Escalated(Escalation),
}

/// Where an interrupted task picks back up.
enum Resume {
    /// A worker handoff exists with no review on record; review it first.
    ReviewPending { handoff: Handoff, attempt: u32 },
    /// The last review failed; rerun the worker with its challenges.
    Retry {
        challenges: Vec<Challenge>,
        attempt: u32,
    },
    /// The interrupted task had already reached a halt state.
    Escalate(Escalation),
}

pub struct Engine {
    config: Config,
    store: HandoffStore,
    ledgers: LedgerStore,
    gate: ReviewGate,
    worker: Box<dyn Worker>,
}

impl Engine {
    pub fn new(
        config: Config,
        worker: Box<dyn Worker>,
        classifier: Box<dyn EvidenceClassifier>,
    ) -> Self {
        let store = HandoffStore::new(config.sessions_dir.clone());
        let ledgers = LedgerStore::new(config.sessions_dir.clone());
        Self {
            config,
            store,
            ledgers,
            gate: ReviewGate::new(classifier),
            worker,
        }
    }

    /// Drive the plan to completion or first escalation.
    ///
    /// Safe to call on a fresh session or after an interrupted run; finished
    /// and escalated tasks are never re-executed.
    pub async fn run(&self, session: &str) -> Result<RunOutcome, EngineError> {
        let plan = Plan::load(&self.config.plan_file)?;
        let mut ledger = self.ledgers.load(session)?;

        info!(
            session,
            tasks = plan.len(),
            completed = ledger.completed_task_ids.len(),
            "starting run"
        );

        // Pick up whatever an interrupted run left mid-flight.
        if let Some((task_id, resume)) = self.recover(&plan, &mut ledger, session)? {
            let outcome = match resume {
                Resume::Escalate(escalation) => TaskOutcome::Escalated(escalation),
                Resume::ReviewPending { handoff, attempt } => {
                    info!(task_id, attempt, "resuming at review");
                    self.run_task(&plan, &mut ledger, session, task_id, attempt, vec![], Some(handoff))
                        .await?
                }
                Resume::Retry {
                    challenges,
                    attempt,
                } => {
                    info!(task_id, attempt, "resuming at worker");
                    self.run_task(&plan, &mut ledger, session, task_id, attempt, challenges, None)
                        .await?
                }
            };
            if let TaskOutcome::Escalated(escalation) = outcome {
                return Ok(RunOutcome::Escalated(escalation));
            }
        }

        while let Some(task_id) = next_task(&plan, &ledger) {
            let outcome = self
                .run_task(&plan, &mut ledger, session, task_id, 1, vec![], None)
                .await?;
            if let TaskOutcome::Escalated(escalation) = outcome {
                return Ok(RunOutcome::Escalated(escalation));
            }
        }

        info!(session, "all tasks complete");
        Ok(RunOutcome::Completed)
    }

    /// Inspect the ledger and handoff history for a task left mid-flight and
    /// decide where it resumes. Returns `None` when nothing was in flight.
    ///
    /// A recorded pass with no ledger completion is re-applied here directly,
    /// so a crash between the reviewer handoff and the ledger write costs
    /// nothing but this replay.
    fn recover(
        &self,
        plan: &Plan,
        ledger: &mut Ledger,
        session: &str,
    ) -> Result<Option<(u64, Resume)>, EngineError> {
        let Some(task_id) = ledger.current_task_id else {
            return Ok(None);
        };
        let attempt = ledger.attempt_count.max(1);

        if ledger.is_escalated(task_id) {
            // Halted before; rebuild the escalation for the operator.
            let latest = self.store.latest(session, task_id)?;
            if let Some(handoff) = latest
                .as_ref()
                .filter(|h| h.author_role == HandoffRole::Worker && h.status == HandoffStatus::Blocked)
            {
                let reason = parse_blocked(&handoff.content)
                    .unwrap_or_else(|| "worker reported a blocker".to_string());
                return Ok(Some((
                    task_id,
                    Resume::Escalate(Escalation {
                        task_id,
                        attempt_count: attempt,
                        reason: EscalationReason::WorkerBlocked(reason),
                        verdict: None,
                    }),
                )));
            }
            let verdict = latest
                .filter(|h| h.author_role == HandoffRole::Reviewer)
                .and_then(|h| extract_verdict(&h.content));
            let reason = match verdict.as_ref().map(|v| &v.outcome) {
                Some(VerdictOutcome::NeedsReview) => EscalationReason::ReviewAmbiguous,
                _ => EscalationReason::RetryExhausted,
            };
            return Ok(Some((
                task_id,
                Resume::Escalate(Escalation {
                    task_id,
                    attempt_count: attempt,
                    reason,
                    verdict,
                }),
            )));
        }

        let Some(latest) = self.store.latest(session, task_id)? else {
            // Died after the in-progress transition, before any handoff.
            return Ok(Some((task_id, Resume::Retry { challenges: vec![], attempt })));
        };

        match latest.author_role {
            HandoffRole::Worker => match latest.status {
                HandoffStatus::Complete => {
                    Ok(Some((task_id, Resume::ReviewPending { handoff: latest, attempt })))
                }
                HandoffStatus::Blocked => {
                    let reason = parse_blocked(&latest.content)
                        .unwrap_or_else(|| "worker reported a blocker".to_string());
                    self.record(ledger, task_id, TaskStatus::Escalated, attempt, &latest)?;
                    self.mark_plan(task_id, TaskStatus::Escalated);
                    Ok(Some((
                        task_id,
                        Resume::Escalate(Escalation {
                            task_id,
                            attempt_count: attempt,
                            reason: EscalationReason::WorkerBlocked(reason),
                            verdict: None,
                        }),
                    )))
                }
            },
            HandoffRole::Reviewer => {
                let Some(verdict) = extract_verdict(&latest.content) else {
                    self.record(ledger, task_id, TaskStatus::Escalated, attempt, &latest)?;
                    self.mark_plan(task_id, TaskStatus::Escalated);
                    return Ok(Some((
                        task_id,
                        Resume::Escalate(Escalation {
                            task_id,
                            attempt_count: attempt,
                            reason: EscalationReason::ReviewAmbiguous,
                            verdict: None,
                        }),
                    )));
                };
                match verdict.outcome {
                    VerdictOutcome::Pass => {
                        // The pass was recorded; finish the bookkeeping.
                        self.record(ledger, task_id, TaskStatus::Done, verdict.attempt, &latest)?;
                        self.mark_plan(task_id, TaskStatus::Done);
                        info!(task_id, "recovered recorded pass");
                        Ok(None)
                    }
                    VerdictOutcome::Fail => {
                        if verdict.attempt >= self.config.max_attempts {
                            self.record(
                                ledger,
                                task_id,
                                TaskStatus::Escalated,
                                verdict.attempt,
                                &latest,
                            )?;
                            self.mark_plan(task_id, TaskStatus::Escalated);
                            let attempt_count = verdict.attempt;
                            Ok(Some((
                                task_id,
                                Resume::Escalate(Escalation {
                                    task_id,
                                    attempt_count,
                                    reason: EscalationReason::RetryExhausted,
                                    verdict: Some(verdict),
                                }),
                            )))
                        } else {
                            Ok(Some((
                                task_id,
                                Resume::Retry {
                                    challenges: verdict.challenges.clone(),
                                    attempt: verdict.attempt + 1,
                                },
                            )))
                        }
                    }
                    VerdictOutcome::NeedsReview => {
                        self.record(ledger, task_id, TaskStatus::Escalated, verdict.attempt, &latest)?;
                        self.mark_plan(task_id, TaskStatus::Escalated);
                        let attempt_count = verdict.attempt;
                        Ok(Some((
                            task_id,
                            Resume::Escalate(Escalation {
                                task_id,
                                attempt_count,
                                reason: EscalationReason::ReviewAmbiguous,
                                verdict: Some(verdict),
                            }),
                        )))
                    }
                }
            }
        }
    }

    /// Run one task through the attempt loop.
    ///
    /// `pending_review` carries a recovered worker handoff that was appended
    /// but never reviewed; the first iteration then skips straight to review.
    async fn run_task(
        &self,
        plan: &Plan,
        ledger: &mut Ledger,
        session: &str,
        task_id: u64,
        start_attempt: u32,
        mut challenges: Vec<Challenge>,
        mut pending_review: Option<Handoff>,
    ) -> Result<TaskOutcome, EngineError> {
        let max_attempts = self.config.max_attempts;
        let mut attempt = start_attempt;

        loop {
            let worker_handoff = match pending_review.take() {
                Some(handoff) => handoff,
                None => {
                    self.ledgers
                        .record_transition(ledger, task_id, TaskStatus::InProgress, attempt, None)?;
                    self.mark_plan(task_id, TaskStatus::InProgress);

                    let context = self.build_context(plan, ledger, session, task_id, attempt, &challenges)?;

                    info!(task_id, attempt, max_attempts, "invoking worker");
                    let output = match tokio::time::timeout(
                        self.config.worker_timeout,
                        self.worker.invoke(&context),
                    )
                    .await
                    {
                        Ok(result) => result?,
                        Err(_) => WorkerOutput::blocked(
                            String::new(),
                            format!(
                                "Worker timed out after {}s",
                                self.config.worker_timeout.as_secs()
                            ),
                        ),
                    };

                    let sequence = self.store.next_sequence(session)?;
                    let status = if output.blocked.is_some() {
                        HandoffStatus::Blocked
                    } else {
                        HandoffStatus::Complete
                    };
                    let handoff = Handoff::new(
                        session,
                        task_id,
                        HandoffRole::Worker,
                        sequence,
                        output.content,
                        status,
                    );
                    self.store.append(&handoff)?;
                    debug!(task_id, sequence, "worker handoff appended");

                    if let Some(reason) = output.blocked {
                        warn!(task_id, attempt, %reason, "worker blocked");
                        self.record(ledger, task_id, TaskStatus::Escalated, attempt, &handoff)?;
                        self.mark_plan(task_id, TaskStatus::Escalated);
                        return Ok(TaskOutcome::Escalated(Escalation {
                            task_id,
                            attempt_count: attempt,
                            reason: EscalationReason::WorkerBlocked(reason),
                            verdict: None,
                        }));
                    }
                    handoff
                }
            };

            self.record(ledger, task_id, TaskStatus::AwaitingReview, attempt, &worker_handoff)?;

            info!(task_id, attempt, "invoking reviewer");
            let verdict = match tokio::time::timeout(
                self.config.review_timeout,
                self.gate.evaluate(plan, task_id, &worker_handoff, attempt),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => ReviewVerdict::needs_review(
                    task_id,
                    attempt,
                    format!(
                        "Review timed out after {}s",
                        self.config.review_timeout.as_secs()
                    ),
                ),
            };

            let sequence = self.store.next_sequence(session)?;
            let reviewer_handoff = Handoff::new(
                session,
                task_id,
                HandoffRole::Reviewer,
                sequence,
                embed_verdict(&verdict),
                HandoffStatus::Complete,
            );
            self.store.append(&reviewer_handoff)?;
            debug!(task_id, sequence, outcome = %verdict.outcome, "reviewer handoff appended");

            match verdict.outcome {
                VerdictOutcome::Pass => {
                    self.record(ledger, task_id, TaskStatus::Done, attempt, &reviewer_handoff)?;
                    self.mark_plan(task_id, TaskStatus::Done);
                    info!(task_id, attempt, "task done");
                    return Ok(TaskOutcome::Done);
                }
                VerdictOutcome::NeedsReview => {
                    warn!(task_id, attempt, "review ambiguous, escalating");
                    self.record(ledger, task_id, TaskStatus::Escalated, attempt, &reviewer_handoff)?;
                    self.mark_plan(task_id, TaskStatus::Escalated);
                    return Ok(TaskOutcome::Escalated(Escalation {
                        task_id,
                        attempt_count: attempt,
                        reason: EscalationReason::ReviewAmbiguous,
                        verdict: Some(verdict),
                    }));
                }
                VerdictOutcome::Fail => {
                    if attempt >= max_attempts {
                        warn!(task_id, attempt, max_attempts, "retry budget exhausted");
                        self.record(ledger, task_id, TaskStatus::Escalated, attempt, &reviewer_handoff)?;
                        self.mark_plan(task_id, TaskStatus::Escalated);
                        return Ok(TaskOutcome::Escalated(Escalation {
                            task_id,
                            attempt_count: attempt,
                            reason: EscalationReason::RetryExhausted,
                            verdict: Some(verdict),
                        }));
                    }
                    warn!(
                        task_id,
                        attempt,
                        max_attempts,
                        challenges = verdict.challenges.len(),
                        "review failed, retrying"
                    );
                    challenges = verdict.challenges;
                    attempt += 1;
                }
            }
        }
    }

    fn build_context(
        &self,
        plan: &Plan,
        ledger: &Ledger,
        session: &str,
        task_id: u64,
        attempt: u32,
        challenges: &[Challenge],
    ) -> Result<WorkerContext, EngineError> {
        let task = plan
            .task(task_id)
            .ok_or(crate::errors::PlanError::UnknownTask(task_id))?
            .clone();

        // Retries see their own prior output; first attempts start cold.
        let previous_handoff = if attempt > 1 {
            self.store
                .list_for_task(session, task_id)?
                .into_iter()
                .rev()
                .find(|h| h.author_role == HandoffRole::Worker)
        } else {
            None
        };

        Ok(WorkerContext {
            session_id: session.to_string(),
            task,
            plan: plan.clone(),
            ledger: ledger.clone(),
            previous_handoff,
            challenges: challenges.to_vec(),
            attempt,
            max_attempts: self.config.max_attempts,
        })
    }

    fn record(
        &self,
        ledger: &mut Ledger,
        task_id: u64,
        status: TaskStatus,
        attempt: u32,
        handoff: &Handoff,
    ) -> Result<(), EngineError> {
        self.ledgers
            .record_transition(ledger, task_id, status, attempt, Some(handoff.handoff_ref()))?;
        Ok(())
    }

    /// Mirror a status into the plan file markers. The plan file is a
    /// human-facing view; the ledger stays authoritative, so a failed
    /// marker write is logged and skipped rather than halting the run.
    fn mark_plan(&self, task_id: u64, status: TaskStatus) {
        if let Err(error) = mark_task_status(&self.config.plan_file, task_id, status) {
            warn!(task_id, %error, "failed to update plan marker");
        }
    }
}

/// The lowest-ordered plan task the ledger does not hold terminal.
fn next_task(plan: &Plan, ledger: &Ledger) -> Option<u64> {
    plan.tasks
        .iter()
        .map(|t| t.id)
        .find(|id| !ledger.is_terminal(*id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_of(n: u64) -> Plan {
        let doc: String = (1..=n).map(|i| format!("- [ ] Task {i}\n")).collect();
        Plan::parse(&doc).unwrap()
    }

    // =========================================
    // Task selection tests
    // =========================================

    #[test]
    fn test_next_task_skips_terminal_tasks() {
        let plan = plan_of(3);
        let mut ledger = Ledger::new("s");
        assert_eq!(next_task(&plan, &ledger), Some(1));

        ledger.completed_task_ids.insert(1);
        assert_eq!(next_task(&plan, &ledger), Some(2));

        ledger.escalated_task_ids.insert(2);
        assert_eq!(next_task(&plan, &ledger), Some(3));

        ledger.completed_task_ids.insert(3);
        assert_eq!(next_task(&plan, &ledger), None);
    }

    // =========================================
    // Escalation tests
    // =========================================

    #[test]
    fn test_escalation_reason_display() {
        assert_eq!(
            EscalationReason::RetryExhausted.to_string(),
            "retry budget exhausted"
        );
        assert_eq!(
            EscalationReason::WorkerBlocked("no credentials".into()).to_string(),
            "worker blocked: no credentials"
        );
    }

    #[test]
    fn test_escalation_challenges_empty_without_verdict() {
        let escalation = Escalation {
            task_id: 1,
            attempt_count: 2,
            reason: EscalationReason::WorkerBlocked("stuck".into()),
            verdict: None,
        };
        assert!(escalation.challenges().is_empty());
    }
}
