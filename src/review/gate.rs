//! The review gate and the pluggable evidence classifier seam.
//!
//! Classification of requirement evidence is a judgment call, not a formal
//! algorithm; the gate owns only the outcome rule and the challenge bound,
//! and delegates classification to an [`EvidenceClassifier`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::handoff::Handoff;
use crate::plan::Plan;
use crate::review::verdict::{Challenge, ReviewVerdict, Severity};

/// How a requirement's evidence was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStatus {
    /// The requirement is demonstrably met.
    Done,
    /// Some evidence exists but the requirement is not fully met.
    Partial,
    /// No evidence for the requirement.
    Missing,
    /// The handoff did something other than what the requirement asks.
    Diverged,
    /// Deliberately postponed. Acceptable only with a justification.
    Deferred,
}

impl EvidenceStatus {
    /// A gap is anything that blocks a clean pass.
    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Partial | Self::Missing | Self::Diverged)
    }
}

/// One requirement's classification, with the material needed to render a
/// challenge if it turns out to be a gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementFinding {
    /// The requirement statement being classified.
    pub requirement: String,
    pub status: EvidenceStatus,
    #[serde(default)]
    pub severity: Severity,
    /// Required when status is `Deferred`.
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub observation: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub suggested_action: String,
    #[serde(default)]
    pub evidence_requested: String,
}

impl RequirementFinding {
    pub fn new(requirement: impl Into<String>, status: EvidenceStatus, severity: Severity) -> Self {
        Self {
            requirement: requirement.into(),
            status,
            severity,
            justification: None,
            observation: String::new(),
            rationale: String::new(),
            suggested_action: String::new(),
            evidence_requested: String::new(),
        }
    }

    pub fn done(requirement: impl Into<String>) -> Self {
        Self::new(requirement, EvidenceStatus::Done, Severity::P2)
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = observation.into();
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = action.into();
        self
    }

    pub fn with_evidence_requested(mut self, evidence: impl Into<String>) -> Self {
        self.evidence_requested = evidence.into();
        self
    }

    /// A deferral without justification blocks a pass like any other gap.
    fn is_unjustified_deferral(&self) -> bool {
        self.status == EvidenceStatus::Deferred
            && self
                .justification
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
    }

    /// Render this gap as an actionable challenge, with generic fallback text
    /// for any field the classifier left empty.
    pub fn to_challenge(&self) -> Challenge {
        let fallback = |text: &str, default: String| {
            if text.trim().is_empty() { default } else { text.to_string() }
        };
        Challenge {
            observation: fallback(
                &self.observation,
                format!("No sufficient evidence for: {}", self.requirement),
            ),
            rationale: fallback(
                &self.rationale,
                "The task is not complete until this requirement is demonstrably met.".to_string(),
            ),
            suggested_action: fallback(
                &self.suggested_action,
                format!("Address the requirement: {}", self.requirement),
            ),
            evidence_requested: fallback(
                &self.evidence_requested,
                "Point to the concrete change or test output that satisfies it.".to_string(),
            ),
            severity: self.severity,
        }
    }
}

/// Result of classifying a whole handoff against a requirement set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Classification {
    /// One finding per requirement, in requirement order.
    Findings(Vec<RequirementFinding>),
    /// The evidence cannot be classified with confidence. Routes to a human.
    Ambiguous { reason: String },
}

impl Classification {
    /// Convenience for handoffs that satisfy every requirement.
    pub fn all_done(requirements: &[String]) -> Self {
        Self::Findings(requirements.iter().map(RequirementFinding::done).collect())
    }
}

/// The pluggable requirement-to-evidence matching capability.
///
/// Implementations may be heuristics, scripted fixtures, or an external
/// reviewer process; the gate only consumes the classification.
#[async_trait]
pub trait EvidenceClassifier: Send + Sync {
    async fn classify(
        &self,
        requirements: &[String],
        worker_handoff: &Handoff,
    ) -> anyhow::Result<Classification>;
}

#[async_trait]
impl<C: EvidenceClassifier + ?Sized> EvidenceClassifier for std::sync::Arc<C> {
    async fn classify(
        &self,
        requirements: &[String],
        worker_handoff: &Handoff,
    ) -> anyhow::Result<Classification> {
        (**self).classify(requirements, worker_handoff).await
    }
}

/// Evaluates worker handoffs against the plan's requirements.
///
/// No side effects: the gate never mutates the plan, ledger, or store.
pub struct ReviewGate {
    classifier: Box<dyn EvidenceClassifier>,
}

impl ReviewGate {
    pub fn new(classifier: Box<dyn EvidenceClassifier>) -> Self {
        Self { classifier }
    }

    /// Evaluate one worker attempt.
    ///
    /// Outcome rule: pass iff every requirement is done or justified-deferred;
    /// any gap or unjustified deferral fails the attempt with up to three
    /// challenges, highest severity first; classifier ambiguity yields
    /// `NeedsReview`, never a silent pass or fail.
    pub async fn evaluate(
        &self,
        plan: &Plan,
        task_id: u64,
        worker_handoff: &Handoff,
        attempt: u32,
    ) -> anyhow::Result<ReviewVerdict> {
        let requirements = plan.requirements_of(task_id)?;

        let classification = self
            .classifier
            .classify(requirements, worker_handoff)
            .await?;

        let findings = match classification {
            Classification::Ambiguous { reason } => {
                return Ok(ReviewVerdict::needs_review(task_id, attempt, reason));
            }
            Classification::Findings(findings) => findings,
        };

        let gaps: Vec<&RequirementFinding> = findings
            .iter()
            .filter(|f| f.status.is_gap() || f.is_unjustified_deferral())
            .collect();

        if gaps.is_empty() {
            return Ok(ReviewVerdict::pass(task_id, attempt));
        }

        let challenges: Vec<Challenge> = gaps.iter().map(|f| f.to_challenge()).collect();
        Ok(ReviewVerdict::fail(task_id, attempt, challenges))
    }
}

/// Classifier returning canned responses in order. Test support for driving
/// the engine without an external reviewer.
#[derive(Default)]
pub struct ScriptedClassifier {
    responses: Mutex<VecDeque<Classification>>,
    invocations: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(responses: Vec<Classification>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    /// How many times `classify` was called.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        requirements: &[String],
        _worker_handoff: &Handoff,
    ) -> anyhow::Result<Classification> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted responses lock poisoned"))?
            .pop_front();
        Ok(next.unwrap_or_else(|| Classification::all_done(requirements)))
    }
}
