//! Verdict and challenge types produced by the review gate.
//!
//! A verdict is never persisted on its own - it is embedded in the reviewer's
//! handoff as a `<verdict>{json}</verdict>` block, which recovery extracts to
//! decide whether a transition still needs to be applied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum challenges carried by a FAIL verdict.
///
/// Gaps beyond the third are dropped deliberately so the next attempt has a
/// focused work list.
pub const MAX_CHALLENGES: usize = 3;

/// Severity of a requirement gap. Ordered from most to least critical.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocking gap. Any P0 gap fails the attempt.
    P0,
    /// Significant gap that should be addressed before the task is done.
    #[default]
    P1,
    /// Minor gap.
    P2,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one review.
///
/// `NeedsReview` is an explicit third outcome - it routes to a human rather
/// than to a retry, and is never collapsed into pass/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOutcome {
    Pass,
    Fail,
    NeedsReview,
}

impl fmt::Display for VerdictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::NeedsReview => "NEEDS_REVIEW",
        };
        write!(f, "{}", s)
    }
}

/// A structured, bounded critique of one requirement gap, used to steer the
/// next retry attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// What was observed in the handoff.
    pub observation: String,
    /// Why it matters.
    pub rationale: String,
    /// A suggested corrective action.
    pub suggested_action: String,
    /// What evidence would prove the fix.
    pub evidence_requested: String,
    pub severity: Severity,
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} Why: {} Suggested: {} Evidence: {}",
            self.severity,
            self.observation,
            self.rationale,
            self.suggested_action,
            self.evidence_requested
        )
    }
}

/// The review gate's judgment of one worker attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub task_id: u64,
    pub attempt: u32,
    pub outcome: VerdictOutcome,
    /// At most [`MAX_CHALLENGES`], ordered by descending severity. Empty
    /// unless the outcome is `Fail`.
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// Why the evidence could not be classified, when the outcome is
    /// `NeedsReview`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambiguity: Option<String>,
}

impl ReviewVerdict {
    pub fn pass(task_id: u64, attempt: u32) -> Self {
        Self {
            task_id,
            attempt,
            outcome: VerdictOutcome::Pass,
            challenges: Vec::new(),
            ambiguity: None,
        }
    }

    /// Build a FAIL verdict, keeping only the highest-severity challenges.
    pub fn fail(task_id: u64, attempt: u32, mut challenges: Vec<Challenge>) -> Self {
        challenges.sort_by_key(|c| c.severity);
        challenges.truncate(MAX_CHALLENGES);
        Self {
            task_id,
            attempt,
            outcome: VerdictOutcome::Fail,
            challenges,
            ambiguity: None,
        }
    }

    pub fn needs_review(task_id: u64, attempt: u32, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            attempt,
            outcome: VerdictOutcome::NeedsReview,
            challenges: Vec::new(),
            ambiguity: Some(reason.into()),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.outcome == VerdictOutcome::Pass
    }
}

const VERDICT_OPEN: &str = "<verdict>";
const VERDICT_CLOSE: &str = "</verdict>";

/// Render a reviewer handoff body embedding the verdict block.
pub fn embed_verdict(verdict: &ReviewVerdict) -> String {
    let mut body = format!(
        "Review of task {} attempt {}: {}\n",
        verdict.task_id, verdict.attempt, verdict.outcome
    );
    for (i, challenge) in verdict.challenges.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", i + 1, challenge));
    }
    if let Some(reason) = &verdict.ambiguity {
        body.push_str(&format!("Ambiguity: {}\n", reason));
    }
    // json serialization of a plain struct cannot fail
    let json = serde_json::to_string(verdict).unwrap_or_default();
    body.push_str(&format!("\n{}{}{}\n", VERDICT_OPEN, json, VERDICT_CLOSE));
    body
}

/// Extract the embedded verdict from a reviewer handoff body.
///
/// Returns `None` when no well-formed block is present.
pub fn extract_verdict(content: &str) -> Option<ReviewVerdict> {
    let start = content.find(VERDICT_OPEN)? + VERDICT_OPEN.len();
    let end = content[start..].find(VERDICT_CLOSE)?;
    serde_json::from_str(content[start..start + end].trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(observation: &str, severity: Severity) -> Challenge {
        Challenge {
            observation: observation.into(),
            rationale: "it matters".into(),
            suggested_action: "fix it".into(),
            evidence_requested: "show a passing test".into(),
            severity,
        }
    }

    // =========================================
    // Verdict construction tests
    // =========================================

    #[test]
    fn test_fail_truncates_to_max_challenges() {
        let verdict = ReviewVerdict::fail(
            1,
            1,
            vec![
                challenge("a", Severity::P2),
                challenge("b", Severity::P0),
                challenge("c", Severity::P1),
                challenge("d", Severity::P0),
                challenge("e", Severity::P2),
            ],
        );
        assert_eq!(verdict.challenges.len(), MAX_CHALLENGES);
    }

    #[test]
    fn test_fail_orders_challenges_by_descending_severity() {
        let verdict = ReviewVerdict::fail(
            1,
            1,
            vec![
                challenge("a", Severity::P2),
                challenge("b", Severity::P0),
                challenge("c", Severity::P1),
            ],
        );
        let severities: Vec<Severity> = verdict.challenges.iter().map(|c| c.severity).collect();
        assert_eq!(severities, vec![Severity::P0, Severity::P1, Severity::P2]);
    }

    #[test]
    fn test_pass_carries_no_challenges() {
        let verdict = ReviewVerdict::pass(3, 2);
        assert!(verdict.is_pass());
        assert!(verdict.challenges.is_empty());
        assert!(verdict.ambiguity.is_none());
    }

    #[test]
    fn test_needs_review_carries_reason() {
        let verdict = ReviewVerdict::needs_review(1, 1, "evidence contradicts itself");
        assert_eq!(verdict.outcome, VerdictOutcome::NeedsReview);
        assert_eq!(
            verdict.ambiguity.as_deref(),
            Some("evidence contradicts itself")
        );
    }

    // =========================================
    // Embed/extract tests
    // =========================================

    #[test]
    fn test_embed_then_extract_roundtrip() {
        let verdict = ReviewVerdict::fail(2, 3, vec![challenge("missing migration", Severity::P0)]);
        let body = embed_verdict(&verdict);

        assert!(body.contains("Review of task 2 attempt 3: FAIL"));
        assert!(body.contains("missing migration"));

        let extracted = extract_verdict(&body).unwrap();
        assert_eq!(extracted, verdict);
    }

    #[test]
    fn test_extract_verdict_absent() {
        assert!(extract_verdict("just prose, no block").is_none());
        assert!(extract_verdict("<verdict>not json</verdict>").is_none());
        assert!(extract_verdict("<verdict>{\"truncated\":").is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::P0 < Severity::P1);
        assert!(Severity::P1 < Severity::P2);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(VerdictOutcome::NeedsReview.to_string(), "NEEDS_REVIEW");
        assert_eq!(VerdictOutcome::Pass.to_string(), "PASS");
    }
}
