//! Review gate: verdicts, challenges, and pluggable evidence classification.
//!
//! The gate evaluates a worker handoff against a task's requirement
//! statements and returns a verdict plus at most three ranked, actionable
//! challenges. Requirement-to-evidence matching is inherently a judgment
//! call, so it lives behind the [`EvidenceClassifier`] trait rather than any
//! fixed string-matching algorithm.

pub mod gate;
pub mod process;
pub mod verdict;

pub use gate::{
    Classification, EvidenceClassifier, EvidenceStatus, RequirementFinding, ReviewGate,
    ScriptedClassifier,
};
pub use process::{ProcessClassifier, parse_review_output};
pub use verdict::{
    Challenge, MAX_CHALLENGES, ReviewVerdict, Severity, VerdictOutcome, embed_verdict,
    extract_verdict,
};
