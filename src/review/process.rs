//! Process-backed evidence classifier.
//!
//! Invokes an external reviewer command, feeds it the task's requirements and
//! the worker handoff on stdin, and parses a `<review>{json}</review>` block
//! from its stdout.
//!
//! ## Expected format
//!
//! ```xml
//! <review>
//! {
//!   "findings": [
//!     {
//!       "requirement": "rejects malformed rows",
//!       "status": "missing",
//!       "severity": "p0",
//!       "observation": "no rejection path in the diff",
//!       "rationale": "bad rows would corrupt downstream tables",
//!       "suggested_action": "validate each row before insert",
//!       "evidence_requested": "a test feeding a bad row"
//!     }
//!   ]
//! }
//! </review>
//! ```
//!
//! Alternatively `{"ambiguous": "reason"}` when the reviewer cannot classify
//! with confidence. Anything unparseable is treated as ambiguous and routed
//! to a human, never as a silent pass.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::handoff::Handoff;
use crate::review::gate::{Classification, EvidenceClassifier, RequirementFinding};

/// Classifier that delegates judgment to an external reviewer process.
pub struct ProcessClassifier {
    command: String,
    timeout: Duration,
}

impl ProcessClassifier {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    fn render_prompt(requirements: &[String], handoff: &Handoff) -> String {
        let mut prompt = String::from(
            "You are reviewing a worker's handoff against the task's requirements.\n\n\
             ## REQUIREMENTS\n",
        );
        for (i, requirement) in requirements.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, requirement));
        }
        prompt.push_str("\n## WORKER HANDOFF\n");
        prompt.push_str(&handoff.content);
        prompt.push_str(
            "\n\n## OUTPUT\n\
             Classify every requirement as done, partial, missing, diverged, or deferred \
             (deferred needs a justification). Respond with a <review>{json}</review> block \
             containing a findings array, or {\"ambiguous\": \"reason\"} if the evidence \
             cannot be classified with confidence.\n",
        );
        prompt
    }

    async fn invoke(&self, prompt: &str) -> anyhow::Result<Classification> {
        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            anyhow::bail!("Reviewer command is empty");
        };

        // Dropped on the timeout branch below; kill the reviewer with it.
        let mut child = tokio::process::Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn reviewer '{}': {}", self.command, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "reviewer timed out");
                return Ok(Classification::Ambiguous {
                    reason: format!(
                        "Reviewer timed out after {}s",
                        self.timeout.as_secs()
                    ),
                });
            }
        };

        if !output.status.success() {
            return Ok(Classification::Ambiguous {
                reason: format!(
                    "Reviewer exited with code {}",
                    output.status.code().unwrap_or(-1)
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(chars = stdout.len(), "reviewer output received");
        Ok(parse_review_output(&stdout))
    }
}

#[async_trait]
impl EvidenceClassifier for ProcessClassifier {
    async fn classify(
        &self,
        requirements: &[String],
        worker_handoff: &Handoff,
    ) -> anyhow::Result<Classification> {
        let prompt = Self::render_prompt(requirements, worker_handoff);
        self.invoke(&prompt).await
    }
}

/// Raw review block from the reviewer's output.
#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    findings: Vec<RequirementFinding>,
    #[serde(default)]
    ambiguous: Option<String>,
}

const REVIEW_OPEN: &str = "<review>";
const REVIEW_CLOSE: &str = "</review>";

/// Parse the `<review>...</review>` block from reviewer output.
///
/// A missing or malformed block classifies as ambiguous; that routes the task
/// to a human instead of trusting an unreadable review.
pub fn parse_review_output(output: &str) -> Classification {
    let Some(start) = output.find(REVIEW_OPEN) else {
        return Classification::Ambiguous {
            reason: "Reviewer output contained no <review> block".to_string(),
        };
    };
    let content_start = start + REVIEW_OPEN.len();
    let Some(end) = output[content_start..].find(REVIEW_CLOSE) else {
        return Classification::Ambiguous {
            reason: "Reviewer output <review> block was not closed".to_string(),
        };
    };

    let json = output[content_start..content_start + end].trim();
    match serde_json::from_str::<RawReview>(json) {
        Ok(raw) => {
            if let Some(reason) = raw.ambiguous {
                Classification::Ambiguous { reason }
            } else {
                Classification::Findings(raw.findings)
            }
        }
        Err(e) => Classification::Ambiguous {
            reason: format!("Reviewer output could not be parsed: {}", e),
        },
    }
}
