//! Plan model: checklist document parsing and status write-back.
//!
//! A plan is a human-authored markdown checklist. The orchestrator relies on
//! exactly two contracts: tasks can be enumerated in order, and a checkbox
//! marker can be toggled per task. Everything else in the document is opaque
//! prose.
//!
//! ## Format
//!
//! ```text
//! # Payments milestone
//!
//! - [ ] Add the invoice table
//!   - migration creates invoices with amount and currency
//!   - model exposes a typed Currency enum
//! - [~] Wire the billing endpoint
//! - [x] Set up CI
//! - [!] Migrate the legacy importer
//! ```
//!
//! Top-level `- [.]` lines are tasks; indented dash lines beneath a task are
//! its requirement statements. Markers: `[ ]` pending, `[~]` in progress,
//! `[x]` done, `[!]` escalated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::errors::PlanError;

/// Status of a single task within the automated loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    AwaitingReview,
    Done,
    Escalated,
}

impl TaskStatus {
    /// Check if this status is terminal for the automated loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Escalated)
    }

    /// The checkbox marker written back to the plan document.
    pub fn marker(&self) -> char {
        match self {
            Self::Pending => ' ',
            Self::InProgress | Self::AwaitingReview => '~',
            Self::Done => 'x',
            Self::Escalated => '!',
        }
    }

    fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(Self::Pending),
            '~' => Some(Self::InProgress),
            'x' | 'X' => Some(Self::Done),
            '!' => Some(Self::Escalated),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::AwaitingReview => "AWAITING_REVIEW",
            Self::Done => "DONE",
            Self::Escalated => "ESCALATED",
        };
        write!(f, "{}", s)
    }
}

/// A single task from the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Ordinal position in the plan (1-based).
    pub id: u64,
    /// Human-readable description from the checklist line.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Requirement statements (indented sub-bullets). Plain text; matching
    /// requirement to evidence is the review gate's pluggable concern.
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// An ordered, parsed plan.
///
/// Parsed once per session; immutable except for status annotations written
/// back to the source document for human visibility. The ledger, not this
/// document, is authoritative for progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Parse a plan from a checklist document.
    ///
    /// Fails with [`PlanError::Malformed`] if no tasks can be identified.
    pub fn parse(document: &str) -> Result<Self, PlanError> {
        let mut tasks: Vec<Task> = Vec::new();

        for line in document.lines() {
            if let Some((status, description)) = parse_task_line(line) {
                tasks.push(Task {
                    id: tasks.len() as u64 + 1,
                    description,
                    status,
                    requirements: Vec::new(),
                });
            } else if let Some(requirement) = parse_requirement_line(line)
                && let Some(task) = tasks.last_mut()
            {
                task.requirements.push(requirement);
            }
        }

        if tasks.is_empty() {
            return Err(PlanError::Malformed);
        }

        Ok(Self { tasks })
    }

    /// Load and parse a plan document from disk.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Get a task by ordinal id.
    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Get a mutable task by ordinal id.
    pub fn task_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Requirement statements for a task, in document order.
    pub fn requirements_of(&self, id: u64) -> Result<&[String], PlanError> {
        self.task(id)
            .map(|t| t.requirements.as_slice())
            .ok_or(PlanError::UnknownTask(id))
    }

    /// The current task: lowest ordinal not in a terminal status.
    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| !t.status.is_terminal())
    }

    /// Check if every task is terminal.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Toggle the checkbox marker for a task in the on-disk document.
///
/// This is a side effect for human readability only; failures here never
/// affect control-flow correctness, so callers typically log and continue.
pub fn mark_task_status(path: &Path, task_id: u64, status: TaskStatus) -> Result<(), PlanError> {
    let content = std::fs::read_to_string(path).map_err(|source| PlanError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let mut ordinal: u64 = 0;
    let mut found = false;
    let mut lines: Vec<String> = Vec::with_capacity(content.lines().count());

    for line in content.lines() {
        if parse_task_line(line).is_some() {
            ordinal += 1;
            if ordinal == task_id {
                lines.push(replace_marker(line, status.marker()));
                found = true;
                continue;
            }
        }
        lines.push(line.to_string());
    }

    if !found {
        return Err(PlanError::UnknownTask(task_id));
    }

    let mut updated = lines.join("\n");
    if content.ends_with('\n') {
        updated.push('\n');
    }

    std::fs::write(path, updated).map_err(|source| PlanError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a top-level checklist line into (status, description).
fn parse_task_line(line: &str) -> Option<(TaskStatus, String)> {
    // Tasks sit at indent 0 or 1; deeper dashes are requirements.
    let indent = line.len() - line.trim_start().len();
    if indent > 1 {
        return None;
    }
    let rest = line.trim_start().strip_prefix("- [")?;
    let marker = rest.chars().next()?;
    let status = TaskStatus::from_marker(marker)?;
    let description = rest.get(1..)?.strip_prefix(']')?.trim();
    if description.is_empty() {
        return None;
    }
    Some((status, description.to_string()))
}

/// Parse an indented sub-bullet into a requirement statement.
fn parse_requirement_line(line: &str) -> Option<String> {
    let indent = line.len() - line.trim_start().len();
    if indent < 2 {
        return None;
    }
    let text = line.trim_start().strip_prefix("- ")?.trim();
    if text.is_empty() || text.starts_with('[') {
        return None;
    }
    Some(text.to_string())
}

fn replace_marker(line: &str, marker: char) -> String {
    match (line.find('['), line.find(']')) {
        (Some(open), Some(close)) if close == open + 2 => {
            let mut out = String::with_capacity(line.len());
            out.push_str(&line[..open + 1]);
            out.push(marker);
            out.push_str(&line[close..]);
            out
        }
        _ => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
# Milestone

Some prose the engine ignores.

- [ ] Add the invoice table
  - migration creates invoices with amount and currency
  - model exposes a typed Currency enum
- [~] Wire the billing endpoint
  - endpoint returns 402 on unpaid invoices
- [x] Set up CI
- [!] Migrate the legacy importer
";

    // =========================================
    // Parsing tests
    // =========================================

    #[test]
    fn test_parse_enumerates_tasks_in_order() {
        let plan = Plan::parse(SAMPLE).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.tasks[0].id, 1);
        assert_eq!(plan.tasks[0].description, "Add the invoice table");
        assert_eq!(plan.tasks[3].id, 4);
        assert_eq!(plan.tasks[3].description, "Migrate the legacy importer");
    }

    #[test]
    fn test_parse_maps_markers_to_statuses() {
        let plan = Plan::parse(SAMPLE).unwrap();
        assert_eq!(plan.tasks[0].status, TaskStatus::Pending);
        assert_eq!(plan.tasks[1].status, TaskStatus::InProgress);
        assert_eq!(plan.tasks[2].status, TaskStatus::Done);
        assert_eq!(plan.tasks[3].status, TaskStatus::Escalated);
    }

    #[test]
    fn test_parse_attaches_requirements_to_owning_task() {
        let plan = Plan::parse(SAMPLE).unwrap();
        assert_eq!(
            plan.requirements_of(1).unwrap(),
            &[
                "migration creates invoices with amount and currency",
                "model exposes a typed Currency enum"
            ]
        );
        assert_eq!(
            plan.requirements_of(2).unwrap(),
            &["endpoint returns 402 on unpaid invoices"]
        );
        assert!(plan.requirements_of(3).unwrap().is_empty());
    }

    #[test]
    fn test_parse_no_tasks_is_malformed() {
        let err = Plan::parse("# Just a title\n\nProse only.\n").unwrap_err();
        assert!(matches!(err, PlanError::Malformed));
    }

    #[test]
    fn test_parse_ignores_unknown_markers() {
        let plan = Plan::parse("- [?] mystery\n- [ ] real task\n").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tasks[0].description, "real task");
    }

    #[test]
    fn test_requirements_of_unknown_task() {
        let plan = Plan::parse("- [ ] only task\n").unwrap();
        let err = plan.requirements_of(7).unwrap_err();
        assert!(matches!(err, PlanError::UnknownTask(7)));
    }

    #[test]
    fn test_current_task_is_lowest_non_terminal() {
        let plan = Plan::parse("- [x] one\n- [!] two\n- [ ] three\n- [ ] four\n").unwrap();
        assert_eq!(plan.current_task().unwrap().id, 3);
    }

    #[test]
    fn test_is_complete_when_all_terminal() {
        let plan = Plan::parse("- [x] one\n- [!] two\n").unwrap();
        assert!(plan.is_complete());
        assert!(plan.current_task().is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Plan::load(Path::new("/nonexistent/plan.md")).unwrap_err();
        assert!(matches!(err, PlanError::ReadFailed { .. }));
    }

    // =========================================
    // Status write-back tests
    // =========================================

    #[test]
    fn test_mark_task_status_toggles_only_target_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.md");
        fs::write(&path, SAMPLE).unwrap();

        mark_task_status(&path, 1, TaskStatus::Done).unwrap();

        let updated = fs::read_to_string(&path).unwrap();
        assert!(updated.contains("- [x] Add the invoice table"));
        assert!(updated.contains("- [~] Wire the billing endpoint"));
        // Requirements are untouched
        assert!(updated.contains("  - model exposes a typed Currency enum"));

        let reparsed = Plan::parse(&updated).unwrap();
        assert_eq!(reparsed.tasks[0].status, TaskStatus::Done);
    }

    #[test]
    fn test_mark_task_status_escalated_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.md");
        fs::write(&path, "- [ ] solo task\n").unwrap();

        mark_task_status(&path, 1, TaskStatus::Escalated).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "- [!] solo task\n"
        );
    }

    #[test]
    fn test_mark_task_status_unknown_task() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.md");
        fs::write(&path, "- [ ] solo task\n").unwrap();

        let err = mark_task_status(&path, 3, TaskStatus::Done).unwrap_err();
        assert!(matches!(err, PlanError::UnknownTask(3)));
        // Document unchanged on failure
        assert_eq!(fs::read_to_string(&path).unwrap(), "- [ ] solo task\n");
    }

    #[test]
    fn test_mark_then_reparse_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.md");
        fs::write(&path, "- [ ] a\n- [ ] b\n").unwrap();

        mark_task_status(&path, 1, TaskStatus::InProgress).unwrap();
        mark_task_status(&path, 2, TaskStatus::Done).unwrap();

        let plan = Plan::load(&path).unwrap();
        assert_eq!(plan.tasks[0].status, TaskStatus::InProgress);
        assert_eq!(plan.tasks[1].status, TaskStatus::Done);
    }

}
