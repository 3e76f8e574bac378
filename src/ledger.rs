//! The ledger: authoritative progress record for a session.
//!
//! One JSON record per session, distinct from the human-readable plan
//! document. Current-task state is an explicit field recomputed only through
//! transitions, never inferred by scanning files. `record_transition` is the
//! one operation requiring atomicity: the ledger write lands via temp file +
//! rename so a crash mid-write leaves the previous record intact, and
//! re-applying the same transition is harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::errors::LedgerError;
use crate::handoff::HandoffRef;
use crate::plan::TaskStatus;

/// Per-session progress state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub session_id: String,
    /// Tasks that reached DONE.
    pub completed_task_ids: BTreeSet<u64>,
    /// Tasks that reached ESCALATED and await a human decision.
    pub escalated_task_ids: BTreeSet<u64>,
    /// The task currently being driven, if any.
    pub current_task_id: Option<u64>,
    /// Worker attempts used for the current task. Persisted so recovery never
    /// re-derives it from the handoff history.
    pub attempt_count: u32,
    /// The handoff that triggered the most recent transition.
    pub last_handoff_ref: Option<HandoffRef>,
    pub updated_at: DateTime<Utc>,
}

impl Ledger {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            completed_task_ids: BTreeSet::new(),
            escalated_task_ids: BTreeSet::new(),
            current_task_id: None,
            attempt_count: 0,
            last_handoff_ref: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self, task_id: u64) -> bool {
        self.completed_task_ids.contains(&task_id)
    }

    pub fn is_escalated(&self, task_id: u64) -> bool {
        self.escalated_task_ids.contains(&task_id)
    }

    /// Check if a task is terminal for the automated loop.
    pub fn is_terminal(&self, task_id: u64) -> bool {
        self.is_completed(task_id) || self.is_escalated(task_id)
    }

    /// Apply a transition in memory. Assignments and set inserts only, so the
    /// same transition applied twice yields the same state.
    fn apply(
        &mut self,
        task_id: u64,
        new_status: TaskStatus,
        attempt: u32,
        handoff_ref: Option<HandoffRef>,
    ) {
        match new_status {
            TaskStatus::Pending => {
                // Out-of-band reopen of an escalated task.
                self.escalated_task_ids.remove(&task_id);
                if self.current_task_id == Some(task_id) {
                    self.current_task_id = None;
                    self.attempt_count = 0;
                }
            }
            TaskStatus::InProgress | TaskStatus::AwaitingReview => {
                self.current_task_id = Some(task_id);
                self.attempt_count = attempt;
            }
            TaskStatus::Done => {
                self.completed_task_ids.insert(task_id);
                self.escalated_task_ids.remove(&task_id);
                if self.current_task_id == Some(task_id) {
                    self.current_task_id = None;
                    self.attempt_count = 0;
                }
            }
            TaskStatus::Escalated => {
                self.escalated_task_ids.insert(task_id);
                self.current_task_id = Some(task_id);
                self.attempt_count = attempt;
            }
        }
        if let Some(r) = handoff_ref {
            self.last_handoff_ref = Some(r);
        }
        self.updated_at = Utc::now();
    }
}

/// Durable ledger persistence, one record per session.
pub struct LedgerStore {
    root: PathBuf,
}

impl LedgerStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn ledger_path(&self, session: &str) -> PathBuf {
        self.root.join(session).join("ledger.json")
    }

    /// Load a session's ledger, or an empty ledger if none exists yet.
    pub fn load(&self, session: &str) -> Result<Ledger, LedgerError> {
        let path = self.ledger_path(session);
        if !path.exists() {
            return Ok(Ledger::new(session));
        }
        let content = std::fs::read_to_string(&path).map_err(|source| LedgerError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| LedgerError::Malformed { path, source })
    }

    /// Record a task transition and persist the ledger atomically.
    ///
    /// Idempotent: re-applying the same transition after a crash-and-retry of
    /// the write produces the same on-disk state.
    pub fn record_transition(
        &self,
        ledger: &mut Ledger,
        task_id: u64,
        new_status: TaskStatus,
        attempt: u32,
        handoff_ref: Option<HandoffRef>,
    ) -> Result<(), LedgerError> {
        ledger.apply(task_id, new_status, attempt, handoff_ref);
        self.save(ledger)
    }

    /// Persist via temp file + rename so readers never observe a torn record.
    pub fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let path = self.ledger_path(&ledger.session_id);
        let dir = self.root.join(&ledger.session_id);
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::WriteFailed {
            path: path.clone(),
            source,
        })?;

        let record = serde_json::to_string_pretty(ledger).map_err(|source| {
            LedgerError::WriteFailed {
                path: path.clone(),
                source: std::io::Error::other(source),
            }
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, record).map_err(|source| LedgerError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| LedgerError::WriteFailed {
            path: path.clone(),
            source,
        })
    }

    /// Remove a session's ledger, if present.
    pub fn reset(&self, session: &str) -> Result<(), LedgerError> {
        let path = self.ledger_path(session);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| LedgerError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn path_for_test(&self, session: &str) -> PathBuf {
        self.ledger_path(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (LedgerStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (LedgerStore::new(dir.path().to_path_buf()), dir)
    }

    fn some_ref(task: u64, seq: u64) -> Option<HandoffRef> {
        Some(HandoffRef {
            session_id: "s1".into(),
            task_id: task,
            sequence_number: seq,
        })
    }

    // =========================================
    // Load and persistence tests
    // =========================================

    #[test]
    fn test_load_absent_returns_empty_ledger() {
        let (store, _dir) = make_store();
        let ledger = store.load("s1").unwrap();
        assert_eq!(ledger.session_id, "s1");
        assert!(ledger.completed_task_ids.is_empty());
        assert!(ledger.current_task_id.is_none());
        assert_eq!(ledger.attempt_count, 0);
    }

    #[test]
    fn test_record_transition_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = LedgerStore::new(dir.path().to_path_buf());
            let mut ledger = store.load("s1").unwrap();
            store
                .record_transition(&mut ledger, 1, TaskStatus::InProgress, 1, None)
                .unwrap();
            store
                .record_transition(&mut ledger, 1, TaskStatus::Done, 1, some_ref(1, 2))
                .unwrap();
        }
        {
            let store = LedgerStore::new(dir.path().to_path_buf());
            let ledger = store.load("s1").unwrap();
            assert!(ledger.is_completed(1));
            assert!(ledger.current_task_id.is_none());
            assert_eq!(ledger.last_handoff_ref.unwrap().sequence_number, 2);
        }
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let (store, dir) = make_store();
        let mut ledger = store.load("s1").unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::InProgress, 1, None)
            .unwrap();

        let session_files: Vec<String> = std::fs::read_dir(dir.path().join("s1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(session_files, vec!["ledger.json"]);
    }

    // =========================================
    // Transition semantics tests
    // =========================================

    #[test]
    fn test_in_progress_sets_current_and_attempt() {
        let (store, _dir) = make_store();
        let mut ledger = store.load("s1").unwrap();
        store
            .record_transition(&mut ledger, 2, TaskStatus::InProgress, 3, None)
            .unwrap();
        assert_eq!(ledger.current_task_id, Some(2));
        assert_eq!(ledger.attempt_count, 3);
    }

    #[test]
    fn test_done_clears_current_and_resets_attempts() {
        let (store, _dir) = make_store();
        let mut ledger = store.load("s1").unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::InProgress, 2, None)
            .unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::Done, 2, some_ref(1, 4))
            .unwrap();

        assert!(ledger.is_completed(1));
        assert!(ledger.current_task_id.is_none());
        assert_eq!(ledger.attempt_count, 0);
    }

    #[test]
    fn test_escalated_is_terminal_but_stays_current() {
        let (store, _dir) = make_store();
        let mut ledger = store.load("s1").unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::Escalated, 3, some_ref(1, 6))
            .unwrap();

        assert!(ledger.is_escalated(1));
        assert!(ledger.is_terminal(1));
        // Stays current so recovery and the operator can see where it halted.
        assert_eq!(ledger.current_task_id, Some(1));
        assert_eq!(ledger.attempt_count, 3);
    }

    #[test]
    fn test_reopen_clears_escalation() {
        let (store, _dir) = make_store();
        let mut ledger = store.load("s1").unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::Escalated, 3, None)
            .unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::Pending, 0, None)
            .unwrap();

        assert!(!ledger.is_escalated(1));
        assert!(!ledger.is_terminal(1));
        assert!(ledger.current_task_id.is_none());
        assert_eq!(ledger.attempt_count, 0);
    }

    // =========================================
    // Idempotency tests
    // =========================================

    #[test]
    fn test_record_transition_is_idempotent() {
        let (store, _dir) = make_store();
        let mut ledger = store.load("s1").unwrap();

        store
            .record_transition(&mut ledger, 1, TaskStatus::Done, 1, some_ref(1, 2))
            .unwrap();
        let once = store.load("s1").unwrap();

        store
            .record_transition(&mut ledger, 1, TaskStatus::Done, 1, some_ref(1, 2))
            .unwrap();
        let twice = store.load("s1").unwrap();

        assert_eq!(once.completed_task_ids, twice.completed_task_ids);
        assert_eq!(once.current_task_id, twice.current_task_id);
        assert_eq!(once.attempt_count, twice.attempt_count);
        assert_eq!(once.last_handoff_ref, twice.last_handoff_ref);
    }

    #[test]
    fn test_reset_removes_record() {
        let (store, _dir) = make_store();
        let mut ledger = store.load("s1").unwrap();
        store
            .record_transition(&mut ledger, 1, TaskStatus::Done, 1, None)
            .unwrap();
        assert!(store.path_for_test("s1").exists());

        store.reset("s1").unwrap();
        assert!(!store.path_for_test("s1").exists());
        assert!(store.load("s1").unwrap().completed_task_ids.is_empty());
    }
}
