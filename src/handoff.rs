//! Handoff records and the append-only handoff store.
//!
//! A handoff is the immutable record of one worker or reviewer invocation,
//! used both as a durable log and as the input context for the next
//! invocation. The store is a flat namespace of JSON files addressed by a
//! deterministic, human-sortable key, so a session directory doubles as a
//! debugging artifact.
//!
//! Layout: `<root>/<session>/handoffs/task-<NN>-seq-<NNNN>-<role>.json`.
//!
//! The store's central guarantee is total order per session: sequence numbers
//! are session-wide monotonic and match real write order, which is what makes
//! recovery deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::StoreError;

/// Who authored a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffRole {
    Worker,
    Reviewer,
}

impl HandoffRole {
    fn slug(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for HandoffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Terminal status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffStatus {
    /// The invocation produced a usable artifact.
    Complete,
    /// The invocation signalled an obstacle or timed out.
    Blocked,
}

/// An immutable record of one invocation's output.
///
/// A new attempt produces a new handoff with an incremented sequence number,
/// never an overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub session_id: String,
    pub task_id: u64,
    pub author_role: HandoffRole,
    pub sequence_number: u64,
    /// Opaque text artifact. The engine never interprets worker content;
    /// reviewer content embeds the verdict block.
    pub content: String,
    pub status: HandoffStatus,
    pub created_at: DateTime<Utc>,
}

impl Handoff {
    pub fn new(
        session_id: impl Into<String>,
        task_id: u64,
        author_role: HandoffRole,
        sequence_number: u64,
        content: impl Into<String>,
        status: HandoffStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            task_id,
            author_role,
            sequence_number,
            content: content.into(),
            status,
            created_at: Utc::now(),
        }
    }

    /// The stable store key for this handoff.
    pub fn handoff_ref(&self) -> HandoffRef {
        HandoffRef {
            session_id: self.session_id.clone(),
            task_id: self.task_id,
            sequence_number: self.sequence_number,
        }
    }

    fn file_name(&self) -> String {
        format!(
            "task-{:02}-seq-{:04}-{}.json",
            self.task_id,
            self.sequence_number,
            self.author_role.slug()
        )
    }
}

/// Stable reference to a stored handoff, keyed by (session, task, sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRef {
    pub session_id: String,
    pub task_id: u64,
    pub sequence_number: u64,
}

impl fmt::Display for HandoffRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/task-{:02}/seq-{:04}",
            self.session_id, self.task_id, self.sequence_number
        )
    }
}

/// Append-only durable store for handoffs.
///
/// Single-writer within a session (the engine); readers are free.
pub struct HandoffStore {
    root: PathBuf,
}

impl HandoffStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn handoffs_dir(&self, session: &str) -> PathBuf {
        self.root.join(session).join("handoffs")
    }

    /// Append a handoff.
    ///
    /// Fails with [`StoreError::DuplicateSequence`] if the key already exists,
    /// leaving the store unchanged.
    pub fn append(&self, handoff: &Handoff) -> Result<HandoffRef, StoreError> {
        let dir = self.handoffs_dir(&handoff.session_id);
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::WriteFailed {
            path: dir.clone(),
            source,
        })?;

        // Two role slugs can share a (task, sequence) prefix only through a
        // caller bug; guard on the key itself, not the full file name.
        if self.key_exists(&handoff.session_id, handoff.task_id, handoff.sequence_number)? {
            return Err(StoreError::DuplicateSequence {
                session: handoff.session_id.clone(),
                task: handoff.task_id,
                sequence: handoff.sequence_number,
            });
        }

        let path = dir.join(handoff.file_name());
        let record = serde_json::to_string_pretty(handoff).map_err(|source| {
            StoreError::WriteFailed {
                path: path.clone(),
                source: std::io::Error::other(source),
            }
        })?;

        // create_new keeps the append-only invariant even under a race with
        // the existence check above.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    StoreError::DuplicateSequence {
                        session: handoff.session_id.clone(),
                        task: handoff.task_id,
                        sequence: handoff.sequence_number,
                    }
                } else {
                    StoreError::WriteFailed {
                        path: path.clone(),
                        source,
                    }
                }
            })?;

        file.write_all(record.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|source| StoreError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        Ok(handoff.handoff_ref())
    }

    /// The latest handoff for a task, by sequence number.
    pub fn latest(&self, session: &str, task_id: u64) -> Result<Option<Handoff>, StoreError> {
        let mut handoffs = self.list_for_task(session, task_id)?;
        Ok(handoffs.pop())
    }

    /// All handoffs in a session, ordered by sequence number.
    pub fn list_by_session(&self, session: &str) -> Result<Vec<Handoff>, StoreError> {
        let dir = self.handoffs_dir(session);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| StoreError::ReadFailed {
            path: dir.clone(),
            source,
        })?;

        let mut handoffs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::ReadFailed {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            handoffs.push(read_handoff(&path)?);
        }

        handoffs.sort_by_key(|h| h.sequence_number);
        Ok(handoffs)
    }

    /// Handoffs for one task, ordered by sequence number.
    pub fn list_for_task(&self, session: &str, task_id: u64) -> Result<Vec<Handoff>, StoreError> {
        let mut handoffs = self.list_by_session(session)?;
        handoffs.retain(|h| h.task_id == task_id);
        Ok(handoffs)
    }

    /// The next free sequence number for a session (starts at 1).
    pub fn next_sequence(&self, session: &str) -> Result<u64, StoreError> {
        let handoffs = self.list_by_session(session)?;
        Ok(handoffs.last().map(|h| h.sequence_number + 1).unwrap_or(1))
    }

    fn key_exists(
        &self,
        session: &str,
        task_id: u64,
        sequence: u64,
    ) -> Result<bool, StoreError> {
        Ok(self
            .list_by_session(session)?
            .iter()
            .any(|h| h.task_id == task_id && h.sequence_number == sequence))
    }
}

fn read_handoff(path: &Path) -> Result<Handoff, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (HandoffStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (HandoffStore::new(dir.path().to_path_buf()), dir)
    }

    fn worker_handoff(session: &str, task: u64, seq: u64, content: &str) -> Handoff {
        Handoff::new(
            session,
            task,
            HandoffRole::Worker,
            seq,
            content,
            HandoffStatus::Complete,
        )
    }

    // =========================================
    // Append and ordering tests
    // =========================================

    #[test]
    fn test_append_and_list_roundtrip() {
        let (store, _dir) = make_store();
        store.append(&worker_handoff("s1", 1, 1, "first")).unwrap();
        store.append(&worker_handoff("s1", 1, 2, "second")).unwrap();

        let listed = store.list_by_session("s1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "first");
        assert_eq!(listed[1].content, "second");
    }

    #[test]
    fn test_list_by_session_preserves_write_order() {
        let (store, _dir) = make_store();
        // Interleave tasks; order must follow sequence, not task id.
        store.append(&worker_handoff("s1", 2, 1, "t2 first")).unwrap();
        store.append(&worker_handoff("s1", 1, 2, "t1 second")).unwrap();
        store.append(&worker_handoff("s1", 2, 3, "t2 third")).unwrap();

        let listed = store.list_by_session("s1").unwrap();
        let sequences: Vec<u64> = listed.iter().map(|h| h.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(listed[1].task_id, 1);
    }

    #[test]
    fn test_duplicate_sequence_rejected_and_store_unchanged() {
        let (store, _dir) = make_store();
        store.append(&worker_handoff("s1", 1, 1, "original")).unwrap();

        let dup = Handoff::new(
            "s1",
            1,
            HandoffRole::Reviewer,
            1,
            "imposter",
            HandoffStatus::Complete,
        );
        let err = store.append(&dup).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateSequence {
                task: 1,
                sequence: 1,
                ..
            }
        ));

        let listed = store.list_by_session("s1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "original");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (store, _dir) = make_store();
        store.append(&worker_handoff("s1", 1, 1, "a")).unwrap();
        store.append(&worker_handoff("s2", 1, 1, "b")).unwrap();

        assert_eq!(store.list_by_session("s1").unwrap().len(), 1);
        assert_eq!(store.list_by_session("s2").unwrap().len(), 1);
    }

    #[test]
    fn test_list_empty_session() {
        let (store, _dir) = make_store();
        assert!(store.list_by_session("ghost").unwrap().is_empty());
        assert!(store.latest("ghost", 1).unwrap().is_none());
    }

    // =========================================
    // Latest and sequence tests
    // =========================================

    #[test]
    fn test_latest_picks_highest_sequence_for_task() {
        let (store, _dir) = make_store();
        store.append(&worker_handoff("s1", 1, 1, "attempt one")).unwrap();
        store.append(&worker_handoff("s1", 2, 2, "other task")).unwrap();
        store.append(&worker_handoff("s1", 1, 3, "attempt two")).unwrap();

        let latest = store.latest("s1", 1).unwrap().unwrap();
        assert_eq!(latest.sequence_number, 3);
        assert_eq!(latest.content, "attempt two");
    }

    #[test]
    fn test_next_sequence_starts_at_one_and_is_monotonic() {
        let (store, _dir) = make_store();
        assert_eq!(store.next_sequence("s1").unwrap(), 1);

        store.append(&worker_handoff("s1", 1, 1, "x")).unwrap();
        assert_eq!(store.next_sequence("s1").unwrap(), 2);

        store.append(&worker_handoff("s1", 3, 2, "y")).unwrap();
        assert_eq!(store.next_sequence("s1").unwrap(), 3);
    }

    // =========================================
    // Durability and key tests
    // =========================================

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = HandoffStore::new(dir.path().to_path_buf());
            store.append(&worker_handoff("s1", 1, 1, "persisted")).unwrap();
        }
        {
            let store = HandoffStore::new(dir.path().to_path_buf());
            let latest = store.latest("s1", 1).unwrap().unwrap();
            assert_eq!(latest.content, "persisted");
        }
    }

    #[test]
    fn test_file_keys_are_deterministic_and_sortable() {
        let (store, dir) = make_store();
        store.append(&worker_handoff("s1", 1, 1, "a")).unwrap();
        store
            .append(&Handoff::new(
                "s1",
                1,
                HandoffRole::Reviewer,
                2,
                "b",
                HandoffStatus::Complete,
            ))
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("s1/handoffs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "task-01-seq-0001-worker.json",
                "task-01-seq-0002-reviewer.json"
            ]
        );
    }

    #[test]
    fn test_handoff_ref_display() {
        let handoff = worker_handoff("s1", 2, 13, "x");
        assert_eq!(handoff.handoff_ref().to_string(), "s1/task-02/seq-0013");
    }
}
