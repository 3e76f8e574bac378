//! Typed error hierarchy for the baton orchestrator.
//!
//! Four top-level enums cover the four subsystems:
//! - `PlanError` — plan document parsing and write-back failures
//! - `StoreError` — handoff store append/read failures
//! - `LedgerError` — ledger persistence failures
//! - `EngineError` — orchestration loop failures

use thiserror::Error;

/// Errors from the plan model.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No tasks found in plan document")]
    Malformed,

    #[error("Failed to read plan document at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan document at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown task id {0}")]
    UnknownTask(u64),
}

/// Errors from the handoff store.
///
/// `DuplicateSequence` indicates an ordering bug in the caller and must never
/// be silently ignored - it would break the per-session total order.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Handoff {session}/task-{task}/seq-{sequence} already exists")]
    DuplicateSequence {
        session: String,
        task: u64,
        sequence: u64,
    },

    #[error("Failed to write handoff at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read handoff store at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed handoff record at {path}: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from ledger persistence.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read ledger at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write ledger at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ledger record at {path}: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn worker command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
