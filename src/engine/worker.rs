//! The worker invocation boundary.
//!
//! This is the seam where "how work gets done" plugs in: the engine only
//! sees an async call that takes a [`WorkerContext`] and returns opaque
//! output, possibly flagged as blocked.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::engine::context::WorkerContext;
use crate::errors::EngineError;

/// Raw result of one worker invocation, before it becomes a handoff.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    /// Opaque text artifact produced by the worker.
    pub content: String,
    /// Set when the worker signalled an obstacle instead of completing.
    pub blocked: Option<String>,
}

impl WorkerOutput {
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            blocked: None,
        }
    }

    pub fn blocked(content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            blocked: Some(reason.into()),
        }
    }
}

/// A delegated worker. Invocations are blocking from the engine's point of
/// view; the engine applies the timeout policy around this call.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, context: &WorkerContext) -> Result<WorkerOutput, EngineError>;
}

#[async_trait]
impl<W: Worker + ?Sized> Worker for std::sync::Arc<W> {
    async fn invoke(&self, context: &WorkerContext) -> Result<WorkerOutput, EngineError> {
        (**self).invoke(context).await
    }
}

/// Worker that spawns an external command, feeding the rendered context on
/// stdin and reading the handoff content from stdout.
pub struct ProcessWorker {
    command: String,
}

impl ProcessWorker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn invoke(&self, context: &WorkerContext) -> Result<WorkerOutput, EngineError> {
        let prompt = context.render();

        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(EngineError::SpawnFailed {
                command: self.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        // The engine drops this future on timeout; the child must die with it.
        let mut child = tokio::process::Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| EngineError::Other(e.into()))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| EngineError::Other(e.into()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Other(e.into()))?;

        let content = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = content.len(), "worker output received");

        if !output.status.success() {
            let reason = format!(
                "Worker exited with code {}",
                output.status.code().unwrap_or(-1)
            );
            return Ok(WorkerOutput::blocked(content, reason));
        }

        let blocked = parse_blocked(&content);
        Ok(WorkerOutput {
            content,
            blocked,
        })
    }
}

/// Detect a `<blocked>reason</blocked>` signal in worker output.
pub fn parse_blocked(output: &str) -> Option<String> {
    const OPEN: &str = "<blocked>";
    const CLOSE: &str = "</blocked>";

    if let Some(start) = output.find(OPEN) {
        let content_start = start + OPEN.len();
        if let Some(end) = output[content_start..].find(CLOSE) {
            let reason = output[content_start..content_start + end].trim();
            return Some(if reason.is_empty() {
                "Worker signalled a blocker without a reason".to_string()
            } else {
                reason.to_string()
            });
        }
    }
    if output.contains("<blocked/>") {
        return Some("Worker signalled a blocker without a reason".to_string());
    }
    None
}

/// Worker returning canned outputs in order. Test support for driving the
/// engine without an external process.
#[derive(Default)]
pub struct ScriptedWorker {
    outputs: Mutex<VecDeque<WorkerOutput>>,
    invocations: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new(outputs: Vec<WorkerOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    /// How many times `invoke` was called.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(&self, _context: &WorkerContext) -> Result<WorkerOutput, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self
            .outputs
            .lock()
            .map_err(|_| EngineError::Other(anyhow::anyhow!("scripted outputs lock poisoned")))?
            .pop_front();
        Ok(next.unwrap_or_else(|| WorkerOutput::complete("scripted work complete")))
    }
}
