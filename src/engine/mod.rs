//! Orchestration engine.
//!
//! Splits into three layers: the worker invocation boundary ([`worker`]),
//! the context document rendered across it ([`context`]), and the state
//! machine that sequences attempts, reviews, and escalations ([`runner`]).

pub mod context;
pub mod runner;
pub mod worker;

pub use context::WorkerContext;
pub use runner::{Engine, Escalation, EscalationReason, RunOutcome};
pub use worker::{ProcessWorker, ScriptedWorker, Worker, WorkerOutput, parse_blocked};
