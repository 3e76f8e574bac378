pub mod config;
pub mod engine;
pub mod errors;
pub mod handoff;
pub mod ledger;
pub mod plan;
pub mod review;
