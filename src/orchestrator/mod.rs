//! Turn orchestration.
//!
//! Covers the resumable execution flow for interactive turns, post-turn
//! hooks, and the background job manager.

pub mod flow;
pub mod hooks;
pub mod job_manager;

pub use flow::ResumableFlow;
pub use hooks::{CompletedTurn, HistoryCompaction, PostTurnHook};
pub use job_manager::JobManager;
