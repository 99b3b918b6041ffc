#![forbid(unsafe_code)]

//! Resumable agent turns with human-in-the-loop interrupts, plus a
//! concurrency-bounded background job manager with a durable daily archive.

pub mod audit;
pub mod config;
pub mod driver;
pub mod errors;
pub mod interrupt;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod state;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
