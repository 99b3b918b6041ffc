//! Interrupt registry and its pluggable per-kind handlers.

pub mod handlers;
pub mod history;
mod index;
pub mod registry;

pub use handlers::InterruptHandler;
pub use history::InterruptStats;
pub use registry::InterruptRegistry;
