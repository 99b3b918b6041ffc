//! Storage: checkpoint state, session history, and the job archive.

pub mod checkpoint_store;
pub mod job_archive;
pub mod session_store;
