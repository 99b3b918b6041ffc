//! Domain model module declarations.

pub mod interrupt;
pub mod job;
pub mod turn;
