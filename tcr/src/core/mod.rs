//! Deterministic, pure logic shared by the enforcement commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod gate;
pub mod mounts;
pub mod state_update;
pub mod test_output;
pub mod types;
