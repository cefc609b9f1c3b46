//! I/O helpers for enforcement commands.

pub mod config;
pub mod git;
pub mod init;
pub mod liveness;
pub mod lock;
pub mod process;
pub mod state_store;
pub mod test_runner;
