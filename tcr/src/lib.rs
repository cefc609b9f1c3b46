//! Local enforcement engine for the Test && Commit || Revert (TCR) discipline.
//!
//! The crate gates file modifications on the project's RED/GREEN test state,
//! enforces one executed test per cycle, tracks sandboxed overlay sessions,
//! and commits or reverts each cycle. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, gate decision,
//!   state transitions, test-output parsing). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (config and state files, locking,
//!   process execution, git). Isolated behind traits where tests need fakes.
//!
//! Orchestration modules ([`gate`], [`cycle`], [`session`], [`status`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod cycle;
pub mod error;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod session;
pub mod state;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
