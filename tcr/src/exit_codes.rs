//! Stable exit codes for tcr CLI commands.

use crate::core::types::{Action, Decision};

/// Command succeeded, the path is allowed, or the cycle committed.
pub const OK: i32 = 0;
/// Command failed due to invalid config/state, a held lock, or other errors.
pub const INVALID: i32 = 1;
/// The gate blocked the path or the cycle was a discipline violation.
pub const BLOCKED: i32 = 4;
/// The cycle failed and the changes were reverted.
pub const REVERTED: i32 = 5;

pub fn for_action(action: Action) -> i32 {
    match action {
        Action::Allowed | Action::Committed => OK,
        Action::Blocked => BLOCKED,
        Action::Reverted => REVERTED,
    }
}

pub fn for_decision(decision: Decision) -> i32 {
    match decision {
        Decision::Allowed => OK,
        Decision::Blocked => BLOCKED,
    }
}
