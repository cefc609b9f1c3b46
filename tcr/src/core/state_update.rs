//! Revert-streak and test-state transitions.

use chrono::{DateTime, Utc};

use crate::core::types::CycleOutcome;
use crate::state::{EnforcementState, TestRunRecord};

/// Compute the state that follows `prev` after a cycle with `outcome`.
///
/// - `Passed`: streak resets, last commit time and last run move to `now`,
///   failing tests clear (GREEN).
/// - `Failed`: streak increments, failing tests are replaced (RED).
/// - `Violation`: streak increments; the discarded run leaves the recorded
///   test state untouched.
///
/// Overlay mounts and the schema version are carried over unchanged.
pub fn apply_outcome(
    prev: &EnforcementState,
    outcome: &CycleOutcome,
    now: DateTime<Utc>,
) -> EnforcementState {
    let mut next = prev.clone();
    match outcome {
        CycleOutcome::Passed { .. } => {
            next.revert_streak = 0;
            next.last_commit_time = Some(now);
            next.failing_tests.clear();
            next.test_result = TestRunRecord {
                passed: true,
                last_run_at: Some(now),
            };
        }
        CycleOutcome::Failed { failing_tests, .. } => {
            next.revert_streak = prev.revert_streak.saturating_add(1);
            next.failing_tests = failing_tests.clone();
            next.test_result = TestRunRecord {
                passed: false,
                last_run_at: Some(now),
            };
        }
        CycleOutcome::Violation { .. } => {
            next.revert_streak = prev.revert_streak.saturating_add(1);
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::now_utc;
    use crate::test_support::{green_state, red_state};

    #[test]
    fn passed_resets_streak_and_clears_failures() {
        let mut prev = red_state(&["TestA"]);
        prev.revert_streak = 3;
        let now = now_utc();

        let next = apply_outcome(
            &prev,
            &CycleOutcome::Passed {
                test: "TestA".to_string(),
            },
            now,
        );

        assert_eq!(next.revert_streak, 0);
        assert!(next.failing_tests.is_empty());
        assert!(next.test_result.passed);
        assert_eq!(next.last_commit_time, Some(now));
        assert_eq!(next.test_result.last_run_at, Some(now));
    }

    #[test]
    fn failed_increments_streak_and_records_failures() {
        let prev = green_state();
        let next = apply_outcome(
            &prev,
            &CycleOutcome::Failed {
                failing_tests: vec!["TestB".to_string()],
                reason: "RED".to_string(),
            },
            now_utc(),
        );

        assert_eq!(next.revert_streak, 1);
        assert_eq!(next.failing_tests, vec!["TestB".to_string()]);
        assert!(!next.test_result.passed);
        assert!(next.is_red());
        assert_eq!(next.last_commit_time, prev.last_commit_time);
    }

    #[test]
    fn violation_only_touches_streak() {
        let mut prev = red_state(&["TestA"]);
        prev.revert_streak = 1;
        let next = apply_outcome(
            &prev,
            &CycleOutcome::Violation {
                reason: "no tests".to_string(),
            },
            now_utc(),
        );

        assert_eq!(next.revert_streak, 2);
        assert_eq!(next.failing_tests, prev.failing_tests);
        assert_eq!(next.test_result, prev.test_result);
    }

    #[test]
    fn streak_saturates_instead_of_wrapping() {
        let mut prev = green_state();
        prev.revert_streak = u32::MAX;
        let next = apply_outcome(
            &prev,
            &CycleOutcome::Violation {
                reason: "x".to_string(),
            },
            now_utc(),
        );
        assert_eq!(next.revert_streak, u32::MAX);
    }
}
