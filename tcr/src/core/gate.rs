//! RED/GREEN gate policy and single-test discipline.

use crate::core::classifier::PathPolicy;
use crate::core::types::{CycleOutcome, Decision, FileClass, GateVerdict, TestResult};
use crate::error::TcrError;
use crate::state::EnforcementState;

/// Decide whether `path` may be modified in the current state.
///
/// Rules, in order:
/// 1. Protected paths are blocked in every state.
/// 2. RED allows any non-protected path, so the failing test can be fixed.
/// 3. GREEN allows only test files; implementation changes need a failing
///    test first.
pub fn decide(state: &EnforcementState, policy: &PathPolicy, path: &str) -> GateVerdict {
    let class = policy.classify(path);
    let (decision, reason) = match class {
        FileClass::Protected => (
            Decision::Blocked,
            format!("{path} is a protected path and cannot be modified in any state"),
        ),
        _ if state.is_red() => (
            Decision::Allowed,
            format!(
                "RED: {} failing ({}); changes to {path} are allowed",
                plural(state.failing_tests.len(), "test"),
                state.failing_tests.join(", ")
            ),
        ),
        FileClass::Test => (
            Decision::Allowed,
            format!("GREEN: {path} is a test file; test changes are allowed"),
        ),
        FileClass::Implementation => (
            Decision::Blocked,
            format!(
                "GREEN: {path} is an implementation file; add a failing test before changing behavior"
            ),
        ),
    };
    GateVerdict {
        decision,
        reason,
        class,
    }
}

/// Require exactly one executed test; returns its name.
pub fn validate_single_test(result: &TestResult) -> Result<&str, TcrError> {
    match result.executed_tests.as_slice() {
        [] => Err(TcrError::NoTestsExecuted),
        [only] => Ok(only.as_str()),
        many => Err(TcrError::MultipleTestsExecuted {
            count: many.len(),
            tests: many.to_vec(),
        }),
    }
}

/// Classify a detected run into the outcome that drives the state transition.
///
/// Timeouts count as failed runs. Detection errors and single-test
/// violations are never interpreted as a pass.
pub fn classify_outcome(detected: Result<TestResult, TcrError>) -> CycleOutcome {
    let result = match detected {
        Ok(result) => result,
        Err(err) => {
            return CycleOutcome::Violation {
                reason: err.to_string(),
            };
        }
    };

    if result.timed_out {
        return CycleOutcome::Failed {
            reason: format!(
                "RED: test run timed out after {}s",
                result.duration.as_secs()
            ),
            failing_tests: result.failed_tests,
        };
    }

    let test = match validate_single_test(&result) {
        Ok(test) => test.to_string(),
        Err(err) => {
            return CycleOutcome::Violation {
                reason: err.to_string(),
            };
        }
    };

    if result.passed {
        CycleOutcome::Passed { test }
    } else {
        CycleOutcome::Failed {
            reason: format!("RED: {} failed", result.failed_tests.join(", ")),
            failing_tests: result.failed_tests,
        }
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
