//! Shared deterministic types for enforcement core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Gate answer for a proposed file modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allowed,
    Blocked,
}

/// How the gate classifies a path before applying RED/GREEN policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Protected,
    Test,
    /// Anything not matched by a protection rule or test pattern.
    Implementation,
}

/// Gate invocation result handed back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub decision: Decision,
    pub reason: String,
    pub class: FileClass,
}

impl GateVerdict {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }
}

/// Raw output of one external test-runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTestRun {
    /// Combined stdout then stderr.
    pub output: String,
    /// `None` when the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Structured form of a test run, consumed once by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub output: String,
    pub passed: bool,
    pub duration: Duration,
    /// Tests that actually ran (skipped and declared-only tests excluded),
    /// in order of first appearance.
    pub executed_tests: Vec<String>,
    pub failed_tests: Vec<String>,
    pub timed_out: bool,
}

/// Classified result of one enforcement cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Exactly one test ran and it passed.
    Passed { test: String },
    /// The run failed or timed out. `failing_tests` is never empty.
    Failed {
        failing_tests: Vec<String>,
        reason: String,
    },
    /// The run could not be trusted (unparsable output, zero or several
    /// executed tests). Changes are discarded and the test state is kept.
    Violation { reason: String },
}

impl CycleOutcome {
    pub fn action(&self) -> Action {
        match self {
            CycleOutcome::Passed { .. } => Action::Committed,
            CycleOutcome::Failed { .. } => Action::Reverted,
            CycleOutcome::Violation { .. } => Action::Blocked,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            CycleOutcome::Passed { test } => format!("GREEN: {test} passed"),
            CycleOutcome::Failed { reason, .. } => reason.clone(),
            CycleOutcome::Violation { reason } => reason.clone(),
        }
    }
}

/// Action reported to the orchestrator or agent integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Blocked,
    Allowed,
    Committed,
    Reverted,
}

/// Result reporting payload. `reason` is always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub action: Action,
    pub reason: String,
    pub streak: u32,
    pub output: String,
}
