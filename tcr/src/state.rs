//! Persisted enforcement state (`.opencode/tcr/state.json`).
//!
//! The state file is also read directly by status tooling outside this crate,
//! so field names are camelCase and unknown fields are tolerated on load.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Schema tag written into every state file produced by this crate.
pub const STATE_VERSION: &str = "3.0";

/// Aggregate test phase derived from the persisted failing tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Red,
    Green,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Red => f.write_str("RED"),
            Phase::Green => f.write_str("GREEN"),
        }
    }
}

/// Outcome of the most recent recorded test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRecord {
    pub passed: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// One sandboxed edit session backed by an overlay filesystem.
///
/// `merged_dir` is the unique key: no two active mounts share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMount {
    pub merged_dir: PathBuf,
    pub lower_dir: PathBuf,
    pub upper_dir: PathBuf,
    pub work_dir: PathBuf,
    pub mounted_since: DateTime<Utc>,
    /// Process that created the mount. Only used for liveness checks.
    pub owner_pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementState {
    pub version: String,
    #[serde(default)]
    pub overlay_active: bool,
    pub test_result: TestRunRecord,
    /// Consecutive RED or violating cycles since the last commit.
    pub revert_streak: u32,
    /// Tests that failed in the most recent run, in report order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub failing_tests: Vec<String>,
    pub last_commit_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active_mounts: Vec<OverlayMount>,
}

impl Default for EnforcementState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            overlay_active: false,
            test_result: TestRunRecord::default(),
            revert_streak: 0,
            failing_tests: Vec::new(),
            last_commit_time: None,
            active_mounts: Vec::new(),
        }
    }
}

impl EnforcementState {
    /// RED iff the most recent run left failing tests behind.
    pub fn is_red(&self) -> bool {
        !self.failing_tests.is_empty()
    }

    pub fn phase(&self) -> Phase {
        if self.is_red() { Phase::Red } else { Phase::Green }
    }

    pub fn find_mount(&self, merged_dir: &std::path::Path) -> Option<&OverlayMount> {
        self.active_mounts
            .iter()
            .find(|mount| mount.merged_dir == merged_dir)
    }
}

/// Current UTC time truncated to whole seconds.
///
/// Every timestamp written to state goes through here so that a save/load
/// round trip reproduces the value exactly.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
