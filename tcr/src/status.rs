//! Orchestration for `tcr status`: a read-only summary of enforcement state.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::io::init::TcrPaths;
use crate::io::state_store::load_state;
use crate::state::{EnforcementState, Phase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountStatus {
    pub merged_dir: PathBuf,
    pub owner_pid: u32,
    pub mounted_since: DateTime<Utc>,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub phase: Phase,
    pub failing_tests: Vec<String>,
    pub revert_streak: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_commit_time: Option<DateTime<Utc>>,
    pub overlay_active: bool,
    pub mounts: Vec<MountStatus>,
}

impl StatusReport {
    pub fn from_state<F>(state: &EnforcementState, mut is_alive: F) -> Self
    where
        F: FnMut(u32) -> bool,
    {
        Self {
            phase: state.phase(),
            failing_tests: state.failing_tests.clone(),
            revert_streak: state.revert_streak,
            last_run_at: state.test_result.last_run_at,
            last_commit_time: state.last_commit_time,
            overlay_active: state.overlay_active,
            mounts: state
                .active_mounts
                .iter()
                .map(|mount| MountStatus {
                    merged_dir: mount.merged_dir.clone(),
                    owner_pid: mount.owner_pid,
                    mounted_since: mount.mounted_since,
                    alive: is_alive(mount.owner_pid),
                })
                .collect(),
        }
    }

    pub fn stale_count(&self) -> usize {
        self.mounts.iter().filter(|mount| !mount.alive).count()
    }

    /// Human-readable multi-line summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "phase: {}", self.phase);
        if !self.failing_tests.is_empty() {
            let _ = writeln!(out, "failing: {}", self.failing_tests.join(", "));
        }
        let _ = writeln!(out, "revert streak: {}", self.revert_streak);
        let _ = writeln!(out, "last run: {}", format_time(self.last_run_at));
        let _ = writeln!(out, "last commit: {}", format_time(self.last_commit_time));
        let _ = writeln!(
            out,
            "overlay mounts: {} ({} stale)",
            self.mounts.len(),
            self.stale_count()
        );
        for mount in &self.mounts {
            let _ = writeln!(
                out,
                "  {} pid {}{}",
                mount.merged_dir.display(),
                mount.owner_pid,
                if mount.alive { "" } else { " [stale]" }
            );
        }
        out
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}

pub fn status<F>(paths: &TcrPaths, is_alive: F) -> Result<StatusReport>
where
    F: FnMut(u32) -> bool,
{
    let state = load_state(&paths.state_path)?;
    Ok(StatusReport::from_state(&state, is_alive))
}
