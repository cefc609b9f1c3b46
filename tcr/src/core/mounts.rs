//! Overlay mount records and stale-mount reclamation.
//!
//! Mounts are keyed by merged directory. A mount is stale when its owning
//! process is gone; there is no time-based expiry because edit sessions have
//! no fixed length.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::TcrError;
use crate::state::{EnforcementState, OverlayMount};

/// Directories of a session about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub lower_dir: PathBuf,
    pub upper_dir: PathBuf,
    pub work_dir: PathBuf,
    pub merged_dir: PathBuf,
    pub owner_pid: u32,
}

impl EnforcementState {
    /// Add a mount record; the merged directory must not already be tracked.
    pub fn record_mount(
        &mut self,
        request: MountRequest,
        now: DateTime<Utc>,
    ) -> Result<&OverlayMount, TcrError> {
        if self.find_mount(&request.merged_dir).is_some() {
            return Err(TcrError::DuplicateMount {
                merged_dir: request.merged_dir,
            });
        }
        debug!(
            merged_dir = %request.merged_dir.display(),
            owner_pid = request.owner_pid,
            "recording overlay mount"
        );
        self.active_mounts.push(OverlayMount {
            merged_dir: request.merged_dir,
            lower_dir: request.lower_dir,
            upper_dir: request.upper_dir,
            work_dir: request.work_dir,
            mounted_since: now,
            owner_pid: request.owner_pid,
        });
        self.overlay_active = true;
        Ok(&self.active_mounts[self.active_mounts.len() - 1])
    }

    /// Remove the mount keyed by `merged_dir`, returning it if it existed.
    ///
    /// Unknown keys are a no-op so concurrent cleanups need no coordination.
    pub fn record_unmount(&mut self, merged_dir: &Path) -> Option<OverlayMount> {
        let index = self
            .active_mounts
            .iter()
            .position(|mount| mount.merged_dir == merged_dir)?;
        let removed = self.active_mounts.remove(index);
        self.overlay_active = !self.active_mounts.is_empty();
        debug!(merged_dir = %merged_dir.display(), "recorded overlay unmount");
        Some(removed)
    }

    /// Mounts whose owner fails the liveness check. Does not mutate state.
    pub fn find_stale<F>(&self, mut is_alive: F) -> Vec<OverlayMount>
    where
        F: FnMut(u32) -> bool,
    {
        self.active_mounts
            .iter()
            .filter(|mount| !is_alive(mount.owner_pid))
            .cloned()
            .collect()
    }

    /// Drop every stale mount in one pass and return how many were removed.
    pub fn reclaim_stale<F>(&mut self, mut is_alive: F) -> usize
    where
        F: FnMut(u32) -> bool,
    {
        let before = self.active_mounts.len();
        self.active_mounts.retain(|mount| is_alive(mount.owner_pid));
        let removed = before - self.active_mounts.len();
        if self.active_mounts.is_empty() {
            self.overlay_active = false;
        }
        if removed > 0 {
            info!(
                removed,
                remaining = self.active_mounts.len(),
                "reclaimed stale overlay mounts"
            );
        }
        removed
    }
}
