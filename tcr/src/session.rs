//! Overlay session bookkeeping: begin, end, and stale reclamation.
//!
//! Sessions live under `<overlayWorkDir>/<session-id>/` with `upper`, `work`
//! and `merged` subdirectories. Mounting the overlay itself is left to the
//! caller; these commands only prepare directories and track records.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::mounts::MountRequest;
use crate::io::config::load_config;
use crate::io::init::TcrPaths;
use crate::io::lock::ProjectLock;
use crate::io::state_store::{load_state, save_state};
use crate::state::{OverlayMount, now_utc};

/// Allocate session directories and record a new mount owned by `owner_pid`.
pub fn begin(paths: &TcrPaths, lower_dir: &Path, owner_pid: u32) -> Result<OverlayMount> {
    if !lower_dir.is_dir() {
        return Err(anyhow!(
            "lower directory {} is not a directory",
            lower_dir.display()
        ));
    }
    let _lock = ProjectLock::acquire(&paths.lock_path)?;
    let config = load_config(&paths.config_path)?;
    let mut state = load_state(&paths.state_path)?;

    let session_dir = allocate_session_dir(&config.overlay_work_dir, owner_pid)?;
    let request = MountRequest {
        lower_dir: lower_dir.to_path_buf(),
        upper_dir: session_dir.join("upper"),
        work_dir: session_dir.join("work"),
        merged_dir: session_dir.join("merged"),
        owner_pid,
    };
    for dir in [&request.upper_dir, &request.work_dir, &request.merged_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    let mount = match state.record_mount(request, now_utc()) {
        Ok(mount) => mount.clone(),
        Err(err) => {
            remove_dir_best_effort(&session_dir);
            return Err(err.into());
        }
    };
    save_state(&paths.state_path, &state)?;
    info!(
        merged_dir = %mount.merged_dir.display(),
        owner_pid,
        "overlay session started"
    );
    Ok(mount)
}

/// Remove the mount keyed by `merged_dir` and clean up its directories.
///
/// Returns `None` if no such mount is tracked.
pub fn end(paths: &TcrPaths, merged_dir: &Path) -> Result<Option<OverlayMount>> {
    let _lock = ProjectLock::acquire(&paths.lock_path)?;
    let mut state = load_state(&paths.state_path)?;
    let Some(mount) = state.record_unmount(merged_dir) else {
        debug!(merged_dir = %merged_dir.display(), "no tracked session to end");
        return Ok(None);
    };
    save_state(&paths.state_path, &state)?;
    remove_session_dirs(&mount);
    info!(merged_dir = %merged_dir.display(), "overlay session ended");
    Ok(Some(mount))
}

/// Mounts whose owner is gone, without modifying state.
pub fn stale<F>(paths: &TcrPaths, is_alive: F) -> Result<Vec<OverlayMount>>
where
    F: FnMut(u32) -> bool,
{
    let state = load_state(&paths.state_path)?;
    Ok(state.find_stale(is_alive))
}

/// Drop every stale mount, save, and clean up the reclaimed directories.
pub fn reclaim<F>(paths: &TcrPaths, mut is_alive: F) -> Result<Vec<OverlayMount>>
where
    F: FnMut(u32) -> bool,
{
    let _lock = ProjectLock::acquire(&paths.lock_path)?;
    let mut state = load_state(&paths.state_path)?;
    let stale = state.find_stale(&mut is_alive);
    if stale.is_empty() {
        return Ok(stale);
    }
    let stale_pids: Vec<u32> = stale.iter().map(|mount| mount.owner_pid).collect();
    state.reclaim_stale(|pid| !stale_pids.contains(&pid));
    save_state(&paths.state_path, &state)?;
    for mount in &stale {
        remove_session_dirs(mount);
    }
    Ok(stale)
}

/// Remove a session's upper and work directories plus the (unmounted, empty)
/// merged directory. Failures are logged, never returned.
///
/// Only directories laid out as siblings of `merged_dir` are touched, so a
/// record pointing elsewhere can never delete unrelated trees.
pub(crate) fn remove_session_dirs(mount: &OverlayMount) {
    let Some(session_dir) = mount.merged_dir.parent() else {
        return;
    };
    for dir in [&mount.upper_dir, &mount.work_dir] {
        if dir.parent() == Some(session_dir) {
            remove_dir_best_effort(dir);
        }
    }
    for dir in [mount.merged_dir.as_path(), session_dir] {
        match fs::remove_dir(dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                debug!(dir = %dir.display(), err = %err, "leaving session directory in place");
                return;
            }
        }
    }
}

fn allocate_session_dir(work_root: &Path, owner_pid: u32) -> Result<PathBuf> {
    fs::create_dir_all(work_root)
        .with_context(|| format!("create overlay work dir {}", work_root.display()))?;
    let stamp = now_utc().format("%Y%m%dT%H%M%SZ");
    for attempt in 0u32.. {
        let candidate = work_root.join(format!("{stamp}-{owner_pid}-{attempt}"));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create session dir {}", candidate.display()));
            }
        }
    }
    Err(anyhow!(
        "no free session directory under {}",
        work_root.display()
    ))
}

fn remove_dir_best_effort(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(dir = %dir.display(), err = %err, "failed to remove session directory"),
    }
}
