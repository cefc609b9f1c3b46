//! Orchestration for one enforcement cycle (`tcr cycle` / `tcr record`).
//!
//! Fixed order under the project lock: load config, load state, reclaim stale
//! mounts, gate the changed paths, run (or accept) the test run, detect and
//! classify the outcome, transition state, save, then commit or revert and
//! release the session mount.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::gate::{classify_outcome, decide};
use crate::core::state_update::apply_outcome;
use crate::core::test_output::detect;
use crate::core::types::{CycleOutcome, RawTestRun, Report};
use crate::io::config::{Config, load_config};
use crate::io::git::Vcs;
use crate::io::init::TcrPaths;
use crate::io::liveness::is_pid_alive;
use crate::io::lock::ProjectLock;
use crate::io::state_store::{load_state, save_state};
use crate::io::test_runner::{DEFAULT_OUTPUT_LIMIT_BYTES, TestRequest, TestRunner};
use crate::session::remove_session_dirs;
use crate::state::{EnforcementState, OverlayMount, now_utc};

/// Per-invocation options for a cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Session whose merged view is tested; released when the cycle ends.
    pub merged_dir: Option<PathBuf>,
    /// Overrides the configured test timeout.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
    /// Liveness check used for stale-mount reclamation.
    pub is_alive: fn(u32) -> bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            merged_dir: None,
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            is_alive: is_pid_alive,
        }
    }
}

/// Run the configured test command and enforce the result.
pub fn run_cycle<R: TestRunner, V: Vcs>(
    paths: &TcrPaths,
    runner: &R,
    vcs: &V,
    options: &CycleOptions,
) -> Result<Report> {
    enforce(paths, vcs, options, |config| {
        let workdir = options
            .merged_dir
            .clone()
            .unwrap_or_else(|| paths.root.clone());
        let request = TestRequest {
            workdir,
            command: config.test_command.clone(),
            timeout: options.timeout.unwrap_or_else(|| config.timeout()),
            output_limit_bytes: options.output_limit_bytes,
        };
        runner.run(&request).context("run test command")
    })
}

/// Enforce a test run that an external runner already performed.
pub fn record_cycle<V: Vcs>(
    paths: &TcrPaths,
    run: RawTestRun,
    vcs: &V,
    options: &CycleOptions,
) -> Result<Report> {
    enforce(paths, vcs, options, move |_| Ok(run))
}

fn enforce<V, F>(paths: &TcrPaths, vcs: &V, options: &CycleOptions, run_tests: F) -> Result<Report>
where
    V: Vcs,
    F: FnOnce(&Config) -> Result<RawTestRun>,
{
    let _lock = ProjectLock::acquire(&paths.lock_path)?;
    let config = load_config(&paths.config_path)?;
    let mut state = load_state(&paths.state_path)?;
    let reclaimed_before = state.active_mounts.clone();
    let reclaimed = state.reclaim_stale(options.is_alive);
    let reclaimed: Vec<OverlayMount> = if reclaimed > 0 {
        reclaimed_before
            .into_iter()
            .filter(|mount| !state.active_mounts.contains(mount))
            .collect()
    } else {
        Vec::new()
    };

    let (outcome, raw) = match gate_changes(&config, &state, vcs)? {
        Some(reason) => (CycleOutcome::Violation { reason }, None),
        None => {
            let raw = run_tests(&config)?;
            let outcome = classify_outcome(detect(&raw));
            (outcome, Some(raw))
        }
    };
    let action = outcome.action();
    info!(action = ?action, reason = %outcome.reason(), "cycle outcome");

    let mut next = apply_outcome(&state, &outcome, now_utc());
    let released = options
        .merged_dir
        .as_deref()
        .and_then(|merged_dir| next.record_unmount(merged_dir));
    save_state(&paths.state_path, &next)?;

    let duration = raw.as_ref().map(|raw| raw.duration).unwrap_or_default();
    let mut reason = outcome.reason();
    match &outcome {
        CycleOutcome::Passed { test } => {
            let message = config.render_commit_message(test, next.revert_streak, duration)?;
            if !vcs.commit_all(&message).context("commit passing change")? {
                reason.push_str(" (nothing to commit)");
            }
        }
        CycleOutcome::Failed { .. } | CycleOutcome::Violation { .. } => {
            vcs.discard_changes().context("revert changes")?;
        }
    }

    for mount in reclaimed.iter().chain(released.iter()) {
        remove_session_dirs(mount);
    }
    debug!(streak = next.revert_streak, phase = %next.phase(), "cycle finished");

    Ok(Report {
        action,
        reason,
        streak: next.revert_streak,
        output: raw.map(|raw| raw.output).unwrap_or_default(),
    })
}

/// Gate every changed path; returns the first blocking reason.
fn gate_changes<V: Vcs>(
    config: &Config,
    state: &EnforcementState,
    vcs: &V,
) -> Result<Option<String>> {
    let policy = config.path_policy()?;
    let changed = vcs.changed_paths().context("list changed paths")?;
    for path in &changed {
        let verdict = decide(state, &policy, path);
        if !verdict.is_allowed() {
            warn!(path = %path, reason = %verdict.reason, "changed path blocked");
            return Ok(Some(verdict.reason));
        }
    }
    debug!(changed = changed.len(), "changed paths allowed");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Action;
    use crate::io::init::{InitOptions, init_project};
    use crate::test_support::{
        RecordingVcs, ScriptedTestRunner, go_json_run, mount_request, raw_run,
    };

    fn project() -> (tempfile::TempDir, TcrPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        (temp, paths)
    }

    fn options() -> CycleOptions {
        CycleOptions {
            is_alive: |_| true,
            ..CycleOptions::default()
        }
    }

    #[test]
    fn passing_single_test_commits_and_resets_streak() {
        let (_temp, paths) = project();
        let mut state = EnforcementState::default();
        state.revert_streak = 2;
        save_state(&paths.state_path, &state).expect("save");

        let runner = ScriptedTestRunner::new(vec![go_json_run("TestAdd", true)]);
        let vcs = RecordingVcs::new();
        vcs.set_changed(&["add_test.go"]);

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Committed);
        assert_eq!(report.streak, 0);
        assert_eq!(vcs.commits(), vec!["WIP".to_string()]);
        assert_eq!(vcs.discards(), 0);

        let state = load_state(&paths.state_path).expect("state");
        assert!(state.test_result.passed);
        assert!(state.last_commit_time.is_some());
    }

    #[test]
    fn failing_test_reverts_and_turns_red() {
        let (_temp, paths) = project();
        let runner = ScriptedTestRunner::new(vec![go_json_run("TestAdd", false)]);
        let vcs = RecordingVcs::new();
        vcs.set_changed(&["add_test.go"]);

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Reverted);
        assert_eq!(report.streak, 1);
        assert!(report.reason.contains("TestAdd"));
        assert_eq!(vcs.discards(), 1);

        let state = load_state(&paths.state_path).expect("state");
        assert_eq!(state.failing_tests, vec!["TestAdd".to_string()]);
    }

    #[test]
    fn multiple_tests_are_blocked_and_discarded() {
        let (_temp, paths) = project();
        let output = format!(
            "{}{}",
            crate::test_support::go_json_output("TestA", true),
            crate::test_support::go_json_output("TestB", true)
        );
        let runner = ScriptedTestRunner::new(vec![raw_run(&output, 0)]);
        let vcs = RecordingVcs::new();

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Blocked);
        assert!(report.reason.contains("ran 2 tests"));
        assert_eq!(report.streak, 1);
        assert_eq!(vcs.discards(), 1);
        assert!(vcs.commits().is_empty());
    }

    #[test]
    fn unparsable_output_is_blocked_not_passed() {
        let (_temp, paths) = project();
        let runner = ScriptedTestRunner::new(vec![raw_run("segmentation fault\n", 0)]);
        let vcs = RecordingVcs::new();

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Blocked);
        assert!(report.reason.contains("unrecognized test output"));
    }

    #[test]
    fn timeout_counts_as_failed_run() {
        let (_temp, paths) = project();
        let timed_out = RawTestRun {
            output: String::new(),
            exit_code: None,
            timed_out: true,
            duration: Duration::from_secs(30),
        };
        let runner = ScriptedTestRunner::new(vec![timed_out]);
        let vcs = RecordingVcs::new();

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Reverted);
        let state = load_state(&paths.state_path).expect("state");
        assert_eq!(state.failing_tests, vec!["<timed out>".to_string()]);
        assert_eq!(state.revert_streak, 1);
    }

    #[test]
    fn green_implementation_change_is_blocked_before_tests_run() {
        let (_temp, paths) = project();
        let runner = ScriptedTestRunner::new(vec![go_json_run("TestAdd", true)]);
        let vcs = RecordingVcs::new();
        vcs.set_changed(&["add.go"]);

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Blocked);
        assert!(report.reason.contains("add.go"));
        assert_eq!(runner.remaining(), 1);
        assert!(runner.requests().is_empty());
        assert_eq!(vcs.discards(), 1);
    }

    #[test]
    fn protected_change_is_blocked_even_when_red() {
        let (_temp, paths) = project();
        save_state(&paths.state_path, &crate::test_support::red_state(&["TestAdd"]))
            .expect("save");
        let runner = ScriptedTestRunner::new(vec![go_json_run("TestAdd", true)]);
        let vcs = RecordingVcs::new();
        vcs.set_changed(&["add.go", "opencode.json"]);

        let report = run_cycle(&paths, &runner, &vcs, &options()).expect("cycle");
        assert_eq!(report.action, Action::Blocked);
        assert!(report.reason.contains("opencode.json"));
        let state = load_state(&paths.state_path).expect("state");
        assert_eq!(state.failing_tests, vec!["TestAdd".to_string()]);
    }

    #[test]
    fn cycle_reclaims_stale_mounts_and_releases_session() {
        let (temp, paths) = project();
        let mut state = EnforcementState::default();
        let overlay = temp.path().join("overlay");
        let session = overlay.join("s1");
        let merged = session.join("merged");
        let dead_merged = overlay.join("s0").join("merged");
        let dead = mount_request(dead_merged.to_str().expect("utf8"), 1001);
        state.record_mount(dead, now_utc()).expect("dead mount");
        let mut live = mount_request(merged.to_str().expect("utf8"), 1002);
        live.upper_dir = session.join("upper");
        live.work_dir = session.join("work");
        state.record_mount(live, now_utc()).expect("live mount");
        save_state(&paths.state_path, &state).expect("save");

        let runner = ScriptedTestRunner::new(vec![go_json_run("TestAdd", true)]);
        let vcs = RecordingVcs::new();
        let options = CycleOptions {
            merged_dir: Some(merged.clone()),
            is_alive: |pid| pid == 1002,
            ..CycleOptions::default()
        };

        run_cycle(&paths, &runner, &vcs, &options).expect("cycle");
        assert_eq!(runner.requests()[0].workdir, merged);
        let state = load_state(&paths.state_path).expect("state");
        assert!(state.active_mounts.is_empty());
        assert!(!state.overlay_active);
    }

    #[test]
    fn record_cycle_uses_supplied_run() {
        let (_temp, paths) = project();
        let vcs = RecordingVcs::new();
        vcs.set_changed(&["add_test.go"]);
        let report =
            record_cycle(&paths, go_json_run("TestAdd", true), &vcs, &options()).expect("record");
        assert_eq!(report.action, Action::Committed);
        assert!(report.output.contains("TestAdd"));
    }

    #[test]
    fn commit_message_uses_template() {
        let (_temp, paths) = project();
        let config = Config {
            auto_commit_msg: "tcr: {{ test }}".to_string(),
            ..Config::default()
        };
        crate::io::config::write_config(&paths.config_path, &config).expect("config");
        let vcs = RecordingVcs::new();
        vcs.set_changed(&["add_test.go"]);
        record_cycle(&paths, go_json_run("TestAdd", true), &vcs, &options()).expect("record");
        assert_eq!(vcs.commits(), vec!["tcr: TestAdd".to_string()]);
    }

    #[test]
    fn held_lock_aborts_without_touching_state() {
        let (_temp, paths) = project();
        let _held = ProjectLock::acquire(&paths.lock_path).expect("hold");
        let vcs = RecordingVcs::new();
        let err = record_cycle(&paths, go_json_run("TestAdd", true), &vcs, &options())
            .expect_err("locked");
        assert!(matches!(
            err.downcast_ref::<crate::error::TcrError>(),
            Some(crate::error::TcrError::LockHeld { .. })
        ));
        assert_eq!(
            load_state(&paths.state_path).expect("state"),
            EnforcementState::default()
        );
    }
}
