//! Enforcement state storage (`.opencode/tcr/state.json`).
//!
//! Load pipeline: read, parse JSON, dispatch on `version` (upgrading older
//! layouts in memory), validate against the embedded JSON Schema, then decode
//! into [`EnforcementState`]. Saves always write the current version.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, SubsecRound, Utc};
use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::TcrError;
use crate::state::{EnforcementState, OverlayMount, STATE_VERSION, TestRunRecord};

pub const STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/state/v3.schema.json"
));

/// Failing-test identifier for upgraded states that recorded a failed run
/// without naming the tests.
pub const UNRECORDED_FAILURE_ID: &str = "<unrecorded failure>";

const LEGACY_VERSION: &str = "2.0";

/// Load state from disk. A missing file yields the default state.
pub fn load_state(path: &Path) -> Result<EnforcementState, TcrError> {
    debug!(path = %path.display(), "loading state");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "state missing, starting fresh");
            return Ok(EnforcementState::default());
        }
        Err(source) => {
            return Err(TcrError::StateRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let state = parse_state(&contents).map_err(|reason| TcrError::StateCorrupt {
        path: path.to_path_buf(),
        reason,
    })?;
    debug!(
        phase = %state.phase(),
        revert_streak = state.revert_streak,
        mounts = state.active_mounts.len(),
        "state loaded"
    );
    Ok(state)
}

/// Atomically write state to disk (temp file + rename).
pub fn save_state(path: &Path, state: &EnforcementState) -> Result<(), TcrError> {
    debug!(
        path = %path.display(),
        phase = %state.phase(),
        revert_streak = state.revert_streak,
        "writing state"
    );
    let write_err = |path: &Path, source: io::Error| TcrError::StateWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut buf = serde_json::to_string_pretty(state).map_err(|err| write_err(path, err.into()))?;
    buf.push('\n');

    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| write_err(parent, source))?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, buf).map_err(|source| write_err(tmp_path.as_path(), source))?;
    fs::rename(&tmp_path, path).map_err(|source| write_err(path, source))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parse a state document of any supported version.
///
/// Returns a human-readable reason on failure; the caller attaches the path.
pub fn parse_state(contents: &str) -> Result<EnforcementState, String> {
    let mut document: Value =
        serde_json::from_str(contents).map_err(|err| format!("invalid JSON: {err}"))?;
    let version = document
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing string field `version`".to_string())?
        .to_string();

    match version.as_str() {
        STATE_VERSION => {}
        LEGACY_VERSION => {
            let upgraded = upgrade_legacy(document)?;
            info!(from = LEGACY_VERSION, to = STATE_VERSION, "upgraded state layout");
            document = serde_json::to_value(&upgraded)
                .map_err(|err| format!("re-encode upgraded state: {err}"))?;
        }
        other => return Err(format!("unsupported state version `{other}`")),
    }

    validate_schema(&document)?;
    serde_json::from_value(document).map_err(|err| format!("decode state: {err}"))
}

fn validate_schema(document: &Value) -> Result<(), String> {
    let schema: Value =
        serde_json::from_str(STATE_SCHEMA).map_err(|err| format!("parse state schema: {err}"))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("compile state schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(document)
        .map(|err| format!("{err} at {}", err.instance_path()))
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(format!("schema validation failed: {}", messages.join("; ")))
    }
}

/// Version 2.0 layout: a single flat test flag and mounts without
/// upper/work directories.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyState {
    #[serde(default)]
    overlay_active: bool,
    #[serde(default)]
    overlay_upper_dir: String,
    #[serde(default)]
    overlay_work_dir: String,
    #[serde(default)]
    overlay_merged_dir: String,
    #[serde(default)]
    last_test_result: bool,
    #[serde(default)]
    last_test_time: Option<DateTime<Utc>>,
    #[serde(default)]
    active_mounts: Option<Vec<LegacyMount>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMount {
    merged_dir: PathBuf,
    lower_dir: PathBuf,
    mounted_since: DateTime<Utc>,
    pid: i64,
}

fn upgrade_legacy(document: Value) -> Result<EnforcementState, String> {
    let legacy: LegacyState =
        serde_json::from_value(document).map_err(|err| format!("decode 2.0 state: {err}"))?;

    let last_run_at = legacy.last_test_time.and_then(meaningful_time);
    let failing_tests = if !legacy.last_test_result && last_run_at.is_some() {
        vec![UNRECORDED_FAILURE_ID.to_string()]
    } else {
        Vec::new()
    };

    let mut active_mounts = Vec::new();
    for mount in legacy.active_mounts.unwrap_or_default() {
        let owner_pid = u32::try_from(mount.pid)
            .map_err(|_| format!("mount {} has invalid pid {}", mount.merged_dir.display(), mount.pid))?;
        let (upper_dir, work_dir) = if !legacy.overlay_merged_dir.is_empty()
            && mount.merged_dir == Path::new(&legacy.overlay_merged_dir)
        {
            (
                PathBuf::from(&legacy.overlay_upper_dir),
                PathBuf::from(&legacy.overlay_work_dir),
            )
        } else {
            sibling_dirs(&mount.merged_dir)
        };
        active_mounts.push(OverlayMount {
            merged_dir: mount.merged_dir,
            lower_dir: mount.lower_dir,
            upper_dir,
            work_dir,
            mounted_since: mount.mounted_since.trunc_subsecs(0),
            owner_pid,
        });
    }

    Ok(EnforcementState {
        version: STATE_VERSION.to_string(),
        overlay_active: legacy.overlay_active && !active_mounts.is_empty(),
        test_result: TestRunRecord {
            passed: legacy.last_test_result,
            last_run_at,
        },
        revert_streak: 0,
        failing_tests,
        last_commit_time: None,
        active_mounts,
    })
}

/// The zero time value written by older tooling means "never".
fn meaningful_time(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (time.year() > 1).then(|| time.trunc_subsecs(0))
}

fn sibling_dirs(merged_dir: &Path) -> (PathBuf, PathBuf) {
    match merged_dir.parent() {
        Some(session) => (session.join("upper"), session.join("work")),
        None => (PathBuf::new(), PathBuf::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::now_utc;
    use crate::test_support::{mount_request, red_state};

    #[test]
    fn missing_file_yields_default_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = load_state(&temp.path().join("state.json")).expect("load");
        assert_eq!(state, EnforcementState::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("state.json");

        let mut state = red_state(&["TestA", "TestB"]);
        state.revert_streak = 4;
        state.last_commit_time = Some(now_utc());
        state
            .record_mount(mount_request("/tmp/s1/merged", 1001), now_utc())
            .expect("mount");

        save_state(&path, &state).expect("save");
        let loaded = load_state(&path).expect("load");
        assert_eq!(loaded, state);
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn saved_file_uses_camel_case_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        save_state(&path, &EnforcementState::default()).expect("save");
        let contents = fs::read_to_string(&path).expect("read");
        let expected = "{\n  \"version\": \"3.0\",\n  \"overlayActive\": false,\n  \"testResult\": {\n    \"passed\": false,\n    \"lastRunAt\": null\n  },\n  \"revertStreak\": 0,\n  \"failingTests\": [],\n  \"lastCommitTime\": null,\n  \"activeMounts\": []\n}\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn malformed_json_is_corrupt_not_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load_state(&path).expect_err("corrupt");
        assert!(matches!(err, TcrError::StateCorrupt { .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = parse_state(r#"{"version": "9.9"}"#).expect_err("unknown version");
        assert!(err.contains("9.9"));
        let err = parse_state(r#"{"revertStreak": 0}"#).expect_err("no version");
        assert!(err.contains("version"));
    }

    #[test]
    fn schema_rejects_negative_streak() {
        let raw = r#"{
            "version": "3.0",
            "testResult": {"passed": true},
            "revertStreak": -1
        }"#;
        let err = parse_state(raw).expect_err("negative streak");
        assert!(err.contains("schema validation failed"));
    }

    #[test]
    fn unknown_fields_and_null_collections_are_tolerated() {
        let raw = r#"{
            "version": "3.0",
            "testResult": {"passed": true, "lastRunAt": null},
            "revertStreak": 2,
            "failingTests": null,
            "activeMounts": null,
            "lastCommitTime": null,
            "dashboardHint": "ignored"
        }"#;
        let state = parse_state(raw).expect("parse");
        assert_eq!(state.revert_streak, 2);
        assert!(state.active_mounts.is_empty());
        assert!(state.failing_tests.is_empty());
    }

    #[test]
    fn legacy_state_is_upgraded() {
        let raw = r#"{
            "version": "2.0",
            "overlayActive": true,
            "overlayMountPath": "/work/project",
            "overlayUpperDir": "/tmp/ow/a/upper",
            "overlayWorkDir": "/tmp/ow/a/work",
            "overlayMergedDir": "/tmp/ow/a/merged",
            "overlayMountedAt": "2025-01-02T03:04:05.123456Z",
            "lastTestResult": false,
            "lastTestTime": "2025-01-02T03:05:00.5Z",
            "activeMounts": [
                {"mergedDir": "/tmp/ow/a/merged", "lowerDir": "/work/project",
                 "mountedSince": "2025-01-02T03:04:05.123456Z", "pid": 1001},
                {"mergedDir": "/tmp/ow/b/merged", "lowerDir": "/work/project",
                 "mountedSince": "2025-01-02T03:04:06Z", "pid": 1002}
            ]
        }"#;
        let state = parse_state(raw).expect("upgrade");
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.is_red());
        assert_eq!(state.failing_tests, vec![UNRECORDED_FAILURE_ID.to_string()]);
        assert_eq!(state.active_mounts.len(), 2);
        assert_eq!(state.active_mounts[0].upper_dir, PathBuf::from("/tmp/ow/a/upper"));
        assert_eq!(state.active_mounts[1].work_dir, PathBuf::from("/tmp/ow/b/work"));
        assert_eq!(state.active_mounts[1].owner_pid, 1002);
        assert_eq!(state.active_mounts[0].mounted_since.timestamp_subsec_nanos(), 0);
        assert!(state.overlay_active);
    }

    #[test]
    fn legacy_zero_time_means_never_run() {
        let raw = r#"{
            "version": "2.0",
            "lastTestResult": false,
            "lastTestTime": "0001-01-01T00:00:00Z",
            "activeMounts": null
        }"#;
        let state = parse_state(raw).expect("upgrade");
        assert!(!state.is_red());
        assert_eq!(state.test_result.last_run_at, None);
        assert!(state.active_mounts.is_empty());
    }
}
