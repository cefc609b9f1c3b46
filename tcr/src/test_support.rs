//! Test-only builders and fakes for enforcement state, test runs, and VCS.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::mounts::MountRequest;
use crate::core::types::{RawTestRun, TestResult};
use crate::io::config::{Config, write_config};
use crate::io::git::Vcs;
use crate::io::init::TcrPaths;
use crate::io::state_store::{load_state, save_state};
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::state::{EnforcementState, TestRunRecord};

/// Fresh GREEN state whose last run passed.
pub fn green_state() -> EnforcementState {
    EnforcementState {
        test_result: TestRunRecord {
            passed: true,
            last_run_at: None,
        },
        ..EnforcementState::default()
    }
}

/// RED state with the given failing tests.
pub fn red_state(failing: &[&str]) -> EnforcementState {
    EnforcementState {
        failing_tests: failing.iter().map(|name| name.to_string()).collect(),
        ..EnforcementState::default()
    }
}

/// Parsed result with explicit executed and failed tests.
pub fn test_result(executed: &[&str], failed: &[&str]) -> TestResult {
    TestResult {
        output: String::new(),
        passed: failed.is_empty(),
        duration: Duration::ZERO,
        executed_tests: executed.iter().map(|name| name.to_string()).collect(),
        failed_tests: failed.iter().map(|name| name.to_string()).collect(),
        timed_out: false,
    }
}

/// Mount request whose upper/work dirs sit next to `merged_dir`.
pub fn mount_request(merged_dir: &str, owner_pid: u32) -> MountRequest {
    let merged_dir = PathBuf::from(merged_dir);
    let session = merged_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    MountRequest {
        lower_dir: PathBuf::from("/work/project"),
        upper_dir: session.join("upper"),
        work_dir: session.join("work"),
        merged_dir,
        owner_pid,
    }
}

/// `go test -json` output for one test with the given outcome.
pub fn go_json_output(test: &str, passed: bool) -> String {
    let action = if passed { "pass" } else { "fail" };
    format!(
        concat!(
            "{{\"Action\":\"run\",\"Package\":\"example.com/demo\",\"Test\":\"{test}\"}}\n",
            "{{\"Action\":\"output\",\"Package\":\"example.com/demo\",\"Test\":\"{test}\",\"Output\":\"=== RUN   {test}\\n\"}}\n",
            "{{\"Action\":\"{action}\",\"Package\":\"example.com/demo\",\"Test\":\"{test}\",\"Elapsed\":0.01}}\n",
            "{{\"Action\":\"{action}\",\"Package\":\"example.com/demo\",\"Elapsed\":0.02}}\n",
        ),
        test = test,
        action = action,
    )
}

/// Raw run for a single go test, with the matching exit code.
pub fn go_json_run(test: &str, passed: bool) -> RawTestRun {
    RawTestRun {
        output: go_json_output(test, passed),
        exit_code: Some(if passed { 0 } else { 1 }),
        timed_out: false,
        duration: Duration::from_millis(50),
    }
}

/// Raw run that produced `output` and exited with `exit_code`.
pub fn raw_run(output: &str, exit_code: i32) -> RawTestRun {
    RawTestRun {
        output: output.to_string(),
        exit_code: Some(exit_code),
        timed_out: false,
        duration: Duration::from_millis(50),
    }
}

/// Test runner that replays a queue of raw runs and records each request.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    runs: RefCell<VecDeque<RawTestRun>>,
    requests: RefCell<Vec<TestRequest>>,
}

impl ScriptedTestRunner {
    pub fn new(runs: Vec<RawTestRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TestRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.runs.borrow().len()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<RawTestRun> {
        self.requests.borrow_mut().push(request.clone());
        self.runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted test runner exhausted"))
    }
}

/// VCS fake that reports scripted changed paths and records operations.
#[derive(Debug, Default)]
pub struct RecordingVcs {
    changed: RefCell<Vec<String>>,
    commits: RefCell<Vec<String>>,
    discards: RefCell<usize>,
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the paths reported as changed.
    pub fn set_changed(&self, paths: &[&str]) {
        *self.changed.borrow_mut() = paths.iter().map(|path| path.to_string()).collect();
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    pub fn discards(&self) -> usize {
        *self.discards.borrow()
    }
}

impl Vcs for RecordingVcs {
    fn changed_paths(&self) -> Result<Vec<String>> {
        Ok(self.changed.borrow().clone())
    }

    fn commit_all(&self, message: &str) -> Result<bool> {
        let had_changes = !self.changed.borrow().is_empty();
        if had_changes {
            self.commits.borrow_mut().push(message.to_string());
            self.changed.borrow_mut().clear();
        }
        Ok(had_changes)
    }

    fn discard_changes(&self) -> Result<()> {
        *self.discards.borrow_mut() += 1;
        self.changed.borrow_mut().clear();
        Ok(())
    }
}

/// Temporary git repository with one initial commit.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let project = Self { dir };
        project.git(&["init", "--quiet"])?;
        project.git(&["config", "user.email", "tcr@example.com"])?;
        project.git(&["config", "user.name", "TCR Test"])?;
        project.git(&["config", "commit.gpgsign", "false"])?;
        project.write_file("README.md", "demo\n")?;
        project.git(&["add", "-A"])?;
        project.git(&["commit", "--quiet", "-m", "initial"])?;
        Ok(project)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> TcrPaths {
        TcrPaths::new(self.path())
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read_file(&self, relative: &str) -> Result<String> {
        let path = self.path().join(relative);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn write_config(&self, config: &Config) -> Result<()> {
        write_config(&self.paths().config_path, config)
    }

    pub fn save_state(&self, state: &EnforcementState) -> Result<()> {
        save_state(&self.paths().state_path, state)?;
        Ok(())
    }

    pub fn state(&self) -> Result<EnforcementState> {
        Ok(load_state(&self.paths().state_path)?)
    }

    /// Run git in the project, failing on a nonzero exit.
    pub fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}
