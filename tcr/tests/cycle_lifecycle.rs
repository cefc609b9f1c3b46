//! Multi-cycle TCR scenarios against a real git repository.
//!
//! Each test drives `run_cycle` several times with scripted test runs and
//! checks the working tree, the commit history, and the persisted state after
//! every step.

#![cfg(unix)]

use std::process::Command;

use tcr::core::types::{Action, Decision};
use tcr::cycle::{CycleOptions, record_cycle, run_cycle};
use tcr::gate::check_path;
use tcr::io::git::Git;
use tcr::io::init::{InitOptions, init_project};
use tcr::test_support::{
    ScriptedTestRunner, TestProject, go_json_output, go_json_run, raw_run, red_state,
};

fn options() -> CycleOptions {
    CycleOptions {
        is_alive: |_| true,
        ..CycleOptions::default()
    }
}

fn commit_count(project: &TestProject) -> usize {
    let out = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(project.path())
        .output()
        .expect("git rev-list");
    String::from_utf8_lossy(&out.stdout)
        .trim()
        .parse()
        .expect("commit count")
}

/// RED → fix → GREEN → blocked implementation change.
///
/// 1. A new failing test is reverted and the state turns RED.
/// 2. While RED, the implementation may change; the passing run commits.
/// 3. Back in GREEN, an implementation-only change is blocked before any
///    test runs and is discarded.
#[test]
fn red_green_blocked_sequence() {
    let project = TestProject::new().expect("project");
    let paths = init_project(project.path(), &InitOptions { force: false }).expect("init");
    let git = Git::new(project.path());
    let runner = ScriptedTestRunner::new(vec![
        go_json_run("TestAdd", false),
        go_json_run("TestAdd", true),
    ]);

    // Cycle 1: failing test is reverted.
    project
        .write_file("add_test.go", "package demo\n")
        .expect("write test");
    let report = run_cycle(&paths, &runner, &git, &options()).expect("cycle 1");
    assert_eq!(report.action, Action::Reverted);
    assert_eq!(report.streak, 1);
    assert!(!project.path().join("add_test.go").exists());
    let state = project.state().expect("state");
    assert_eq!(state.failing_tests, vec!["TestAdd".to_string()]);

    // RED allows implementation changes.
    let verdict = check_path(&paths, std::path::Path::new("add.go")).expect("gate");
    assert_eq!(verdict.decision, Decision::Allowed);

    // Cycle 2: passing run commits both files.
    project
        .write_file("add_test.go", "package demo\n")
        .expect("write test");
    project
        .write_file("add.go", "package demo\n")
        .expect("write impl");
    let before = commit_count(&project);
    let report = run_cycle(&paths, &runner, &git, &options()).expect("cycle 2");
    assert_eq!(report.action, Action::Committed);
    assert_eq!(report.streak, 0);
    assert_eq!(commit_count(&project), before + 1);
    assert!(project.path().join("add.go").exists());
    let state = project.state().expect("state");
    assert!(state.failing_tests.is_empty());
    assert!(state.last_commit_time.is_some());

    // Cycle 3: GREEN blocks an implementation-only change.
    project
        .write_file("add.go", "package demo\n\nfunc Add() {}\n")
        .expect("edit impl");
    let report = run_cycle(&paths, &runner, &git, &options()).expect("cycle 3");
    assert_eq!(report.action, Action::Blocked);
    assert!(report.reason.contains("add.go"));
    assert_eq!(runner.remaining(), 0);
    assert_eq!(runner.requests().len(), 2);
    assert_eq!(
        project.read_file("add.go").expect("read"),
        "package demo\n"
    );
    assert_eq!(project.state().expect("state").revert_streak, 1);
}

/// Batched runs never commit, and the streak keeps counting across
/// consecutive violations until a clean single-test pass.
#[test]
fn violations_accumulate_streak_until_clean_pass() {
    let project = TestProject::new().expect("project");
    let paths = init_project(project.path(), &InitOptions { force: false }).expect("init");
    let git = Git::new(project.path());
    let batch = format!(
        "{}{}",
        go_json_output("TestA", true),
        go_json_output("TestB", true)
    );
    let runner = ScriptedTestRunner::new(vec![
        raw_run(&batch, 0),
        raw_run("", 0),
        go_json_run("TestA", true),
    ]);

    for expected_streak in 1..=2 {
        project
            .write_file("a_test.go", "package demo\n")
            .expect("write");
        let report = run_cycle(&paths, &runner, &git, &options()).expect("cycle");
        assert_eq!(report.action, Action::Blocked);
        assert_eq!(report.streak, expected_streak);
        assert!(!project.path().join("a_test.go").exists());
    }

    project
        .write_file("a_test.go", "package demo\n")
        .expect("write");
    let report = run_cycle(&paths, &runner, &git, &options()).expect("cycle");
    assert_eq!(report.action, Action::Committed);
    assert_eq!(report.streak, 0);
}

/// Moving a protected file away is a change to that file, even in RED.
#[test]
fn renaming_a_protected_file_is_blocked_and_restored() {
    let project = TestProject::new().expect("project");
    project
        .write_file("opencode.json", "{}\n")
        .expect("write protected");
    project.git(&["add", "opencode.json"]).expect("git add");
    project
        .git(&["commit", "--quiet", "-m", "add opencode.json"])
        .expect("git commit");
    let paths = init_project(project.path(), &InitOptions { force: false }).expect("init");
    project.save_state(&red_state(&["TestAdd"])).expect("red state");
    let git = Git::new(project.path());
    let before = commit_count(&project);

    project
        .git(&["mv", "opencode.json", "renamed.json"])
        .expect("git mv");
    let report = record_cycle(&paths, go_json_run("TestAdd", true), &git, &options())
        .expect("record");

    assert_eq!(report.action, Action::Blocked);
    assert!(report.reason.contains("opencode.json"));
    assert_eq!(commit_count(&project), before);
    assert_eq!(project.read_file("opencode.json").expect("restored"), "{}\n");
    assert!(!project.path().join("renamed.json").exists());
    let state = project.state().expect("state");
    assert_eq!(state.failing_tests, vec!["TestAdd".to_string()]);
    assert_eq!(state.revert_streak, 1);
}
