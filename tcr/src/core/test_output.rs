//! Test-runner output parsing.
//!
//! Recognized formats: `go test -json` event streams and the libtest
//! (`cargo test`) human-readable report. Output is scanned in order and every
//! list keeps first-appearance order, so identical input always yields an
//! identical result.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::core::types::{RawTestRun, TestResult};
use crate::error::TcrError;

/// Failing identifier recorded when a timed-out run names no failed test.
pub const TIMED_OUT_ID: &str = "<timed out>";

static LIBTEST_CASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test (\S+) \.\.\. (ok|FAILED|ignored)").expect("libtest case regex")
});
static LIBTEST_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test result: (?:ok|FAILED)\..*finished in ([0-9]+(?:\.[0-9]+)?)s")
        .expect("libtest summary regex")
});
static LIBTEST_RUNNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^running \d+ tests?$").expect("libtest header regex"));

/// One line of `go test -json` output.
#[derive(Debug, Deserialize)]
struct GoTestEvent {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Package", default)]
    package: Option<String>,
    #[serde(rename = "Test", default)]
    test: Option<String>,
    #[serde(rename = "Elapsed", default)]
    elapsed: Option<f64>,
}

/// Parse raw runner output into a structured result.
///
/// `passed` reflects only failures visible in the output; [`detect`] also
/// folds in the exit code and timeout.
pub fn parse(raw: &str) -> Result<TestResult, TcrError> {
    let report = parse_go_json(raw)
        .or_else(|| parse_libtest(raw))
        .ok_or_else(|| TcrError::UnparsableOutput {
            reason: describe_unrecognized(raw),
        })?;
    Ok(TestResult {
        output: raw.to_string(),
        passed: report.failed.is_empty(),
        duration: report.duration.unwrap_or_default(),
        executed_tests: report.executed,
        failed_tests: report.failed,
        timed_out: false,
    })
}

/// Convert a raw run (output plus exit status) into a `TestResult`.
///
/// A timed-out run is always a failed run, even when its partial output is
/// unrecognizable. A nonzero exit code without an attributable failure is
/// recorded under a synthetic identifier so the run can never read as passing.
pub fn detect(run: &RawTestRun) -> Result<TestResult, TcrError> {
    let mut result = match parse(&run.output) {
        Ok(result) => result,
        Err(_) if run.timed_out => TestResult {
            output: run.output.clone(),
            passed: false,
            duration: run.duration,
            executed_tests: Vec::new(),
            failed_tests: Vec::new(),
            timed_out: true,
        },
        Err(err) => return Err(err),
    };

    if result.duration.is_zero() {
        result.duration = run.duration;
    }
    if run.timed_out {
        result.timed_out = true;
        if result.failed_tests.is_empty() {
            result.failed_tests.push(TIMED_OUT_ID.to_string());
        }
    } else if result.failed_tests.is_empty() {
        match run.exit_code {
            Some(0) => {}
            Some(code) => result.failed_tests.push(format!("<exit status {code}>")),
            None => result
                .failed_tests
                .push("<terminated by signal>".to_string()),
        }
    }
    result.passed = result.failed_tests.is_empty();
    Ok(result)
}

#[derive(Debug, Default)]
struct ParsedReport {
    executed: Vec<String>,
    failed: Vec<String>,
    duration: Option<Duration>,
}

fn parse_go_json(raw: &str) -> Option<ParsedReport> {
    let mut recognized = false;
    let mut run_order: Vec<String> = Vec::new();
    let mut seen_run = HashSet::new();
    let mut skipped = HashSet::new();
    let mut failed: Vec<String> = Vec::new();
    let mut failed_packages: Vec<String> = Vec::new();
    let mut elapsed_total: Option<f64> = None;

    for line in raw.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<GoTestEvent>(line) else {
            continue;
        };
        recognized = true;

        let test = event.test.as_deref().filter(|name| !name.is_empty());
        match (event.action.as_str(), test) {
            ("run", Some(name)) => {
                if is_top_level(name) && seen_run.insert(name.to_string()) {
                    run_order.push(name.to_string());
                }
            }
            ("skip", Some(name)) => {
                skipped.insert(name.to_string());
            }
            ("fail", Some(name)) => {
                let name = top_level(name);
                if !failed.iter().any(|existing| existing == name) {
                    failed.push(name.to_string());
                }
            }
            ("fail", None) => {
                let package = event.package.unwrap_or_else(|| "<package>".to_string());
                failed_packages.push(package);
                if let Some(elapsed) = event.elapsed {
                    *elapsed_total.get_or_insert(0.0) += elapsed;
                }
            }
            ("pass", None) => {
                if let Some(elapsed) = event.elapsed {
                    *elapsed_total.get_or_insert(0.0) += elapsed;
                }
            }
            _ => {}
        }
    }

    if !recognized {
        return None;
    }
    if failed.is_empty() {
        // A package can fail without a failing test (build error, panic in
        // TestMain); attribute the failure to the package itself.
        failed = failed_packages;
    }
    let executed = run_order
        .into_iter()
        .filter(|name| !skipped.contains(name))
        .collect();
    Some(ParsedReport {
        executed,
        failed,
        duration: elapsed_total.and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
    })
}

fn parse_libtest(raw: &str) -> Option<ParsedReport> {
    let mut recognized = false;
    let mut report = ParsedReport::default();
    let mut seen = HashSet::new();

    for line in raw.lines() {
        let line = line.trim_end();
        if LIBTEST_RUNNING_RE.is_match(line) {
            recognized = true;
            continue;
        }
        if let Some(caps) = LIBTEST_SUMMARY_RE.captures(line) {
            recognized = true;
            let secs = caps[1].parse::<f64>().unwrap_or(0.0);
            if let Ok(duration) = Duration::try_from_secs_f64(secs) {
                *report.duration.get_or_insert(Duration::ZERO) += duration;
            }
            continue;
        }
        let Some(caps) = LIBTEST_CASE_RE.captures(line) else {
            continue;
        };
        recognized = true;
        let name = caps[1].to_string();
        match &caps[2] {
            "ignored" => {}
            status => {
                if seen.insert(name.clone()) {
                    report.executed.push(name.clone());
                }
                if status == "FAILED" && !report.failed.contains(&name) {
                    report.failed.push(name);
                }
            }
        }
    }

    recognized.then_some(report)
}

fn is_top_level(name: &str) -> bool {
    !name.contains('/')
}

fn top_level(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

fn describe_unrecognized(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "output is empty".to_string();
    }
    let first = trimmed.lines().next().unwrap_or_default();
    let preview: String = first.chars().take(80).collect();
    format!("no go test -json events or libtest report found (first line: {preview:?})")
}
