//! External test-runner adapter.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use super::process::run_command_with_timeout;
use crate::core::types::RawTestRun;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub command: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Produces the raw output of one test-suite invocation.
///
/// A timeout is reported through [`RawTestRun::timed_out`], not as an error;
/// errors mean the runner could not be started at all.
pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<RawTestRun>;
}

/// Runs the configured test command through `sh -c`.
pub struct ShellTestRunner;

impl TestRunner for ShellTestRunner {
    #[instrument(skip_all, fields(workdir = %request.workdir.display()))]
    fn run(&self, request: &TestRequest) -> Result<RawTestRun> {
        debug!(command = %request.command, "running test command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.workdir);
        let output =
            run_command_with_timeout(cmd, None, request.timeout, request.output_limit_bytes)?;
        Ok(RawTestRun {
            output: output.combined_text(),
            exit_code: if output.timed_out {
                None
            } else {
                output.status.code()
            },
            timed_out: output.timed_out,
            duration: output.elapsed,
        })
    }
}
