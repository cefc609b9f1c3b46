//! TCR enforcement CLI.
//!
//! Reads and writes `.opencode/tcr/` under the project root. Machine-readable
//! JSON goes to stdout; diagnostics go to stderr.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use tcr::core::types::{Action, Decision, RawTestRun, Report};
use tcr::cycle::{CycleOptions, record_cycle, run_cycle};
use tcr::exit_codes;
use tcr::gate::check_path;
use tcr::io::git::Git;
use tcr::io::init::{InitOptions, TcrPaths, init_project};
use tcr::io::liveness::is_pid_alive;
use tcr::io::state_store::load_state;
use tcr::io::test_runner::ShellTestRunner;
use tcr::logging;
use tcr::session;
use tcr::status::status;

#[derive(Parser)]
#[command(
    name = "tcr",
    version,
    about = "Test && Commit || Revert enforcement engine"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.opencode/tcr/` with default config and fresh state.
    Init {
        /// Overwrite existing config and reset state.
        #[arg(short, long)]
        force: bool,
    },
    /// Show the RED/GREEN phase, revert streak, and overlay sessions.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Decide whether FILE may be modified in the current state.
    Gate { file: PathBuf },
    /// Run the test command, then commit or revert.
    Cycle {
        /// Run tests in this overlay session and release it afterwards.
        #[arg(long)]
        merged_dir: Option<PathBuf>,
        /// Override the configured timeout (seconds).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },
    /// Enforce an externally run test suite; output is read from stdin.
    Record {
        #[arg(long, required_unless_present = "timed_out")]
        exit_code: Option<i32>,
        #[arg(long)]
        timed_out: bool,
        #[arg(long)]
        merged_dir: Option<PathBuf>,
    },
    /// Track overlay sessions.
    Mount {
        #[command(subcommand)]
        command: MountCommand,
    },
}

#[derive(Subcommand)]
enum MountCommand {
    /// Allocate session directories and record the mount.
    Begin {
        /// Project tree the overlay is layered on.
        #[arg(long)]
        lower: PathBuf,
        /// Owning process (defaults to the calling process).
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Forget a session and remove its directories.
    End { merged: PathBuf },
    /// List sessions whose owning process is gone.
    Stale,
    /// Remove every stale session.
    Reclaim,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let paths = match resolve_paths(cli.root) {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    };
    let on_error = ErrorReport::for_command(&cli.command);
    let code = match run(&paths, cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            on_error.emit(&paths, &err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn resolve_paths(root: Option<PathBuf>) -> Result<TcrPaths> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    Ok(TcrPaths::new(root))
}

/// Stdout payload for a failed invocation. Commands the orchestrator consumes
/// still answer with a BLOCKED result carrying the error as its reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorReport {
    None,
    Verdict,
    Cycle,
}

/// Gate answer when no decision could be made.
#[derive(Serialize)]
struct BlockedVerdict {
    decision: Decision,
    reason: String,
}

impl ErrorReport {
    fn for_command(command: &Command) -> Self {
        match command {
            Command::Gate { .. } => ErrorReport::Verdict,
            Command::Cycle { .. } | Command::Record { .. } => ErrorReport::Cycle,
            _ => ErrorReport::None,
        }
    }

    fn emit(self, paths: &TcrPaths, err: &anyhow::Error) {
        let reason = format!("{:#}", err);
        let printed = match self {
            ErrorReport::None => return,
            ErrorReport::Verdict => print_json(&BlockedVerdict {
                decision: Decision::Blocked,
                reason,
            }),
            ErrorReport::Cycle => {
                let streak = load_state(&paths.state_path)
                    .map(|state| state.revert_streak)
                    .unwrap_or_default();
                print_json(&Report {
                    action: Action::Blocked,
                    reason,
                    streak,
                    output: String::new(),
                })
            }
        };
        if let Err(err) = printed {
            eprintln!("{:#}", err);
        }
    }
}

fn run(paths: &TcrPaths, command: Command) -> Result<i32> {
    match command {
        Command::Init { force } => cmd_init(&paths.root, force),
        Command::Status { json } => cmd_status(paths, json),
        Command::Gate { file } => cmd_gate(paths, &file),
        Command::Cycle {
            merged_dir,
            timeout,
        } => cmd_cycle(paths, merged_dir, timeout),
        Command::Record {
            exit_code,
            timed_out,
            merged_dir,
        } => cmd_record(paths, exit_code, timed_out, merged_dir),
        Command::Mount { command } => cmd_mount(paths, command),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.tcr_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &TcrPaths, json: bool) -> Result<i32> {
    let report = status(paths, is_pid_alive)?;
    if json {
        print_json(&report)?;
    } else {
        print!("{}", report.render_text());
    }
    Ok(exit_codes::OK)
}

fn cmd_gate(paths: &TcrPaths, file: &Path) -> Result<i32> {
    let verdict = check_path(paths, file)?;
    print_json(&verdict)?;
    Ok(exit_codes::for_decision(verdict.decision))
}

fn cmd_cycle(paths: &TcrPaths, merged_dir: Option<PathBuf>, timeout: Option<u64>) -> Result<i32> {
    let git = Git::new(merged_dir.clone().unwrap_or_else(|| paths.root.clone()));
    let options = CycleOptions {
        merged_dir,
        timeout: timeout.map(Duration::from_secs),
        ..CycleOptions::default()
    };
    let report = run_cycle(paths, &ShellTestRunner, &git, &options)?;
    print_json(&report)?;
    Ok(exit_codes::for_action(report.action))
}

fn cmd_record(
    paths: &TcrPaths,
    exit_code: Option<i32>,
    timed_out: bool,
    merged_dir: Option<PathBuf>,
) -> Result<i32> {
    let mut output = String::new();
    io::stdin()
        .read_to_string(&mut output)
        .context("read test output from stdin")?;
    let run = RawTestRun {
        output,
        exit_code,
        timed_out,
        duration: Duration::ZERO,
    };
    let git = Git::new(merged_dir.clone().unwrap_or_else(|| paths.root.clone()));
    let options = CycleOptions {
        merged_dir,
        ..CycleOptions::default()
    };
    let report = record_cycle(paths, run, &git, &options)?;
    print_json(&report)?;
    Ok(exit_codes::for_action(report.action))
}

fn cmd_mount(paths: &TcrPaths, command: MountCommand) -> Result<i32> {
    match command {
        MountCommand::Begin { lower, pid } => {
            let mount = session::begin(paths, &lower, pid.unwrap_or_else(default_owner_pid))?;
            print_json(&mount)?;
        }
        MountCommand::End { merged } => {
            let ended = session::end(paths, &merged)?;
            print_json(&ended)?;
        }
        MountCommand::Stale => {
            let stale = session::stale(paths, is_pid_alive)?;
            print_json(&stale)?;
        }
        MountCommand::Reclaim => {
            let reclaimed = session::reclaim(paths, is_pid_alive)?;
            print_json(&reclaimed)?;
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(unix)]
fn default_owner_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn default_owner_pid() -> u32 {
    std::process::id()
}

/// Serialize `value` to pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
