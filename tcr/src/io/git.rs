//! Git adapter for the commit/revert step.
//!
//! The cycle only needs three operations from version control, so they sit
//! behind the [`Vcs`] trait and tests can substitute a recording fake.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// The enforcement directory never takes part in commits or reverts.
const TCR_PATHSPEC_EXCLUDE: &str = ":(exclude).opencode/tcr";
const TCR_CLEAN_EXCLUDE: &str = ".opencode/tcr/";

/// Version-control operations used by the enforcement cycle.
pub trait Vcs {
    /// Paths with uncommitted changes, relative to the project root.
    fn changed_paths(&self) -> Result<Vec<String>>;
    /// Stage and commit every change. Returns false if there was nothing to
    /// commit.
    fn commit_all(&self, message: &str) -> Result<bool>;
    /// Drop every uncommitted change, including untracked files.
    fn discard_changes(&self) -> Result<()>;
}

/// Parsed `git status --porcelain -z` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
    /// Source path of a rename or copy.
    pub orig_path: Option<String>,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Get status entries (including untracked) in NUL-separated porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&[
            "status",
            "--porcelain=v1",
            "-z",
            "-uall",
            "--",
            ".",
            TCR_PATHSPEC_EXCLUDE,
        ])?;
        parse_status_z(&out)
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Vcs for Git {
    /// Both sides of a rename or copy are reported, so moving a file away
    /// counts as changing it.
    fn changed_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for entry in self.status_porcelain()? {
            paths.extend(entry.orig_path);
            paths.push(entry.path);
        }
        Ok(paths)
    }

    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<bool> {
        self.run_checked(&["add", "-A", "--", ".", TCR_PATHSPEC_EXCLUDE])?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    #[instrument(skip_all)]
    fn discard_changes(&self) -> Result<()> {
        warn!(workdir = %self.workdir.display(), "discarding uncommitted changes");
        self.run_checked(&["reset", "--hard", "--quiet"])?;
        self.run_checked(&["clean", "-fd", "--quiet", "-e", TCR_CLEAN_EXCLUDE])?;
        Ok(())
    }
}

/// Parse `git status --porcelain=v1 -z` output.
///
/// Records are NUL-terminated and paths are verbatim, so no unquoting is
/// needed. A rename or copy record is followed by its source path.
fn parse_status_z(out: &str) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    let mut records = out.split('\0').filter(|record| !record.is_empty());
    while let Some(record) = records.next() {
        let (code, path) = match (record.get(..2), record.get(3..)) {
            (Some(code), Some(path)) if record.as_bytes().get(2) == Some(&b' ') => (code, path),
            _ => return Err(anyhow!("unexpected porcelain record: '{record}'")),
        };
        let orig_path = if code.contains(|c| c == 'R' || c == 'C') {
            let orig = records
                .next()
                .ok_or_else(|| anyhow!("rename record without source path: '{record}'"))?;
            Some(orig.to_string())
        } else {
            None
        };
        entries.push(StatusEntry {
            code: code.to_string(),
            path: path.to_string(),
            orig_path,
        });
    }
    Ok(entries)
}
