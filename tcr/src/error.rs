//! Typed failures for the enforcement contracts.
//!
//! Orchestration code wraps these in `anyhow::Error` with context; callers that
//! need to branch on the kind recover it with `downcast_ref::<TcrError>()`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TcrError {
    #[error("read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse config {}: field `{field}`: {reason}", path.display())]
    ConfigParse {
        path: PathBuf,
        field: String,
        reason: String,
    },
    #[error("read state {}: {source}", path.display())]
    StateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file {} is corrupt: {reason}", path.display())]
    StateCorrupt { path: PathBuf, reason: String },
    #[error("write state {}: {source}", path.display())]
    StateWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("overlay already mounted at {}", merged_dir.display())]
    DuplicateMount { merged_dir: PathBuf },
    #[error("unrecognized test output: {reason}")]
    UnparsableOutput { reason: String },
    #[error("TCR violation: no tests were executed")]
    NoTestsExecuted,
    #[error("TCR violation: ran {count} tests ({}), expected exactly 1", tests.join(", "))]
    MultipleTestsExecuted { count: usize, tests: Vec<String> },
    #[error("another enforcement process holds {}{}", path.display(), holder_suffix(*holder))]
    LockHeld { path: PathBuf, holder: Option<u32> },
    #[error("lock {}: {source}", path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn holder_suffix(holder: Option<u32>) -> String {
    match holder {
        Some(pid) => format!(" (pid {pid})"),
        None => String::new(),
    }
}
