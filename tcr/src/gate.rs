//! Orchestration for `tcr gate`: answer whether one path may be modified.
//!
//! Read-only: the gate never writes state, so it does not take the project
//! lock.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::classifier::normalize_path;
use crate::core::gate::decide;
use crate::core::types::GateVerdict;
use crate::io::config::load_config;
use crate::io::init::TcrPaths;
use crate::io::state_store::load_state;

/// Decide whether `file` may be modified given the persisted state.
///
/// Absolute paths under the project root are made relative first; absolute
/// paths outside the root are classified as given.
pub fn check_path(paths: &TcrPaths, file: &Path) -> Result<GateVerdict> {
    let config = load_config(&paths.config_path)?;
    let state = load_state(&paths.state_path)?;
    let policy = config.path_policy().context("compile path policy")?;

    let relative = project_relative(&paths.root, file);
    debug!(path = %relative, phase = %state.phase(), "gate check");
    let verdict = decide(&state, &policy, &relative);
    info!(
        path = %relative,
        decision = ?verdict.decision,
        class = ?verdict.class,
        "gate decision"
    );
    Ok(verdict)
}

fn project_relative(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    normalize_path(&relative.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Decision, FileClass};
    use crate::io::init::{InitOptions, init_project};
    use crate::io::state_store::save_state;
    use crate::test_support::red_state;

    #[test]
    fn fresh_project_blocks_implementation_and_allows_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let verdict = check_path(&paths, Path::new("src/foo.go")).expect("gate");
        assert_eq!(verdict.decision, Decision::Blocked);
        let verdict = check_path(&paths, Path::new("src/foo_test.go")).expect("gate");
        assert_eq!(verdict.decision, Decision::Allowed);
    }

    #[test]
    fn absolute_paths_under_root_are_relativized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        save_state(&paths.state_path, &red_state(&["TestA"])).expect("save");

        let verdict = check_path(&paths, &paths.root.join("opencode.json")).expect("gate");
        assert_eq!(verdict.class, FileClass::Protected);
        let verdict = check_path(&paths, &paths.root.join("src/foo.go")).expect("gate");
        assert_eq!(verdict.decision, Decision::Allowed);
    }

    #[test]
    fn corrupt_state_is_an_error_not_an_answer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        std::fs::write(&paths.state_path, "{ broken").expect("write");
        assert!(check_path(&paths, Path::new("src/foo_test.go")).is_err());
    }
}
