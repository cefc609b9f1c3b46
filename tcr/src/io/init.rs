//! Project paths and `.opencode/tcr/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{Config, write_config};
use super::state_store::{STATE_SCHEMA, save_state};
use crate::state::EnforcementState;

/// All canonical enforcement paths for a project root.
///
/// Every component receives one of these instead of resolving paths from the
/// process environment.
#[derive(Debug, Clone)]
pub struct TcrPaths {
    pub root: PathBuf,
    pub tcr_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub schema_path: PathBuf,
    pub lock_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl TcrPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tcr_dir = root.join(".opencode").join("tcr");
        Self {
            root,
            config_path: tcr_dir.join("config.toml"),
            state_path: tcr_dir.join("state.json"),
            schema_path: tcr_dir.join("state.schema.json"),
            lock_path: tcr_dir.join("lock"),
            gitignore_path: tcr_dir.join(".gitignore"),
            tcr_dir,
        }
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing config and reset state.
    pub force: bool,
}

/// Create `.opencode/tcr/` with default config, fresh state, and the state
/// schema for external readers.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<TcrPaths> {
    let paths = TcrPaths::new(root);
    if paths.tcr_dir.exists() && !paths.tcr_dir.is_dir() {
        return Err(anyhow!(
            "tcr init: {} exists but is not a directory",
            paths.tcr_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "tcr init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.tcr_dir)
        .with_context(|| format!("create directory {}", paths.tcr_dir.display()))?;
    write_config(&paths.config_path, &Config::default())?;
    save_state(&paths.state_path, &EnforcementState::default())?;
    write_file(&paths.schema_path, STATE_SCHEMA)?;
    write_file(&paths.gitignore_path, TCR_GITIGNORE)?;

    info!(root = %paths.root.display(), "initialized tcr project");
    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const TCR_GITIGNORE: &str = "state.json\nstate.json.tmp\nlock\n";
