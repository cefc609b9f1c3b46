//! Enforcement policy stored under `.opencode/tcr/config.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use minijinja::{Environment, context};
use serde::Serialize;
use serde::de::DeserializeOwned;
use toml::{Table, Value};
use tracing::{debug, warn};

use crate::core::classifier::{PathPolicy, compile_glob, normalize_path};
use crate::error::TcrError;

const KNOWN_KEYS: [&str; 8] = [
    "testCommand",
    "testPatterns",
    "protectedPaths",
    "timeout",
    "autoCommitMsg",
    "overlayWorkDir",
    "watchDebounce",
    "watchIgnore",
];

/// Enforcement policy (TOML), loaded fresh for every invocation.
///
/// Every field has a default; a missing file or a missing key is never an
/// error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Shell command that runs the test suite.
    pub test_command: String,
    /// Regexes identifying test files, matched against normalized paths.
    pub test_patterns: Vec<String>,
    /// Exact paths, directory prefixes, or globs that can never be modified.
    pub protected_paths: Vec<String>,
    /// Test-run timeout in seconds.
    pub timeout: u64,
    /// Commit message template (minijinja).
    pub auto_commit_msg: String,
    pub overlay_work_dir: PathBuf,
    /// File-watch debounce in milliseconds.
    pub watch_debounce: u64,
    pub watch_ignore: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_command: "go test -json ./...".to_string(),
            test_patterns: vec![r"_test\.go$".to_string()],
            protected_paths: vec!["opencode.json".to_string(), ".opencode/tcr".to_string()],
            timeout: 30,
            auto_commit_msg: "WIP".to_string(),
            overlay_work_dir: PathBuf::from("/tmp/tcr-overlay-work"),
            watch_debounce: 500,
            watch_ignore: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                ".opencode".to_string(),
            ],
        }
    }
}

impl Config {
    /// Check semantic constraints that the TOML types cannot express.
    ///
    /// Returns the offending field name and a reason.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if self.test_command.trim().is_empty() {
            return Err(("testCommand", "must be a non-empty command".to_string()));
        }
        if self.timeout == 0 {
            return Err(("timeout", "must be > 0".to_string()));
        }
        self.path_policy()
            .map_err(|err| (err.field, err.to_string()))?;
        for pattern in &self.watch_ignore {
            compile_glob(pattern, "watchIgnore").map_err(|err| (err.field, err.to_string()))?;
        }
        Environment::new()
            .template_from_str(&self.auto_commit_msg)
            .map_err(|err| ("autoCommitMsg", err.to_string()))?;
        Ok(())
    }

    pub fn path_policy(&self) -> Result<PathPolicy, crate::core::classifier::PatternError> {
        PathPolicy::new(&self.protected_paths, &self.test_patterns)
    }

    /// True iff `path` matches a protected entry by exact path, directory
    /// prefix, or glob. An uncompilable policy protects everything.
    pub fn is_protected(&self, path: &str) -> bool {
        match self.path_policy() {
            Ok(policy) => policy.is_protected(path),
            Err(err) => {
                warn!(err = %err, "protected path policy invalid; treating path as protected");
                true
            }
        }
    }

    pub fn is_test_file(&self, path: &str) -> bool {
        self.path_policy()
            .map(|policy| policy.is_test_file(path))
            .unwrap_or(false)
    }

    /// True if any path component equals an ignore entry or the path matches
    /// an ignore glob.
    pub fn is_watch_ignored(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.watch_ignore.iter().any(|entry| {
            path.split('/').any(|component| component == entry)
                || compile_glob(entry, "watchIgnore")
                    .map(|glob| glob.is_match(&path))
                    .unwrap_or(false)
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce)
    }

    /// Render `autoCommitMsg` for a committed cycle.
    pub fn render_commit_message(
        &self,
        test: &str,
        streak: u32,
        duration: Duration,
    ) -> anyhow::Result<String> {
        let rendered = Environment::new()
            .render_str(
                &self.auto_commit_msg,
                context! {
                    test => test,
                    streak => streak,
                    duration_ms => duration.as_millis() as u64,
                },
            )
            .context("render autoCommitMsg")?;
        Ok(rendered.trim().to_string())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`. Each recognized key
/// is decoded on its own so that type errors name the field.
pub fn load_config(path: &Path) -> Result<Config, TcrError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config missing, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(TcrError::ConfigRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let parse_err = |field: &str, reason: String| TcrError::ConfigParse {
        path: path.to_path_buf(),
        field: field.to_string(),
        reason,
    };

    let table: Table = contents
        .parse()
        .map_err(|err: toml::de::Error| parse_err("<document>", err.message().to_string()))?;

    for key in table.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(key = %key, path = %path.display(), "ignoring unknown config key");
        }
    }

    let mut cfg = Config::default();
    decode_field(&table, "testCommand", &mut cfg.test_command, &parse_err)?;
    decode_field(&table, "testPatterns", &mut cfg.test_patterns, &parse_err)?;
    decode_field(&table, "protectedPaths", &mut cfg.protected_paths, &parse_err)?;
    decode_field(&table, "timeout", &mut cfg.timeout, &parse_err)?;
    decode_field(&table, "autoCommitMsg", &mut cfg.auto_commit_msg, &parse_err)?;
    decode_field(&table, "overlayWorkDir", &mut cfg.overlay_work_dir, &parse_err)?;
    decode_field(&table, "watchDebounce", &mut cfg.watch_debounce, &parse_err)?;
    decode_field(&table, "watchIgnore", &mut cfg.watch_ignore, &parse_err)?;

    cfg.validate()
        .map_err(|(field, reason)| parse_err(field, reason))?;
    debug!(path = %path.display(), test_command = %cfg.test_command, "config loaded");
    Ok(cfg)
}

fn decode_field<T, F>(table: &Table, key: &str, slot: &mut T, parse_err: &F) -> Result<(), TcrError>
where
    T: DeserializeOwned,
    F: Fn(&str, String) -> TcrError,
{
    let Some(value) = table.get(key) else {
        return Ok(());
    };
    *slot = Value::try_into(value.clone()).map_err(|err: toml::de::Error| {
        parse_err(key, err.message().to_string())
    })?;
    Ok(())
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> anyhow::Result<()> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
