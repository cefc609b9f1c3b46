//! Deterministic classification of proposed file paths.

use std::path::{Component, Path};

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use thiserror::Error;

use crate::core::types::FileClass;

/// A pattern from the policy source that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pattern `{pattern}`: {reason}")]
pub struct PatternError {
    pub field: &'static str,
    pub pattern: String,
    pub reason: String,
}

/// Compiled protected-path and test-file rules.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    protected: Vec<ProtectedEntry>,
    test_patterns: Vec<Regex>,
}

#[derive(Debug, Clone)]
struct ProtectedEntry {
    raw: String,
    glob: GlobMatcher,
}

impl PathPolicy {
    pub fn new(protected: &[String], test_patterns: &[String]) -> Result<Self, PatternError> {
        let protected = protected
            .iter()
            .map(|raw| {
                let raw = normalize_path(raw);
                compile_glob(&raw, "protectedPaths").map(|glob| ProtectedEntry { raw, glob })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let test_patterns = test_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| PatternError {
                    field: "testPatterns",
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            protected,
            test_patterns,
        })
    }

    /// Exact match, directory prefix, or glob match against any protected entry.
    pub fn is_protected(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.protected.iter().any(|entry| {
            path == entry.raw
                || path.starts_with(&format!("{}/", entry.raw))
                || entry.glob.is_match(&path)
        })
    }

    pub fn is_test_file(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.test_patterns.iter().any(|re| re.is_match(&path))
    }

    /// Protection is checked first; unmatched paths fall back to
    /// `Implementation`, the stricter class.
    pub fn classify(&self, path: &str) -> FileClass {
        if self.is_protected(path) {
            FileClass::Protected
        } else if self.is_test_file(path) {
            FileClass::Test
        } else {
            FileClass::Implementation
        }
    }
}

/// Compile a glob where `*` and `?` never cross a `/`.
pub fn compile_glob(pattern: &str, field: &'static str) -> Result<GlobMatcher, PatternError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| PatternError {
            field,
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })
}

/// Lexically normalize a relative path: drop `.` components, resolve `..`
/// against earlier components, and join with `/`.
///
/// `..` that would climb above the start is kept so that escaping paths never
/// collapse onto an unrelated in-tree path.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in Path::new(path).components() {
        match component {
            Component::RootDir => absolute = true,
            Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(last) if last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
        }
    }
    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PathPolicy {
        PathPolicy::new(
            &[
                "opencode.json".to_string(),
                ".opencode/tcr".to_string(),
                "*.lock".to_string(),
            ],
            &[r"_test\.go$".to_string(), r"^tests/".to_string()],
        )
        .expect("policy")
    }

    #[test]
    fn protected_exact_prefix_and_glob() {
        let policy = policy();
        assert!(policy.is_protected("opencode.json"));
        assert!(policy.is_protected(".opencode/tcr/state.json"));
        assert!(policy.is_protected("Cargo.lock"));
        assert!(!policy.is_protected("src/Cargo.lock"));
        assert!(!policy.is_protected(".opencode/tcrx/state.json"));
    }

    #[test]
    fn protection_survives_dot_segments() {
        let policy = policy();
        assert!(policy.is_protected("./opencode.json"));
        assert!(policy.is_protected("src/../opencode.json"));
        assert!(policy.is_protected(".opencode/./tcr/config.toml"));
    }

    #[test]
    fn classify_prefers_protection_over_test_pattern() {
        let policy = PathPolicy::new(
            &["src/locked_test.go".to_string()],
            &[r"_test\.go$".to_string()],
        )
        .expect("policy");
        assert_eq!(policy.classify("src/locked_test.go"), FileClass::Protected);
        assert_eq!(policy.classify("src/foo_test.go"), FileClass::Test);
        assert_eq!(policy.classify("src/foo.go"), FileClass::Implementation);
    }

    #[test]
    fn invalid_test_pattern_names_field() {
        let err = PathPolicy::new(&[], &["(".to_string()]).expect_err("invalid regex");
        assert_eq!(err.field, "testPatterns");
        assert_eq!(err.pattern, "(");
    }

    #[test]
    fn normalize_keeps_escaping_parent_segments() {
        assert_eq!(normalize_path("./a/b/../c"), "a/c");
        assert_eq!(normalize_path("../x"), "../x");
        assert_eq!(normalize_path("/abs/./p"), "/abs/p");
    }
}
