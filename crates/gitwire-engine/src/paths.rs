// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Repository directory resolution
//!
//! Android hosts run this server either inside Termux or inside the Alpine
//! terminal bundled with Acode. Each sandbox can only see its own private
//! tree, so a path that clearly belongs to the other one is refused up front
//! with an explanation instead of failing deep inside the engine.

use serde_json::{Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TERMUX_PREFIX: &str = "/data/data/com.termux/files/usr";
pub const TERMUX_HOME: &str = "/data/data/com.termux/files/home";
pub const ACODE_TERMINAL_PREFIX: &str = "/data/user/0/com.foxdebug.acode/files";
pub const ACODE_FREE_TERMINAL_PREFIX: &str = "/data/user/0/com.foxdebug.acodefree/files";
const ACODE_DATA_DIR: &str = "/data/user/0/com.foxdebug.acode";
pub const ALPINE_MARKER_FILES: [&str; 2] = ["/etc/alpine-release", "/sbin/apk"];

/// Sandboxed runtime a path or host belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Termux,
    AcodeTerm,
    Sdcard,
    Unknown,
}

impl Environment {
    pub const fn as_str(self) -> &'static str {
        match self {
            Environment::Termux => "termux",
            Environment::AcodeTerm => "acodeterm",
            Environment::Sdcard => "sdcard",
            Environment::Unknown => "unknown",
        }
    }

    /// Classify an absolute, normalized path by its leading components
    pub fn of_path(path: &str) -> Self {
        let under = |prefix: &str| has_prefix(path, prefix);

        if under(TERMUX_PREFIX) || under(TERMUX_HOME) {
            Environment::Termux
        } else if under(ACODE_TERMINAL_PREFIX)
            || under(ACODE_FREE_TERMINAL_PREFIX)
            || under(ACODE_DATA_DIR)
            || under("/home")
            || under("/root")
        {
            Environment::AcodeTerm
        } else if under("/sdcard") || under("/storage") || under("/mnt/sdcard") {
            Environment::Sdcard
        } else {
            Environment::Unknown
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component-aware prefix test: `/home` matches `/home/u` but not `/homework`.
fn has_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// What host detection may look at
pub trait HostProbe {
    fn var(&self, key: &str) -> Option<String>;
    fn exists(&self, path: &Path) -> bool;
}

/// Probe backed by the process environment and the real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Classify the runtime this process is running in.
///
/// `PREFIX` and the app data directories are checked first, then `HOME`,
/// then Alpine marker files.
pub fn detect_host(probe: &dyn HostProbe) -> Environment {
    let prefix = probe.var("PREFIX").unwrap_or_default();
    let exists = |p: &str| probe.exists(Path::new(p));

    if prefix == TERMUX_PREFIX || exists(TERMUX_PREFIX) {
        return Environment::Termux;
    }
    if prefix == ACODE_TERMINAL_PREFIX
        || prefix == ACODE_FREE_TERMINAL_PREFIX
        || exists(ACODE_TERMINAL_PREFIX)
        || exists(ACODE_FREE_TERMINAL_PREFIX)
    {
        return Environment::AcodeTerm;
    }

    let home = probe.var("HOME").unwrap_or_default();
    if home == TERMUX_HOME {
        return Environment::Termux;
    }
    if home == "/home" || home == "/root" || home.starts_with("/home/") || home.starts_with("/root/") {
        return Environment::AcodeTerm;
    }

    if ALPINE_MARKER_FILES.iter().any(|marker| exists(marker)) {
        Environment::AcodeTerm
    } else {
        Environment::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Invalid URI: {uri}")]
    InvalidUri { uri: String },

    #[error("Relative paths are not allowed; use absolute paths: {path}")]
    RelativePathNotAllowed { path: String },

    #[error(
        "Mismatch: resolved path ({path}) looks like a {path_environment} path but terminal \
         detected as {detected_terminal}. Either use a {use_terminal} terminal or choose a \
         {detected_terminal} path."
    )]
    TerminalMismatch {
        path: String,
        detected_terminal: &'static str,
        use_terminal: &'static str,
        path_environment: &'static str,
    },
}

impl PathError {
    pub fn code(&self) -> &'static str {
        match self {
            PathError::InvalidUri { .. } => "InvalidUri",
            PathError::RelativePathNotAllowed { .. } => "RelativePathNotAllowed",
            PathError::TerminalMismatch { .. } => "TerminalMismatch",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            PathError::InvalidUri { uri } => json!({ "uri": uri }),
            PathError::RelativePathNotAllowed { path } => json!({ "path": path }),
            PathError::TerminalMismatch {
                path,
                detected_terminal,
                use_terminal,
                path_environment,
            } => json!({
                "path": path,
                "detectedTerminal": detected_terminal,
                "useTerminal": use_terminal,
                "pathEnvironment": path_environment,
            }),
        }
    }
}

/// Turns client-supplied `dir` strings into checked absolute paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResolver {
    host: Environment,
}

impl PathResolver {
    /// Resolver for the runtime this process is in
    pub fn detect() -> Self {
        Self::with_probe(&SystemProbe)
    }

    pub fn with_probe(probe: &dyn HostProbe) -> Self {
        Self::for_host(detect_host(probe))
    }

    /// Resolver pinned to a known host runtime
    pub const fn for_host(host: Environment) -> Self {
        Self { host }
    }

    pub fn host(&self) -> Environment {
        self.host
    }

    /// Resolve a `dir` field taken from a JSON payload
    pub fn resolve_value(&self, dir: Option<&Value>) -> Result<PathBuf, PathError> {
        match dir {
            Some(Value::String(dir)) => self.resolve(dir),
            Some(other) => Err(PathError::InvalidUri {
                uri: other.to_string(),
            }),
            None => Err(PathError::InvalidUri {
                uri: String::new(),
            }),
        }
    }

    pub fn resolve(&self, dir: &str) -> Result<PathBuf, PathError> {
        let trimmed = dir.trim();
        if trimmed.is_empty() {
            return Err(PathError::InvalidUri {
                uri: dir.to_string(),
            });
        }

        let rooted = if trimmed.starts_with("sdcard/") || trimmed.starts_with("storage/") {
            format!("/{trimmed}")
        } else {
            trimmed.to_string()
        };

        if !rooted.starts_with('/') {
            return Err(PathError::RelativePathNotAllowed { path: rooted });
        }

        let path = normalize(&rooted);
        match (Environment::of_path(&path), self.host) {
            (Environment::Termux, Environment::AcodeTerm) => Err(PathError::TerminalMismatch {
                path,
                detected_terminal: "Acode",
                use_terminal: "Termux",
                path_environment: "Termux",
            }),
            (Environment::AcodeTerm, Environment::Termux) => Err(PathError::TerminalMismatch {
                path,
                detected_terminal: "Termux",
                use_terminal: "Acode",
                path_environment: "Alpine/Acode",
            }),
            _ => Ok(PathBuf::from(path)),
        }
    }
}

/// Lexical normalization of an absolute path: collapses separators, drops
/// `.`, applies `..` (never above the root) and strips a trailing slash.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FakeProbe {
        vars: HashMap<&'static str, &'static str>,
        files: HashSet<&'static str>,
    }

    impl FakeProbe {
        fn with_var(mut self, key: &'static str, value: &'static str) -> Self {
            self.vars.insert(key, value);
            self
        }

        fn with_file(mut self, path: &'static str) -> Self {
            self.files.insert(path);
            self
        }
    }

    impl HostProbe for FakeProbe {
        fn var(&self, key: &str) -> Option<String> {
            self.vars.get(key).map(|v| v.to_string())
        }

        fn exists(&self, path: &Path) -> bool {
            path.to_str().is_some_and(|p| self.files.contains(p))
        }
    }

    #[test]
    fn host_detection_order() {
        assert_eq!(
            detect_host(&FakeProbe::default().with_var("PREFIX", TERMUX_PREFIX)),
            Environment::Termux
        );
        // PREFIX beats HOME
        assert_eq!(
            detect_host(
                &FakeProbe::default()
                    .with_var("PREFIX", ACODE_FREE_TERMINAL_PREFIX)
                    .with_var("HOME", TERMUX_HOME)
            ),
            Environment::AcodeTerm
        );
        assert_eq!(
            detect_host(&FakeProbe::default().with_var("HOME", TERMUX_HOME)),
            Environment::Termux
        );
        assert_eq!(
            detect_host(&FakeProbe::default().with_var("HOME", "/root")),
            Environment::AcodeTerm
        );
        assert_eq!(
            detect_host(&FakeProbe::default().with_var("HOME", "/Users/u").with_file("/sbin/apk")),
            Environment::AcodeTerm
        );
        assert_eq!(
            detect_host(&FakeProbe::default().with_var("HOME", "/Users/u")),
            Environment::Unknown
        );
    }

    #[test]
    fn path_classification() {
        assert_eq!(
            Environment::of_path("/data/data/com.termux/files/home/repo"),
            Environment::Termux
        );
        assert_eq!(Environment::of_path("/home/u/repo"), Environment::AcodeTerm);
        assert_eq!(
            Environment::of_path("/data/user/0/com.foxdebug.acodefree/files/x"),
            Environment::AcodeTerm
        );
        assert_eq!(Environment::of_path("/storage/emulated/0"), Environment::Sdcard);
        assert_eq!(Environment::of_path("/homework"), Environment::Unknown);
        assert_eq!(Environment::of_path("/tmp/repo"), Environment::Unknown);
    }

    #[test]
    fn rejects_blank_and_relative_input() {
        let resolver = PathResolver::for_host(Environment::Unknown);
        assert_eq!(resolver.resolve("   ").unwrap_err().code(), "InvalidUri");
        assert_eq!(resolver.resolve_value(None).unwrap_err().code(), "InvalidUri");
        assert_eq!(
            resolver.resolve_value(Some(&json!(42))).unwrap_err(),
            PathError::InvalidUri { uri: "42".into() }
        );
        assert_eq!(
            resolver.resolve("projects/repo").unwrap_err(),
            PathError::RelativePathNotAllowed {
                path: "projects/repo".into()
            }
        );
    }

    #[test]
    fn roots_sdcard_shorthand_and_normalizes() {
        let resolver = PathResolver::for_host(Environment::Termux);
        assert_eq!(
            resolver.resolve(" sdcard/projects//app/./src/.. ").unwrap(),
            PathBuf::from("/sdcard/projects/app")
        );
        assert_eq!(
            resolver.resolve("storage/emulated/0/").unwrap(),
            PathBuf::from("/storage/emulated/0")
        );
        assert_eq!(resolver.resolve("/../..").unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let resolver = PathResolver::for_host(Environment::AcodeTerm);
        let once = resolver.resolve("/home/u/./repo/").unwrap();
        let twice = resolver.resolve(once.to_str().unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn termux_path_on_acode_host_is_a_mismatch() {
        let err = PathResolver::for_host(Environment::AcodeTerm)
            .resolve("/data/data/com.termux/files/home/repo")
            .unwrap_err();
        assert_eq!(err.code(), "TerminalMismatch");
        assert_eq!(
            err.to_string(),
            "Mismatch: resolved path (/data/data/com.termux/files/home/repo) looks like a \
             Termux path but terminal detected as Acode. Either use a Termux terminal or \
             choose a Acode path."
        );
        assert_eq!(err.data()["useTerminal"], "Termux");
    }

    #[test]
    fn acode_path_on_termux_host_is_a_mismatch() {
        let err = PathResolver::for_host(Environment::Termux)
            .resolve("/home/u/repo")
            .unwrap_err();
        assert_eq!(
            err.data(),
            json!({
                "path": "/home/u/repo",
                "detectedTerminal": "Termux",
                "useTerminal": "Acode",
                "pathEnvironment": "Alpine/Acode",
            })
        );
    }

    #[test]
    fn shared_storage_is_reachable_from_both_terminals() {
        for host in [Environment::Termux, Environment::AcodeTerm, Environment::Unknown] {
            assert!(PathResolver::for_host(host).resolve("/sdcard/repo").is_ok());
        }
    }
}
