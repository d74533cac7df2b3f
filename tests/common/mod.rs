//! Common test utilities for doitoml integration tests.
//!
//! Provides `Project` for throwaway project roots holding `pyproject.toml`,
//! `package.json` and whatever else a test needs on disk.

#![allow(dead_code)]

use assert_cmd::Command;
use doitoml::{DoiTOML, DoiTomlOptions, DoitomlError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A temporary project root.
pub struct Project {
    pub dir: TempDir,
    root: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        // resolved paths come back canonical, so compare against the canonical root
        let root = dunce::canonicalize(dir.path()).unwrap();
        Self { dir, root }
    }

    /// A project whose only file is `pyproject.toml` with the given `[tool.doitoml]` body.
    pub fn with_pyproject(body: &str) -> Self {
        let project = Self::new();
        project.write("pyproject.toml", &format!("[tool.doitoml]\n{}", body));
        project
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A project path as resolved strings render it.
    pub fn posix(&self, relative: &str) -> String {
        let mut text = self.root.to_string_lossy().replace('\\', "/");
        if !relative.is_empty() {
            text.push('/');
            text.push_str(relative);
        }
        text
    }

    /// Writes a file below the root, creating its parents.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.root.join(relative)).unwrap()
    }

    /// Loud, discovering options rooted here, with an empty environment snapshot
    /// plus `PATH` so shell actions still find their programs.
    pub fn options(&self) -> DoiTomlOptions {
        let mut env = BTreeMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        DoiTomlOptions::new()
            .cwd(&self.root)
            .fail_quietly(false)
            .process_env(env)
    }

    pub fn load_with(&self, options: DoiTomlOptions) -> Result<DoiTOML, DoitomlError> {
        DoiTOML::try_build(options).map_err(|e| e.error)
    }

    pub fn load(&self) -> Result<DoiTOML, DoitomlError> {
        self.load_with(self.options())
    }

    /// A Command for the doitoml binary, run from the project root.
    pub fn doitoml(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_doitoml"));
        cmd.current_dir(&self.root);
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `"a:b"` into a prefix tuple.
pub fn prefixes(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}
