// src/doitoml.rs

//! The public entry point: load every configuration source, resolve it and
//! hand out runnable task groups.

use crate::core::config_resolver::{Config, ConfigOptions};
use crate::core::entry_points::EntryPointsBuilder;
use crate::core::task_executor;
use crate::errors::{DoitomlError, Result};
use crate::models::TaskGroup;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Builder-style options for [`DoiTOML`].
#[derive(Debug, Default)]
pub struct DoiTomlOptions {
    config: ConfigOptions,
    entry_points: EntryPointsBuilder,
    python: Option<String>,
}

impl DoiTomlOptions {
    /// Options with the built-in plugins and the process cwd and env.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an explicit configuration file; disables discovery of well-known files.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_paths.push(path.into());
        self
    }

    /// Adds several explicit configuration files.
    pub fn config_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.config_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Sets the directory relative configuration paths are read from.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.config.cwd = cwd.into();
        self
    }

    /// Overrides the `update_env` toggle of the first source.
    pub fn update_env(mut self, update_env: bool) -> Self {
        self.config.update_env = Some(update_env);
        self
    }

    /// Overrides the `fail_quietly` toggle of the first source.
    pub fn fail_quietly(mut self, fail_quietly: bool) -> Self {
        self.config.fail_quietly = Some(fail_quietly);
        self
    }

    /// Overrides the `validate` toggle of the first source.
    pub fn validate(mut self, validate: bool) -> Self {
        self.config.validate = Some(validate);
        self
    }

    /// Whether `config_paths` inside sources are followed.
    pub fn discover_config_paths(mut self, discover: bool) -> Self {
        self.config.discover_config_paths = discover;
        self
    }

    /// Replaces `./pyproject.toml` as the fallback file.
    pub fn default_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.default_config_path = path.into();
        self
    }

    /// Accepts resolved paths under `path` too.
    pub fn extra_safe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.extra_safe_paths.push(path.into());
        self
    }

    /// Replaces the process environment snapshot.
    pub fn process_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.config.process_env = env;
        self
    }

    /// The interpreter used for `py` calls with no registered host function.
    pub fn python(mut self, interpreter: impl Into<String>) -> Self {
        self.python = Some(interpreter.into());
        self
    }

    /// Replaces the plugin registrations.
    pub fn entry_points(mut self, entry_points: EntryPointsBuilder) -> Self {
        self.entry_points = entry_points;
        self
    }

    /// Adjusts the plugin registrations in place.
    pub fn with_entry_points<F>(mut self, f: F) -> Self
    where
        F: FnOnce(EntryPointsBuilder) -> EntryPointsBuilder,
    {
        self.entry_points = f(self.entry_points);
        self
    }
}

/// A failed load, with whether it should be reported quietly.
#[derive(Debug)]
pub struct LoadError {
    /// What went wrong.
    pub error: DoitomlError,
    /// Whether the caller asked for the error to be logged only.
    pub fail_quietly: bool,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error.kind_name(), self.error)
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A fully resolved set of configuration sources.
#[derive(Debug)]
pub struct DoiTOML {
    config: Config,
}

impl DoiTOML {
    /// Loads and resolves every source.
    ///
    /// In fail-quietly mode an error is logged and the process exits with
    /// status 1 instead of returning.
    pub fn load(options: DoiTomlOptions) -> Result<Self> {
        match Self::try_build(options) {
            Ok(doitoml) => Ok(doitoml),
            Err(LoadError {
                error,
                fail_quietly: true,
            }) => {
                log::error!("{}: {}", error.kind_name(), error);
                std::process::exit(1);
            }
            Err(LoadError { error, .. }) => Err(error),
        }
    }

    /// Loads and resolves every source, always returning the error.
    pub fn try_build(options: DoiTomlOptions) -> std::result::Result<Self, LoadError> {
        let explicit_quiet = options.config.fail_quietly;
        let builder = match options.python {
            Some(interpreter) => options.entry_points.python(Some(interpreter)),
            None => options.entry_points,
        };
        let entry_points = builder.build().map_err(|error| LoadError {
            error,
            fail_quietly: explicit_quiet.unwrap_or(false),
        })?;

        let mut config = Config::new(options.config, entry_points).map_err(|error| LoadError {
            error,
            fail_quietly: explicit_quiet.unwrap_or(false),
        })?;
        match config.initialize() {
            Ok(()) => Ok(Self { config }),
            Err(error) => Err(LoadError {
                fail_quietly: config.fail_quietly_on_error(),
                error,
            }),
        }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The resolved configuration as a plain document.
    pub fn to_dict(&self) -> Value {
        self.config.to_dict()
    }

    /// Every task, grouped and ready to run.
    pub fn tasks(&self) -> Result<Vec<TaskGroup>> {
        task_executor::materialize(&self.config)
    }

    /// Looks up a variable in the process snapshot, then in the resolved env.
    pub fn get_env(&self, key: &str) -> Result<String> {
        self.config.get_env(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_options() {
        let options = DoiTomlOptions::new()
            .cwd("/project")
            .config_path("a.toml")
            .config_paths(["b.json"])
            .fail_quietly(false)
            .discover_config_paths(false)
            .python("python3");
        assert_eq!(
            options.config.config_paths,
            vec![PathBuf::from("a.toml"), PathBuf::from("b.json")]
        );
        assert_eq!(options.config.fail_quietly, Some(false));
        assert!(!options.config.discover_config_paths);
        assert_eq!(options.python.as_deref(), Some("python3"));
    }

    #[test]
    fn missing_config_is_reported_loudly_when_asked() {
        let Ok(dir) = tempfile::tempdir() else {
            return;
        };
        let result = DoiTOML::try_build(
            DoiTomlOptions::new()
                .cwd(dir.path())
                .fail_quietly(false)
                .process_env(BTreeMap::new()),
        );
        let err = result.err();
        assert!(
            matches!(
                err,
                Some(LoadError {
                    error: DoitomlError::NoConfig { .. },
                    fail_quietly: false,
                })
            ),
            "{:?}",
            err
        );
    }
}
