// src/cli/mod.rs

use crate::doitoml::DoiTomlOptions;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// One handler per subcommand.
pub mod handlers;

/// doitoml: declarative tasks gathered from pyproject.toml, package.json and friends.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// A configuration file to load. Repeat to load several; disables discovery.
    #[arg(long = "config", short = 'c', value_name = "PATH", global = true)]
    pub config: Vec<PathBuf>,

    /// The directory configuration paths are relative to. Defaults to the current one.
    #[arg(long, value_name = "DIR", global = true)]
    pub cwd: Option<PathBuf>,

    /// Only load explicit paths and the default `pyproject.toml`.
    #[arg(long, global = true)]
    pub no_discover: bool,

    /// Log configuration errors instead of printing them.
    #[arg(long, global = true, conflicts_with = "fail_loudly")]
    pub fail_quietly: bool,

    /// Print configuration errors, whatever the configuration says.
    #[arg(long, global = true)]
    pub fail_loudly: bool,

    /// The interpreter for `py` calls.
    #[arg(long, value_name = "INTERPRETER", global = true)]
    pub python: Option<String>,

    /// One of off, error, warn, info, debug, trace. Overrides `RUST_LOG`.
    #[arg(long, value_name = "LEVEL", global = true, value_parser = level_arg)]
    pub log_level: Option<log::LevelFilter>,

    /// What to do once the configuration loads.
    #[command(subcommand)]
    pub command: Command,
}

/// The subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Lists every task with its doc.
    #[command(alias = "ls")]
    List,
    /// Prints the resolved configuration as JSON.
    Dump,
    /// Runs the actions of the named tasks, or of every task in a named group.
    Run {
        /// Task or group names.
        #[arg(required = true, value_name = "TASK")]
        tasks: Vec<String>,
    },
}

impl Cli {
    /// The explicit choice, if either flag was given.
    pub fn fail_quietly_choice(&self) -> Option<bool> {
        if self.fail_quietly {
            Some(true)
        } else if self.fail_loudly {
            Some(false)
        } else {
            None
        }
    }

    /// Load options built from the global flags.
    pub fn options(&self) -> DoiTomlOptions {
        let mut options = DoiTomlOptions::new()
            .config_paths(self.config.iter().cloned())
            .discover_config_paths(!self.no_discover);
        if let Some(cwd) = &self.cwd {
            options = options.cwd(cwd.clone());
        }
        if let Some(quiet) = self.fail_quietly_choice() {
            options = options.fail_quietly(quiet);
        }
        if let Some(python) = &self.python {
            options = options.python(python.clone());
        }
        options
    }
}

/// Reads a level name, accepting Python's spellings as well.
pub fn parse_level(name: &str) -> Option<log::LevelFilter> {
    match name.trim().to_lowercase().as_str() {
        "warning" => Some(log::LevelFilter::Warn),
        "critical" | "fatal" => Some(log::LevelFilter::Error),
        "notset" => Some(log::LevelFilter::Trace),
        other => other.parse().ok(),
    }
}

fn level_arg(name: &str) -> Result<log::LevelFilter, String> {
    parse_level(name).ok_or_else(|| format!("unknown log level '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "doitoml", "run", "build", "lint", "--config", "a.toml", "--fail-loudly",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Run {
                tasks: vec!["build".to_string(), "lint".to_string()]
            }
        );
        assert_eq!(cli.config, vec![PathBuf::from("a.toml")]);
        assert_eq!(cli.fail_quietly_choice(), Some(false));
    }

    #[test]
    fn quiet_and_loud_conflict() {
        assert!(Cli::try_parse_from(["doitoml", "--fail-quietly", "--fail-loudly", "list"]).is_err());
    }

    #[test]
    fn python_level_names_are_understood() {
        assert_eq!(parse_level("WARNING"), Some(log::LevelFilter::Warn));
        assert_eq!(parse_level("debug"), Some(log::LevelFilter::Debug));
        assert_eq!(parse_level("loud"), None);
    }
}
