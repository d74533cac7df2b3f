// src/errors.rs

//! The error taxonomy shared by every stage of configuration resolution.
//!
//! All failures raised while building a configuration are variants of
//! [`DoitomlError`]. Callers that only care about the broad class of a
//! failure can match on [`DoitomlError::category`] instead.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The broad class an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Finding, loading and naming configuration sources.
    Discovery,
    /// The retrying passes over `env`, `paths` and `tokens`.
    Resolution,
    /// A path escaped the safe roots.
    Safety,
    /// Task trees, actions, skips and up-to-date checks.
    Task,
    /// Loading plugins into their registries.
    Plugin,
    /// Structural validation of the final export.
    Schema,
    /// Reading or writing the filesystem.
    Io,
}

/// Which resolution pass left entries unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedKind {
    /// The `env` pass.
    EnvironmentVariables,
    /// The `paths` pass.
    Paths,
    /// The `tokens` pass.
    Tokens,
    /// Task fields.
    TaskSpecs,
}

impl fmt::Display for UnresolvedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::EnvironmentVariables => "environment variables",
            Self::Paths => "paths",
            Self::Tokens => "commands",
            Self::TaskSpecs => "task specs",
        };
        f.write_str(label)
    }
}

/// Every failure raised while loading, resolving or running a configuration.
#[derive(Error, Debug)]
pub enum DoitomlError {
    // --- Discovery ---
    /// Neither the explicit paths nor the default file held any configuration.
    #[error("No config found in any of:{checked}")]
    NoConfig {
        /// The candidates, one per line.
        checked: String,
    },
    /// Two sources asked for the same prefix.
    #[error("{source_desc} cannot claim prefix '{prefix}': {claimed_by}")]
    Prefix {
        /// The source that lost.
        source_desc: String,
        /// The contested prefix.
        prefix: String,
        /// The source that claimed it first.
        claimed_by: String,
    },
    /// No config parser recognized the file.
    #[error("Cannot load {path}: expected one of {tried:?}")]
    UnknownConfig {
        /// The file that was offered.
        path: String,
        /// Names of the config parsers consulted.
        tried: Vec<String>,
    },
    /// A file could not be read as its format.
    #[error("Failed to parse {path} as {parser}: {message}")]
    Parse {
        /// The unreadable file.
        path: String,
        /// The parser that rejected it.
        parser: String,
        /// The parser's own message.
        message: String,
    },

    // --- Resolution ---
    /// A retrying pass ran out of sweeps.
    #[error("Failed to resolve {kind}: {details}")]
    Unresolved {
        /// The pass that gave up.
        kind: UnresolvedKind,
        /// Whatever was left over.
        details: String,
    },
    /// A referenced environment variable is missing.
    #[error("{0}")]
    EnvVar(String),
    /// A token transformer failed.
    #[error("{0}")]
    Dsl(String),

    // --- Safety ---
    /// A resolved path fell outside every safe root.
    #[error("{path} is not in any of the safe_paths: {safe_paths:?}")]
    UnsafePath {
        /// The offending path.
        path: String,
        /// The roots it was checked against.
        safe_paths: Vec<String>,
    },

    // --- Tasks ---
    /// A source or task is malformed.
    #[error("{0}")]
    Config(String),
    /// A task failed normalization or validation.
    #[error("{0}")]
    Task(String),
    /// No registered actor knows a mapping-shaped action.
    #[error("{source_desc} no actor could handle {action}, tried: {tried:?}")]
    NoActor {
        /// The source declaring the action.
        source_desc: String,
        /// The action, as JSON.
        action: String,
        /// Names of the actors consulted.
        tried: Vec<String>,
    },
    /// An actor rejected its action.
    #[error("{0}")]
    Actor(String),
    /// A template kind has no templater.
    #[error("{source_desc} template kind '{kind}' not one of {known:?}")]
    NoTemplater {
        /// The source declaring the template.
        source_desc: String,
        /// The unknown kind.
        kind: String,
        /// Names of the loaded templaters.
        known: Vec<String>,
    },
    /// A template failed to render or produced an unusable task.
    #[error("{0}")]
    Templater(String),
    /// An up-to-date kind has no updater.
    #[error("{source_desc} uptodate {uptodate} not one of {known:?}")]
    NoUpdater {
        /// The source declaring the check.
        source_desc: String,
        /// The unknown kind.
        uptodate: String,
        /// Names of the loaded updaters.
        known: Vec<String>,
    },
    /// An updater rejected its arguments.
    #[error("{0}")]
    Updater(String),
    /// A skip condition is malformed.
    #[error("{0}")]
    Skip(String),
    /// A `py` call could not be made.
    #[error("{0}")]
    Py(String),
    /// A spawned command failed to start or to log.
    #[error(transparent)]
    Execution(#[from] crate::system::executor::ExecutionError),

    // --- Plugins ---
    /// A plugin factory failed.
    #[error("Failed to load {group} entry point '{name}': {message}")]
    EntryPoint {
        /// The registry being loaded.
        group: &'static str,
        /// The plugin's registered name.
        name: String,
        /// The factory's message.
        message: String,
    },

    // --- Schema ---
    /// The exported configuration failed structural validation.
    #[error("Configuration is not valid:\n{0}")]
    Schema(String),

    // --- Io ---
    /// A filesystem call failed.
    #[error("Filesystem error at '{}': {source}", path.display())]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl DoitomlError {
    /// Returns the broad class of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoConfig { .. }
            | Self::Prefix { .. }
            | Self::UnknownConfig { .. }
            | Self::Parse { .. } => ErrorCategory::Discovery,
            Self::Unresolved { .. } | Self::EnvVar(_) | Self::Dsl(_) => ErrorCategory::Resolution,
            Self::UnsafePath { .. } => ErrorCategory::Safety,
            Self::Config(_)
            | Self::Task(_)
            | Self::NoActor { .. }
            | Self::Actor(_)
            | Self::NoTemplater { .. }
            | Self::Templater(_)
            | Self::NoUpdater { .. }
            | Self::Updater(_)
            | Self::Skip(_)
            | Self::Py(_)
            | Self::Execution(_) => ErrorCategory::Task,
            Self::EntryPoint { .. } => ErrorCategory::Plugin,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::Io { .. } => ErrorCategory::Io,
        }
    }

    /// A short, stable name for the kind of error, used in quiet-failure logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NoConfig { .. } => "NoConfigError",
            Self::Prefix { .. } => "PrefixError",
            Self::UnknownConfig { .. } => "ConfigError",
            Self::Parse { .. } => "ParseError",
            Self::Unresolved { .. } => "UnresolvedError",
            Self::EnvVar(_) => "EnvVarError",
            Self::Dsl(_) => "DslError",
            Self::UnsafePath { .. } => "UnsafePathError",
            Self::Config(_) => "ConfigError",
            Self::Task(_) => "TaskError",
            Self::NoActor { .. } => "NoActorError",
            Self::Actor(_) => "ActorError",
            Self::NoTemplater { .. } => "NoTemplaterError",
            Self::Templater(_) => "TemplaterError",
            Self::NoUpdater { .. } => "NoUpdaterError",
            Self::Updater(_) => "UpdaterError",
            Self::Skip(_) => "SkipError",
            Self::Py(_) => "PyError",
            Self::Execution(_) => "ExecutionError",
            Self::EntryPoint { .. } => "EntryPointError",
            Self::Schema(_) => "SchemaError",
            Self::Io { .. } => "IoError",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The crate-wide result alias.
pub type Result<T, E = DoitomlError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_message_names_the_pass() {
        let err = DoitomlError::Unresolved {
            kind: UnresolvedKind::EnvironmentVariables,
            details: "{\"a\": \"${b}\"}".to_string(),
        };
        assert!(err.to_string().starts_with("Failed to resolve environment variables"));
        assert_eq!(err.category(), ErrorCategory::Resolution);
    }

    #[test]
    fn unsafe_path_mentions_safe_paths() {
        let err = DoitomlError::UnsafePath {
            path: "/etc/passwd".to_string(),
            safe_paths: vec!["/project".to_string()],
        };
        assert!(err.to_string().contains("safe_paths"));
        assert_eq!(err.category(), ErrorCategory::Safety);
        assert_eq!(err.kind_name(), "UnsafePathError");
    }
}
