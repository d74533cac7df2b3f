// src/constants.rs

/// The package name, also the key of the tool's table in host manifests.
pub const NAME: &str = "doitoml";

/// The fallback configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./pyproject.toml";

/// How many extra sweeps a resolution pass may take before giving up.
pub const RETRIES: usize = 11;

/// The rank given to plugins that do not declare one.
pub const DEFAULT_RANK: i64 = 100;

/// Strings that a literal skip value treats as false, compared case-insensitively.
pub const FALSEY: &[&str] = &["", "false", "0", "0.0", "{}", "[]", "null", "none"];

/// Top-level keys of a configuration source.
pub mod config_keys {
    /// Namespaces the tasks, paths and tokens of a source.
    pub const PREFIX: &str = "prefix";
    /// Further sources to load, relative to this one.
    pub const CONFIG_PATHS: &str = "config_paths";
    /// Environment variables, resolved before anything else.
    pub const ENV: &str = "env";
    /// Named lists of source-relative paths.
    pub const PATHS: &str = "paths";
    /// Named lists of plain strings.
    pub const TOKENS: &str = "tokens";
    /// The task tree.
    pub const TASKS: &str = "tasks";
    /// Template declarations, keyed by templater.
    pub const TEMPLATES: &str = "templates";
    /// Toggle: layer resolved env over the process env.
    pub const UPDATE_ENV: &str = "update_env";
    /// Toggle: log load errors instead of raising them.
    pub const FAIL_QUIETLY: &str = "fail_quietly";
    /// Toggle: check the export against the schema.
    pub const VALIDATE: &str = "validate";
    /// Extra roots resolved paths may live under.
    pub const SAFE_PATHS: &str = "safe_paths";
    /// A default log level for the command line.
    pub const LOG_LEVEL: &str = "log_level";
}

/// Well-known keys of a task record.
pub mod task_keys {
    /// Steps run in order.
    pub const ACTIONS: &str = "actions";
    /// Files the task reads.
    pub const FILE_DEP: &str = "file_dep";
    /// Tasks that run first.
    pub const TASK_DEP: &str = "task_dep";
    /// Files the task writes.
    pub const TARGETS: &str = "targets";
    /// Files removed on clean.
    pub const CLEAN: &str = "clean";
    /// Up-to-date checks.
    pub const UPTODATE: &str = "uptodate";
    /// Free-form metadata; `doitoml` is reserved.
    pub const META: &str = "meta";
    /// One line of help.
    pub const DOC: &str = "doc";
    /// A display title, shown instead of the name.
    pub const TITLE: &str = "title";
    /// 0, 1 or 2.
    pub const VERBOSITY: &str = "verbosity";
    /// Names each task a template expands to.
    pub const NAME: &str = "name";

    /// Task fields holding paths resolved against the owning source.
    pub const RELATIVE_LISTS: &[&str] = &[FILE_DEP, TARGETS, CLEAN];
}

/// Keys of the `meta.doitoml` block of a task.
pub mod meta_keys {
    /// A skip condition, checked before the task is read further.
    pub const SKIP: &str = "skip";
    /// The working directory of every action.
    pub const CWD: &str = "cwd";
    /// Env layered over the configuration's for this task.
    pub const ENV: &str = "env";
    /// Where stdout and stderr go.
    pub const LOG: &str = "log";
    /// The file that declared the task.
    pub const SOURCE: &str = "source";
}
