// src/models.rs

//! Data shared between resolution and materialization.
//!
//! Everything here is plain, owned data: normalized tasks hold resolved
//! strings and paths only, and runtime closures capture clones of them.

use crate::constants::{NAME, meta_keys, task_keys};
use crate::core::paths;
use crate::errors::Result;
use crate::sources::ConfigSource;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A `(prefix, name)` key into the `paths` and `tokens` namespaces.
pub type PrefixedKey = (String, String);

/// A prefix tuple naming a task, starting with its source's prefix.
pub type TaskPrefixes = Vec<String>;

/// Joins a prefix tuple into a task name, dropping a leading empty prefix.
pub fn task_name(prefixes: &[String]) -> String {
    match prefixes.split_first() {
        Some((first, rest)) if first.is_empty() => rest.join(":"),
        _ => prefixes.join(":"),
    }
}

// --- CONFIGURATION-TIME SHAPES ---

/// One normalized task action.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    /// Handed to the platform shell verbatim.
    Shell(String),
    /// A program and its arguments, every token resolved.
    Tokens(Vec<String>),
    /// A mapping-shaped action claimed by the named actor.
    Actor {
        /// The actor's registered name.
        actor: String,
        /// The transformed action, as exported.
        action: Value,
    },
}

impl TaskAction {
    /// The action as it is exported.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Shell(line) => Value::String(line.clone()),
            Self::Tokens(tokens) => json!(tokens),
            Self::Actor { action, .. } => action.clone(),
        }
    }
}

/// One normalized up-to-date declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Uptodate {
    /// A plain `true` or `false`.
    Literal(bool),
    /// Checked by the named updater with its arguments.
    Updater {
        /// The updater's registered name.
        updater: String,
        /// Its resolved arguments.
        args: Value,
    },
}

impl Uptodate {
    /// The check as it is exported.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Literal(value) => Value::Bool(*value),
            Self::Updater { updater, args } => {
                let mut map = Map::new();
                map.insert(updater.clone(), args.clone());
                Value::Object(map)
            }
        }
    }
}

/// Where a task's standard streams go; `None` inherits the parent's stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPaths {
    /// Where stdout goes.
    pub stdout: Option<PathBuf>,
    /// Where stderr goes.
    pub stderr: Option<PathBuf>,
}

impl LogPaths {
    /// True when both streams are inherited.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    /// Both streams go to the same file.
    pub fn is_shared(&self) -> bool {
        self.stdout.is_some() && self.stdout == self.stderr
    }

    /// `[stdout, stderr]`, with `null` for an inherited stream.
    pub fn to_value(&self) -> Value {
        let as_value = |p: &Option<PathBuf>| match p {
            Some(path) => Value::String(paths::to_posix(path)),
            None => Value::Null,
        };
        json!([as_value(&self.stdout), as_value(&self.stderr)])
    }
}

/// The normalized `meta.doitoml` block every task carries.
#[derive(Debug, Clone)]
pub struct DoitomlMeta {
    /// Working directory of every action.
    pub cwd: PathBuf,
    /// Task env, layered over the configuration env.
    pub env: BTreeMap<String, String>,
    /// Log destinations.
    pub log: LogPaths,
    /// For diagnostics only.
    pub source: Arc<ConfigSource>,
}

impl DoitomlMeta {
    /// The block as it is exported under `meta.doitoml`.
    pub fn to_value(&self) -> Value {
        let mut meta = Map::new();
        meta.insert(meta_keys::CWD.into(), json!(paths::to_posix(&self.cwd)));
        meta.insert(meta_keys::ENV.into(), json!(self.env));
        meta.insert(meta_keys::LOG.into(), self.log.to_value());
        meta.insert(meta_keys::SOURCE.into(), json!(paths::to_posix(self.source.path())));
        Value::Object(meta)
    }
}

/// A fully resolved task, the terminal output of configuration.
#[derive(Debug, Clone)]
pub struct NormalizedTask {
    /// Steps, in order.
    pub actions: Vec<TaskAction>,
    /// Absolute paths of files read.
    pub file_dep: Vec<String>,
    /// Absolute paths of files written.
    pub targets: Vec<String>,
    /// Absolute paths removed on clean.
    pub clean: Vec<String>,
    /// Names of tasks that run first.
    pub task_dep: Vec<String>,
    /// Up-to-date declarations.
    pub uptodate: Vec<Uptodate>,
    /// One line of help.
    pub doc: Option<String>,
    /// A display title.
    pub title: Option<String>,
    /// 0, 1 or 2.
    pub verbosity: Option<i64>,
    /// `meta` entries other than `doitoml`.
    pub meta: Map<String, Value>,
    /// Task keys this crate does not interpret, passed through untouched.
    pub extra: Map<String, Value>,
    /// The normalized `meta.doitoml` block.
    pub doitoml: DoitomlMeta,
}

impl NormalizedTask {
    /// The task as a plain document, with sorted keys.
    pub fn to_value(&self) -> Value {
        let mut task = self.extra.clone();
        task.insert(
            task_keys::ACTIONS.into(),
            Value::Array(self.actions.iter().map(TaskAction::to_value).collect()),
        );
        for (key, values) in [
            (task_keys::FILE_DEP, &self.file_dep),
            (task_keys::TARGETS, &self.targets),
            (task_keys::CLEAN, &self.clean),
            (task_keys::TASK_DEP, &self.task_dep),
        ] {
            if !values.is_empty() {
                task.insert(key.into(), json!(values));
            }
        }
        if !self.uptodate.is_empty() {
            task.insert(
                task_keys::UPTODATE.into(),
                Value::Array(self.uptodate.iter().map(Uptodate::to_value).collect()),
            );
        }
        if let Some(doc) = &self.doc {
            task.insert(task_keys::DOC.into(), Value::String(doc.clone()));
        }
        if let Some(title) = &self.title {
            task.insert(task_keys::TITLE.into(), Value::String(title.clone()));
        }
        if let Some(verbosity) = self.verbosity {
            task.insert(task_keys::VERBOSITY.into(), json!(verbosity));
        }
        let mut meta = self.meta.clone();
        meta.insert(NAME.into(), self.doitoml.to_value());
        task.insert(task_keys::META.into(), Value::Object(meta));
        Value::Object(task)
    }
}

// --- EXECUTION-TIME SHAPES ---

/// How log files are opened by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Truncate first.
    Write,
    /// Keep what earlier actions wrote.
    Append,
}

/// Everything an action needs to run, passed by value instead of being read
/// from process-global state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Working directory.
    pub cwd: PathBuf,
    /// The full environment; nothing is inherited.
    pub env: BTreeMap<String, String>,
    /// Log destinations.
    pub log_paths: LogPaths,
    /// How the log files are opened.
    pub log_mode: LogMode,
}

/// The body of a runtime action.
pub type ActionFn = Arc<dyn Fn() -> Result<bool> + Send + Sync>;

/// A self-contained, runnable step of a task. `Ok(false)` is a failed step.
#[derive(Clone)]
pub struct RuntimeAction {
    /// Shown in logs.
    pub label: String,
    run: ActionFn,
}

impl fmt::Debug for RuntimeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl RuntimeAction {
    /// Wraps `run` as an action.
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    /// Runs the action once.
    pub fn call(&self) -> Result<bool> {
        (self.run)()
    }
}

/// What a runner remembers about a task's previous run.
#[derive(Debug, Clone, Default)]
pub struct TaskHistory {
    /// Whether the previous run succeeded.
    pub succeeded: bool,
    /// Values saved by up-to-date checks after that run.
    pub values: BTreeMap<String, String>,
}

/// The predicate of an up-to-date check.
pub type UptodateFn = Arc<dyn Fn(&TaskHistory) -> Result<bool> + Send + Sync>;

/// An up-to-date predicate plus the values to remember after a successful run.
#[derive(Clone)]
pub struct UptodateCheck {
    /// Shown in logs.
    pub label: String,
    /// Recorded into the history after a successful run.
    pub saves: BTreeMap<String, String>,
    check: UptodateFn,
}

impl fmt::Debug for UptodateCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UptodateCheck")
            .field("label", &self.label)
            .field("saves", &self.saves)
            .finish_non_exhaustive()
    }
}

impl UptodateCheck {
    /// Wraps `check` as an up-to-date check.
    pub fn new<F>(label: impl Into<String>, saves: BTreeMap<String, String>, check: F) -> Self
    where
        F: Fn(&TaskHistory) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            saves,
            check: Arc::new(check),
        }
    }

    /// A check that always answers `value`.
    pub fn constant(value: bool) -> Self {
        Self::new(value.to_string(), BTreeMap::new(), move |_| Ok(value))
    }

    /// Asks the check against `history`.
    pub fn is_uptodate(&self, history: &TaskHistory) -> Result<bool> {
        (self.check)(history)
    }
}

/// A task in the shape a runner consumes.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// The first visible prefix segment.
    pub group: String,
    /// The remaining segments joined by `:`; may be empty.
    pub name: String,
    /// Runnable steps, in order.
    pub actions: Vec<RuntimeAction>,
    /// Absolute paths of files read.
    pub file_dep: Vec<String>,
    /// Absolute paths of files written.
    pub targets: Vec<String>,
    /// Absolute paths removed on clean.
    pub clean: Vec<String>,
    /// Names of tasks that run first.
    pub task_dep: Vec<String>,
    /// Up-to-date checks; all must pass.
    pub uptodate: Vec<UptodateCheck>,
    /// One line of help.
    pub doc: Option<String>,
    /// A display title.
    pub title: Option<String>,
    /// 0, 1 or 2.
    pub verbosity: Option<i64>,
    /// The exported `meta`, including `doitoml`.
    pub meta: Value,
    /// Where and how the actions run.
    pub context: ExecutionContext,
}

impl TaskRecord {
    /// `group:name`, or just `group` for a group head.
    pub fn full_name(&self) -> String {
        if self.name.is_empty() {
            self.group.clone()
        } else {
            format!("{}:{}", self.group, self.name)
        }
    }

    /// Runs every action in order, stopping at the first failed one.
    pub fn run(&self) -> Result<bool> {
        for action in &self.actions {
            log::debug!("{}: {}", self.full_name(), action.label);
            if !action.call()? {
                log::warn!("{}: action failed: {}", self.full_name(), action.label);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Tasks sharing a first prefix segment.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    /// The shared first segment.
    pub name: String,
    /// Describes the group in listings.
    pub doc: String,
    /// The tasks of the group.
    pub tasks: Vec<TaskRecord>,
}
