// src/core/config_resolver.rs

//! # Resolver
//!
//! [`Config`] owns every loaded source and the three resolved namespaces
//! (`env`, `paths`, `tokens`) plus the flat task map. Resolution runs in a
//! fixed order: discovery, env, toggles, paths, tokens, tasks, validation.
//!
//! The env, paths and tokens passes are bounded fixpoints: each sweep commits
//! whatever resolves, remembers what did not, and sweeps again until nothing
//! is left or the retry budget is spent. Committed entries are never
//! rewritten, so a later sweep only ever adds to the maps.

use crate::constants::{DEFAULT_CONFIG_PATH, RETRIES, config_keys};
use crate::core::entry_points::EntryPoints;
use crate::core::interpolator::getter_pattern;
use crate::core::paths::{SafePaths, normalize_path, to_posix};
use crate::core::schema;
use crate::dev_utils::BlockTimer;
use crate::errors::{DoitomlError, Result, UnresolvedKind};
use crate::models::{NormalizedTask, PrefixedKey, TaskPrefixes, task_name};
use crate::sources::ConfigSource;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Named = BTreeMap<PrefixedKey, Vec<String>>;

/// What the caller decides before any source is read.
///
/// `None` toggles fall back to the first loaded source, then to their defaults.
#[derive(Debug, Clone)]
pub struct ConfigOptions {
    /// Config files to load first, relative to `cwd`.
    pub config_paths: Vec<PathBuf>,
    /// The working directory relative paths are read against.
    pub cwd: PathBuf,
    /// Whether resolved env is layered over the process env for actions.
    pub update_env: Option<bool>,
    /// Whether load errors are logged instead of returned.
    pub fail_quietly: Option<bool>,
    /// Whether the resolved configuration is checked against the schema.
    pub validate: Option<bool>,
    /// Follow each source's `config_paths` to further sources.
    pub discover_config_paths: bool,
    /// Loaded when `config_paths` is empty.
    pub default_config_path: PathBuf,
    /// Roots accepted in addition to the ones derived from the sources.
    pub extra_safe_paths: Vec<PathBuf>,
    /// A snapshot of the process environment; never written back.
    pub process_env: BTreeMap<String, String>,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_paths: Vec::new(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            update_env: None,
            fail_quietly: None,
            validate: None,
            discover_config_paths: true,
            default_config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            extra_safe_paths: Vec::new(),
            process_env: std::env::vars().collect(),
        }
    }
}

/// The resolved configuration of every discovered source.
#[derive(Debug)]
pub struct Config {
    pub(crate) options: ConfigOptions,
    pub(crate) entry_points: EntryPoints,
    pub(crate) getter_pattern: Regex,
    /// In the order their prefixes were claimed.
    pub(crate) sources: Vec<Arc<ConfigSource>>,
    pub(crate) safe_paths: SafePaths,
    env: BTreeMap<String, String>,
    paths: Named,
    tokens: Named,
    pub(crate) tasks: BTreeMap<TaskPrefixes, NormalizedTask>,
    update_env: bool,
    fail_quietly: bool,
    validate: bool,
}

impl Config {
    /// An empty configuration; nothing is read until [`Config::initialize`].
    ///
    /// # Arguments
    /// * `options` - The caller's choices, made before any source is read.
    /// * `entry_points` - The plugins every stage dispatches to.
    ///
    /// # Returns
    /// An error when the getter pattern cannot be built from the parser names.
    pub fn new(options: ConfigOptions, entry_points: EntryPoints) -> Result<Self> {
        let getter_pattern = getter_pattern(&entry_points.parsers.names())?;
        Ok(Self {
            options,
            entry_points,
            getter_pattern,
            sources: Vec::new(),
            safe_paths: SafePaths::default(),
            env: BTreeMap::new(),
            paths: BTreeMap::new(),
            tokens: BTreeMap::new(),
            tasks: BTreeMap::new(),
            update_env: true,
            fail_quietly: true,
            validate: true,
        })
    }

    /// Runs every resolution stage in order.
    pub fn initialize(&mut self) -> Result<()> {
        {
            let _timer = BlockTimer::new("discovery");
            self.find_config_sources()?;
        }
        {
            let _timer = BlockTimer::new("env");
            self.init_env()?;
        }
        self.read_toggles();
        {
            let _timer = BlockTimer::new("paths");
            self.init_named(config_keys::PATHS, true, UnresolvedKind::Paths)?;
        }
        {
            let _timer = BlockTimer::new("tokens");
            self.init_named(config_keys::TOKENS, false, UnresolvedKind::Tokens)?;
        }
        {
            let _timer = BlockTimer::new("tasks");
            self.init_tasks()?;
        }
        if self.validate {
            let _timer = BlockTimer::new("validate");
            schema::validate(&self.to_dict())?;
        }
        log::info!(
            "Resolved {} tasks from {} sources",
            self.tasks.len(),
            self.sources.len()
        );
        Ok(())
    }

    // --- ACCESSORS ---

    /// The plugin registries this configuration was built with.
    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry_points
    }

    /// The options as the caller passed them.
    pub fn options(&self) -> &ConfigOptions {
        &self.options
    }

    /// Every loaded source, in the order their prefixes were claimed.
    pub fn sources(&self) -> &[Arc<ConfigSource>] {
        &self.sources
    }

    /// The source that claimed `prefix`, if any.
    pub fn source_for_prefix(&self, prefix: &str) -> Option<&Arc<ConfigSource>> {
        self.sources.iter().find(|s| s.prefix() == prefix)
    }

    /// Every claimed prefix, sorted.
    pub fn sorted_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.sources.iter().map(|s| s.prefix().to_string()).collect();
        prefixes.sort();
        prefixes
    }

    /// Resolved env, without the process env.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Resolved absolute paths keyed by `(prefix, name)`.
    pub fn paths(&self) -> &Named {
        &self.paths
    }

    /// Resolved tokens keyed by `(prefix, name)`.
    pub fn tokens(&self) -> &Named {
        &self.tokens
    }

    /// Normalized tasks keyed by their prefixed name parts.
    pub fn tasks(&self) -> &BTreeMap<TaskPrefixes, NormalizedTask> {
        &self.tasks
    }

    /// The roots every resolved path must stay under.
    pub fn safe_paths(&self) -> &SafePaths {
        &self.safe_paths
    }

    /// The effective `update_env` toggle.
    pub fn update_env(&self) -> bool {
        self.update_env
    }

    /// The effective `validate` toggle.
    pub fn validate(&self) -> bool {
        self.validate
    }

    /// The effective `fail_quietly` toggle.
    pub fn fail_quietly(&self) -> bool {
        self.fail_quietly
    }

    /// Whether an error raised at any stage should be logged instead of returned.
    ///
    /// The caller's choice wins; otherwise the first source decides, if one loaded.
    pub fn fail_quietly_on_error(&self) -> bool {
        self.options.fail_quietly.unwrap_or_else(|| {
            self.sources.first().is_some_and(|first| {
                first.toggle(config_keys::FAIL_QUIETLY).unwrap_or(true)
            })
        })
    }

    /// The advisory `log_level` of the first source.
    pub fn log_level(&self) -> Option<&str> {
        self.sources
            .first()
            .and_then(|first| first.raw_config().get(config_keys::LOG_LEVEL))
            .and_then(Value::as_str)
    }

    fn read_toggles(&mut self) {
        let first = self.sources.first().cloned();
        let toggle = |explicit: Option<bool>, key: &str| {
            explicit
                .or_else(|| first.as_ref().and_then(|s| s.toggle(key)))
                .unwrap_or(true)
        };
        self.update_env = toggle(self.options.update_env, config_keys::UPDATE_ENV);
        self.fail_quietly = toggle(self.options.fail_quietly, config_keys::FAIL_QUIETLY);
        self.validate = toggle(self.options.validate, config_keys::VALIDATE);
        log::debug!(
            "update_env={} fail_quietly={} validate={}",
            self.update_env,
            self.fail_quietly,
            self.validate
        );
    }

    // --- ENVIRONMENT ---

    /// Looks up a variable in the process snapshot, then in the resolved env.
    pub fn get_env(&self, key: &str) -> Result<String> {
        self.options
            .process_env
            .get(key)
            .or_else(|| self.env.get(key))
            .cloned()
            .ok_or_else(|| {
                DoitomlError::EnvVar(format!(
                    "{} was not found in any environment, no default given",
                    key
                ))
            })
    }

    /// The environment a task or host function runs with.
    pub fn execution_env(&self, task_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.options.process_env.clone();
        if self.update_env {
            env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env.extend(task_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    fn init_env(&mut self) -> Result<()> {
        let sources = self.sources.clone();
        let mut unresolved: BTreeMap<String, String> = BTreeMap::new();

        for attempt in 0..=RETRIES {
            for source in &sources {
                for (key, value) in source.section(config_keys::ENV)? {
                    if self.env.contains_key(&key) {
                        if attempt == 0 {
                            log::info!("{} env {} is already set, first writer wins", source, key);
                        }
                        continue;
                    }
                    let text = scalar_text(&value).ok_or_else(|| {
                        DoitomlError::Config(format!("{} env {} must be a string, found {}", source, key, value))
                    })?;
                    match self.resolve_one_env(source, &key, &text)? {
                        Some(resolved) => {
                            self.env.insert(key.clone(), resolved);
                            unresolved.remove(&key);
                        }
                        None => {
                            unresolved.insert(key, text);
                        }
                    }
                }
            }
            unresolved.retain(|key, _| !self.env.contains_key(key));
            log::debug!("env attempt {}: {} unresolved", attempt, unresolved.len());
            if unresolved.is_empty() {
                return Ok(());
            }
        }

        Err(DoitomlError::Unresolved {
            kind: UnresolvedKind::EnvironmentVariables,
            details: format!("{:?}", unresolved),
        })
    }

    /// Resolves an env value to a single string.
    ///
    /// Several resolved values are joined with spaces, as task env is. A DSL
    /// that fails yields `Ok(None)` so the value is retried on the next sweep.
    ///
    /// # Returns
    /// A `Config` error when the value resolves to nothing at all.
    fn resolve_one_env(&self, source: &ConfigSource, key: &str, value: &str) -> Result<Option<String>> {
        for (name, dsl) in self.entry_points.dsl.iter() {
            let Some(captures) = dsl.pattern().captures(value) else {
                continue;
            };
            return match dsl.transform_token(self, source, &captures, value) {
                Ok(Some(values)) if values.is_empty() => Err(DoitomlError::Config(format!(
                    "{} env {} resolved to nothing: {}",
                    source, key, value
                ))),
                Ok(Some(values)) => Ok(Some(values.join(" "))),
                Ok(None) => Ok(None),
                Err(err) => {
                    log::debug!("{} env value {} not resolved by {}: {}", source, value, name, err);
                    Ok(None)
                }
            };
        }
        Ok(Some(value.to_string()))
    }

    // --- PATHS AND TOKENS ---

    fn named_mut(&mut self, kind: UnresolvedKind) -> &mut Named {
        match kind {
            UnresolvedKind::Paths => &mut self.paths,
            _ => &mut self.tokens,
        }
    }

    fn init_named(&mut self, section: &str, source_relative: bool, kind: UnresolvedKind) -> Result<()> {
        let sources = self.sources.clone();
        let mut unresolved: Named = BTreeMap::new();

        for attempt in 0..=RETRIES {
            for source in &sources {
                for (name, specs) in source.section(section)? {
                    let key: PrefixedKey = (source.prefix().to_string(), name);
                    if self.named_mut(kind).contains_key(&key) {
                        continue;
                    }
                    let specs = string_list(&specs).ok_or_else(|| {
                        DoitomlError::Config(format!(
                            "{} {} {} must be a list of strings, found {}",
                            source, section, key.1, specs
                        ))
                    })?;

                    let mut found = Vec::new();
                    let mut missing = Vec::new();
                    for spec in specs {
                        match self.resolve_one_path_spec(source, &spec, source_relative, None)? {
                            Some(values) => found.extend(values),
                            None => missing.push(spec),
                        }
                    }

                    if missing.is_empty() {
                        if source_relative {
                            found.sort();
                            found.dedup();
                        }
                        unresolved.remove(&key);
                        self.named_mut(kind).insert(key, found);
                    } else {
                        unresolved.insert(key, missing);
                    }
                }
            }
            log::debug!("{} attempt {}: {} unresolved", kind, attempt, unresolved.len());
            if unresolved.is_empty() {
                return Ok(());
            }
        }

        Err(DoitomlError::Unresolved {
            kind,
            details: format_named(&unresolved),
        })
    }

    /// Resolves one spec through the first matching DSL transformer.
    ///
    /// `Ok(None)` means a transformer asked to retry later. With
    /// `source_relative`, every resulting string is made an absolute path
    /// against `base` (default: the source's directory) and safe-path checked.
    pub fn resolve_one_path_spec(
        &self,
        source: &ConfigSource,
        spec: &str,
        source_relative: bool,
        base: Option<&Path>,
    ) -> Result<Option<Vec<String>>> {
        let base = base.unwrap_or_else(|| source.parent());
        let mut resolved = None;
        for (_name, dsl) in self.entry_points.dsl.iter() {
            if let Some(captures) = dsl.pattern().captures(spec) {
                match dsl.transform_token(self, source, &captures, spec)? {
                    Some(values) => {
                        resolved = Some(values);
                        break;
                    }
                    None => return Ok(None),
                }
            }
        }
        let values = resolved.unwrap_or_else(|| vec![spec.to_string()]);
        if !source_relative {
            return Ok(Some(values));
        }
        values
            .iter()
            .map(|value| self.resolve_safe_path(base, value))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Anchors `value` at `base`, checks it against the safe paths and renders it.
    pub fn resolve_safe_path(&self, base: &Path, value: &str) -> Result<String> {
        let path = normalize_path(&base.join(value));
        self.safe_paths.check(&path)?;
        Ok(to_posix(&path))
    }

    // --- EXPORT ---

    /// The whole resolved configuration as a plain, key-sorted document.
    pub fn to_dict(&self) -> Value {
        let mut templates = Map::new();
        for source in &self.sources {
            if let Some(raw) = source.raw_config().get(config_keys::TEMPLATES) {
                templates.insert(source.prefix().to_string(), raw.clone());
            }
        }
        let tasks: Map<String, Value> = self
            .tasks
            .iter()
            .map(|(prefixes, task)| (task_name(prefixes), task.to_value()))
            .collect();

        let mut dict = Map::new();
        dict.insert(config_keys::ENV.into(), json!(self.env));
        dict.insert(config_keys::PATHS.into(), nest(&self.paths));
        dict.insert(config_keys::TOKENS.into(), nest(&self.tokens));
        dict.insert(config_keys::TEMPLATES.into(), Value::Object(templates));
        dict.insert(config_keys::TASKS.into(), Value::Object(tasks));
        Value::Object(dict)
    }
}

/// Strings pass through, numbers and booleans are printed, the rest is refused.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

/// A list of strings; a lone string counts as a list of one.
pub(crate) fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(text) => Some(vec![text.clone()]),
        Value::Array(items) => items.iter().map(|i| i.as_str().map(str::to_string)).collect(),
        _ => None,
    }
}

fn nest(named: &Named) -> Value {
    let mut nested: BTreeMap<&str, BTreeMap<&str, &Vec<String>>> = BTreeMap::new();
    for ((prefix, name), values) in named {
        nested.entry(prefix.as_str()).or_default().insert(name.as_str(), values);
    }
    json!(nested)
}

fn format_named(named: &Named) -> String {
    let keyed: BTreeMap<String, &Vec<String>> = named
        .iter()
        .map(|((prefix, name), specs)| (format!("{}:{}", prefix, name), specs))
        .collect();
    format!("{:?}", keyed)
}
