// src/core/compiler.rs

//! # Task compiler
//!
//! Lowers each source's raw `tasks` tree, after template expansion, into the
//! flat map of [`NormalizedTask`]s keyed by prefix tuple. Skips are decided
//! before a node is looked at any further, so a skipped subtree may be
//! malformed without raising anything.

use crate::constants::{NAME, config_keys, meta_keys, task_keys};
use crate::core::config_resolver::{Config, scalar_text, string_list};
use crate::core::skippers::should_skip;
use crate::errors::{DoitomlError, Result, UnresolvedKind};
use crate::models::{
    DoitomlMeta, LogPaths, NormalizedTask, TaskAction, TaskPrefixes, Uptodate, task_name,
};
use crate::sources::ConfigSource;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Task keys with a meaning of their own; everything else passes through.
const KNOWN_TASK_KEYS: &[&str] = &[
    task_keys::ACTIONS,
    task_keys::FILE_DEP,
    task_keys::TARGETS,
    task_keys::CLEAN,
    task_keys::TASK_DEP,
    task_keys::UPTODATE,
    task_keys::META,
    task_keys::DOC,
    task_keys::TITLE,
    task_keys::VERBOSITY,
    task_keys::NAME,
];

impl Config {
    /// Normalizes the tasks of every source, in claim order.
    pub(crate) fn init_tasks(&mut self) -> Result<()> {
        let sources = self.sources.clone();
        for source in &sources {
            let mut raw_tasks = source.section(config_keys::TASKS)?;
            self.expand_templates(source, &mut raw_tasks)?;

            let mut found = Vec::new();
            self.resolve_task_or_group(
                source,
                vec![source.prefix().to_string()],
                &Value::Object(raw_tasks),
                &mut found,
            )?;

            for (prefixes, task) in found {
                if self.tasks.contains_key(&prefixes) {
                    return Err(DoitomlError::Config(format!(
                        "{} cannot claim {}: already defined",
                        source,
                        task_name(&prefixes)
                    )));
                }
                self.tasks.insert(prefixes, task);
            }
        }
        Ok(())
    }

    /// Merges `templates.<kind>.tasks.<name>` expansions into `tasks`.
    fn expand_templates(&self, source: &ConfigSource, tasks: &mut Map<String, Value>) -> Result<()> {
        for (kind, block) in source.section(config_keys::TEMPLATES)? {
            let templater = self.entry_points.templaters.get(&kind).ok_or_else(|| {
                DoitomlError::NoTemplater {
                    source_desc: source.to_string(),
                    kind: kind.clone(),
                    known: self.entry_points.templaters.names(),
                }
            })?;
            let templated = block
                .get(config_keys::TASKS)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            for (name, template) in templated {
                match templater.transform_task(self, source, &name, &template)? {
                    Value::Array(items) => {
                        for item in items {
                            let item_name = item
                                .get(task_keys::NAME)
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .ok_or_else(|| {
                                    DoitomlError::Templater(format!(
                                        "{} template {} produced a task without a name: {}",
                                        source, name, item
                                    ))
                                })?;
                            tasks.insert(item_name, item);
                        }
                    }
                    expanded => {
                        tasks.insert(name, expanded);
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_task_or_group(
        &self,
        source: &Arc<ConfigSource>,
        prefixes: TaskPrefixes,
        node: &Value,
        found: &mut Vec<(TaskPrefixes, NormalizedTask)>,
    ) -> Result<()> {
        let map = node.as_object().ok_or_else(|| {
            DoitomlError::Config(format!(
                "{} task {} is not a mapping: {}",
                source,
                task_name(&prefixes),
                node
            ))
        })?;

        let skip = map
            .get(task_keys::META)
            .and_then(|meta| meta.get(NAME))
            .and_then(|doitoml| doitoml.get(meta_keys::SKIP));
        if let Some(skip) = skip {
            if should_skip(self, source, skip)? {
                log::info!("{} skipping {}", source, task_name(&prefixes));
                return Ok(());
            }
        }

        if map.contains_key(task_keys::ACTIONS) {
            let task = self.resolve_one_task(source, &prefixes, map)?;
            found.push((prefixes, task));
            return Ok(());
        }

        for (child, subnode) in map {
            if child == task_keys::META {
                continue;
            }
            let mut child_prefixes = prefixes.clone();
            child_prefixes.push(child.clone());
            self.resolve_task_or_group(source, child_prefixes, subnode, found)?;
        }
        Ok(())
    }

    fn resolve_one_task(
        &self,
        source: &Arc<ConfigSource>,
        prefixes: &[String],
        task: &Map<String, Value>,
    ) -> Result<NormalizedTask> {
        let name = task_name(prefixes);
        let mut unresolved: Vec<String> = Vec::new();

        let raw_actions = task
            .get(task_keys::ACTIONS)
            .and_then(Value::as_array)
            .ok_or_else(|| DoitomlError::Task(format!("{} task {} actions must be a list", source, name)))?;
        let mut actions = Vec::with_capacity(raw_actions.len());
        for action in raw_actions {
            match action {
                Value::String(line) => actions.push(TaskAction::Shell(line.clone())),
                Value::Array(tokens) => {
                    let mut resolved = Vec::new();
                    for token in tokens {
                        let spec = scalar_text(token).ok_or_else(|| {
                            DoitomlError::Task(format!(
                                "{} task {} has an unusable token: {}",
                                source, name, token
                            ))
                        })?;
                        match self.resolve_one_path_spec(source, &spec, false, None)? {
                            Some(values) => resolved.extend(values),
                            None => unresolved.push(spec),
                        }
                    }
                    actions.push(TaskAction::Tokens(resolved));
                }
                Value::Object(_) => actions.extend(self.resolve_actor_action(source, action)?),
                other => {
                    return Err(DoitomlError::Task(format!(
                        "{} task {} has an unrecognized action: {}",
                        source, name, other
                    )));
                }
            }
        }

        let mut relative: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for &field in task_keys::RELATIVE_LISTS {
            let mut resolved = Vec::new();
            for spec in self.task_strings(source, &name, task, field)? {
                match self.resolve_one_path_spec(source, &spec, true, None)? {
                    Some(values) => resolved.extend(values),
                    None => unresolved.push(spec),
                }
            }
            relative.insert(field, resolved);
        }

        if !unresolved.is_empty() {
            return Err(DoitomlError::Unresolved {
                kind: UnresolvedKind::TaskSpecs,
                details: format!("{} task {} had unresolved paths: {:?}", source, name, unresolved),
            });
        }

        let mut meta = match task.get(task_keys::META) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(meta)) => meta.clone(),
            Some(other) => {
                return Err(DoitomlError::Task(format!(
                    "{} task {} meta must be a mapping, found {}",
                    source, name, other
                )));
            }
        };
        let doitoml = self.resolve_meta(source, &name, meta.remove(NAME).as_ref())?;

        let extra: Map<String, Value> = task
            .iter()
            .filter(|(key, _)| !KNOWN_TASK_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(NormalizedTask {
            actions,
            file_dep: relative.remove(task_keys::FILE_DEP).unwrap_or_default(),
            targets: relative.remove(task_keys::TARGETS).unwrap_or_default(),
            clean: relative.remove(task_keys::CLEAN).unwrap_or_default(),
            task_dep: self.task_strings(source, &name, task, task_keys::TASK_DEP)?,
            uptodate: self.resolve_uptodate(source, &name, task.get(task_keys::UPTODATE))?,
            doc: self.task_text(source, &name, task, task_keys::DOC)?,
            title: self.task_text(source, &name, task, task_keys::TITLE)?,
            verbosity: match task.get(task_keys::VERBOSITY) {
                None | Some(Value::Null) => None,
                Some(value) => Some(value.as_i64().ok_or_else(|| {
                    DoitomlError::Task(format!(
                        "{} task {} verbosity must be an integer, found {}",
                        source, name, value
                    ))
                })?),
            },
            meta,
            extra,
            doitoml,
        })
    }

    fn task_strings(
        &self,
        source: &ConfigSource,
        name: &str,
        task: &Map<String, Value>,
        field: &str,
    ) -> Result<Vec<String>> {
        match task.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => string_list(value).ok_or_else(|| {
                DoitomlError::Task(format!(
                    "{} task {} {} must be a list of strings, found {}",
                    source, name, field, value
                ))
            }),
        }
    }

    fn task_text(
        &self,
        source: &ConfigSource,
        name: &str,
        task: &Map<String, Value>,
        field: &str,
    ) -> Result<Option<String>> {
        match task.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(other) => Err(DoitomlError::Task(format!(
                "{} task {} {} must be a string, found {}",
                source, name, field, other
            ))),
        }
    }

    /// Hands a mapping-shaped action to the first actor that knows it.
    fn resolve_actor_action(&self, source: &ConfigSource, action: &Value) -> Result<Vec<TaskAction>> {
        for (actor_name, actor) in self.entry_points.actors.iter() {
            if actor.knows(action) {
                return Ok(actor
                    .transform_action(self, source, action)?
                    .into_iter()
                    .map(|transformed| TaskAction::Actor {
                        actor: actor_name.to_string(),
                        action: transformed,
                    })
                    .collect());
            }
        }
        Err(DoitomlError::NoActor {
            source_desc: source.to_string(),
            action: action.to_string(),
            tried: self.entry_points.actors.names(),
        })
    }

    fn resolve_uptodate(
        &self,
        source: &ConfigSource,
        name: &str,
        declared: Option<&Value>,
    ) -> Result<Vec<Uptodate>> {
        let items = match declared {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items.as_slice(),
            Some(single) => std::slice::from_ref(single),
        };
        let mut uptodate = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Bool(value) => uptodate.push(Uptodate::Literal(*value)),
                Value::Object(map) if map.len() == 1 => {
                    let Some((key, args)) = map.iter().next() else {
                        continue;
                    };
                    let updater = self.entry_points.updaters.get(key).ok_or_else(|| {
                        DoitomlError::NoUpdater {
                            source_desc: source.to_string(),
                            uptodate: item.to_string(),
                            known: self.entry_points.updaters.names(),
                        }
                    })?;
                    uptodate.push(Uptodate::Updater {
                        updater: key.clone(),
                        args: updater.transform_uptodate(self, source, args)?,
                    });
                }
                other => {
                    return Err(DoitomlError::Task(format!(
                        "{} task {} has an unrecognized uptodate: {}",
                        source, name, other
                    )));
                }
            }
        }
        Ok(uptodate)
    }

    // --- META ---

    fn resolve_meta(
        &self,
        source: &Arc<ConfigSource>,
        name: &str,
        block: Option<&Value>,
    ) -> Result<DoitomlMeta> {
        let empty = Map::new();
        let block = match block {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(block)) => block,
            Some(other) => {
                return Err(DoitomlError::Config(format!(
                    "{} task {} meta.{} must be a mapping, found {}",
                    source, name, NAME, other
                )));
            }
        };

        let cwd = match block.get(meta_keys::CWD) {
            None | Some(Value::Null) => source.parent().to_path_buf(),
            Some(Value::String(spec)) => self.resolve_single_path(source, name, meta_keys::CWD, spec)?,
            Some(other) => {
                return Err(DoitomlError::Config(format!(
                    "{} task {} cwd must be a string, found {}",
                    source, name, other
                )));
            }
        };

        let mut env = BTreeMap::new();
        if let Some(declared) = block.get(meta_keys::ENV) {
            let declared = declared.as_object().ok_or_else(|| {
                DoitomlError::Config(format!(
                    "{} task {} env must be a mapping, found {}",
                    source, name, declared
                ))
            })?;
            for (key, value) in declared {
                let text = scalar_text(value).ok_or_else(|| {
                    DoitomlError::Config(format!(
                        "{} task {} env {} must be a string, found {}",
                        source, name, key, value
                    ))
                })?;
                let resolved = match self.resolve_one_path_spec(source, &text, false, None) {
                    Ok(Some(values)) => values.join(" "),
                    Ok(None) => {
                        log::warn!("{} task {} env {} is unresolved, using {}", source, name, key, text);
                        text
                    }
                    Err(err) => {
                        log::warn!("{} task {} env {} failed ({}), using {}", source, name, key, err, text);
                        text
                    }
                };
                env.insert(key.clone(), resolved);
            }
        }

        Ok(DoitomlMeta {
            cwd,
            env,
            log: self.resolve_log(source, name, block.get(meta_keys::LOG))?,
            source: Arc::clone(source),
        })
    }

    fn resolve_log(&self, source: &ConfigSource, name: &str, declared: Option<&Value>) -> Result<LogPaths> {
        let bad_log = |detail: String| {
            DoitomlError::Config(format!("{} task {} log {}", source, name, detail))
        };
        let stream = |entry: &Value| -> Result<Option<PathBuf>> {
            match entry {
                Value::Null => Ok(None),
                Value::String(spec) => self.resolve_log_path(source, name, spec).map(Some),
                other => Err(bad_log(format!("entries must be strings or null, found {}", other))),
            }
        };
        match declared {
            None | Some(Value::Null) => Ok(LogPaths::default()),
            Some(Value::String(spec)) => {
                let path = self.resolve_log_path(source, name, spec)?;
                Ok(LogPaths {
                    stdout: Some(path.clone()),
                    stderr: Some(path),
                })
            }
            Some(Value::Array(entries)) => match entries.as_slice() {
                [stdout] => Ok(LogPaths {
                    stdout: stream(stdout)?,
                    stderr: None,
                }),
                [stdout, stderr] => Ok(LogPaths {
                    stdout: stream(stdout)?,
                    stderr: stream(stderr)?,
                }),
                _ => Err(bad_log(format!("must name one or two streams, found {}", entries.len()))),
            },
            Some(other) => Err(bad_log(format!("must be a string or a list, found {}", other))),
        }
    }

    fn resolve_log_path(&self, source: &ConfigSource, name: &str, spec: &str) -> Result<PathBuf> {
        let path = self.resolve_single_path(source, name, meta_keys::LOG, spec)?;
        if path.is_dir() {
            return Err(DoitomlError::Config(format!(
                "{} task {} log path is a directory: {}",
                source,
                name,
                path.display()
            )));
        }
        Ok(path)
    }

    /// A source-relative spec that must resolve to exactly one path.
    fn resolve_single_path(
        &self,
        source: &ConfigSource,
        name: &str,
        field: &str,
        spec: &str,
    ) -> Result<PathBuf> {
        let resolved = self.resolve_one_path_spec(source, spec, true, None)?;
        match resolved.as_deref() {
            Some([one]) => Ok(PathBuf::from(one)),
            _ => Err(DoitomlError::Config(format!(
                "{} task {} {} must resolve to one path: {} gave {:?}",
                source, name, field, spec, resolved
            ))),
        }
    }
}
