// src/core/task_executor.rs

//! Turns normalized tasks into the records a task runner consumes.
//!
//! Every record owns clones of the data its actions need; nothing here reads
//! process-global state once the records are built.

use crate::constants::NAME;
use crate::core::config_resolver::Config;
use crate::errors::{DoitomlError, Result};
use crate::models::{
    ExecutionContext, LogMode, NormalizedTask, RuntimeAction, TaskAction, TaskGroup, TaskPrefixes,
    TaskRecord, Uptodate, UptodateCheck,
};
use crate::system::executor;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;

// --- Main Public Function ---

/// Groups every task by its first visible prefix segment and builds its record.
pub fn materialize(config: &Config) -> Result<Vec<TaskGroup>> {
    let mut groups = Vec::new();
    for (group, subtasks) in group_tasks(config.tasks()) {
        if group.is_empty() {
            // tasks of the unprefixed source are grouped by their own first segment
            for (subgroup, sub2tasks) in group_tasks(subtasks.iter().map(|(k, v)| (k, *v))) {
                groups.push(build_group(config, subgroup, sub2tasks)?);
            }
        } else {
            groups.push(build_group(config, group, subtasks)?);
        }
    }
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(groups)
}

/// Splits prefix tuples on their first segment.
pub(crate) fn group_tasks<'a, T, I>(tasks: I) -> BTreeMap<String, BTreeMap<TaskPrefixes, &'a T>>
where
    I: IntoIterator<Item = (&'a TaskPrefixes, &'a T)>,
    T: 'a,
{
    let mut groups: BTreeMap<String, BTreeMap<TaskPrefixes, &'a T>> = BTreeMap::new();
    for (prefixes, task) in tasks {
        let Some((first, rest)) = prefixes.split_first() else {
            continue;
        };
        groups.entry(first.clone()).or_default().insert(rest.to_vec(), task);
    }
    groups
}

// --- Internal Builders ---

fn build_group(
    config: &Config,
    name: String,
    subtasks: BTreeMap<TaskPrefixes, &NormalizedTask>,
) -> Result<TaskGroup> {
    let mut tasks = Vec::with_capacity(subtasks.len());
    for (rest, task) in &subtasks {
        tasks.push(build_record(config, &name, rest, task)?);
    }
    log::debug!("Built task group '{}' with {} tasks", name, tasks.len());
    Ok(TaskGroup {
        doc: format!("... {} {} tasks", tasks.len(), name),
        name,
        tasks,
    })
}

fn build_record(config: &Config, group: &str, rest: &[String], task: &NormalizedTask) -> Result<TaskRecord> {
    let meta = &task.doitoml;
    let context = ExecutionContext {
        cwd: meta.cwd.clone(),
        env: config.execution_env(&meta.env),
        log_paths: meta.log.clone(),
        log_mode: LogMode::Append,
    };

    let mut actions = vec![prepare_action(&context)];
    for action in &task.actions {
        actions.extend(runtime_actions(config, task, action, &context)?);
    }

    let mut uptodate = Vec::with_capacity(task.uptodate.len());
    for declared in &task.uptodate {
        uptodate.push(uptodate_check(config, task, declared, &context)?);
    }

    let mut record_meta = task.meta.clone();
    record_meta.insert(NAME.into(), meta.to_value());

    Ok(TaskRecord {
        group: group.to_string(),
        name: rest.join(":"),
        actions,
        file_dep: task.file_dep.clone(),
        targets: task.targets.clone(),
        clean: task.clean.clone(),
        task_dep: task.task_dep.clone(),
        uptodate,
        doc: task.doc.clone(),
        title: task.title.clone(),
        verbosity: task.verbosity,
        meta: Value::Object(record_meta),
        context,
    })
}

/// Creates the working directory and starts every log file empty.
fn prepare_action(context: &ExecutionContext) -> RuntimeAction {
    let cwd = context.cwd.clone();
    let log_paths = context.log_paths.clone();
    RuntimeAction::new(format!("prepare {}", cwd.display()), move || {
        fs::create_dir_all(&cwd).map_err(|e| DoitomlError::io(&cwd, e))?;
        executor::prepare_logs(&log_paths)?;
        Ok(true)
    })
}

fn runtime_actions(
    config: &Config,
    task: &NormalizedTask,
    action: &TaskAction,
    context: &ExecutionContext,
) -> Result<Vec<RuntimeAction>> {
    match action {
        TaskAction::Shell(line) => {
            let line = line.clone();
            let ctx = context.clone();
            Ok(vec![RuntimeAction::new(line.clone(), move || {
                Ok(executor::run_shell(&line, &ctx)?)
            })])
        }
        TaskAction::Tokens(tokens) => {
            let tokens = tokens.clone();
            let ctx = context.clone();
            Ok(vec![RuntimeAction::new(tokens.join(" "), move || {
                Ok(executor::run_tokens(&tokens, &ctx)?)
            })])
        }
        TaskAction::Actor { actor, action } => {
            let handler = config.entry_points().actors.get(actor).ok_or_else(|| {
                DoitomlError::NoActor {
                    source_desc: task.doitoml.source.to_string(),
                    action: action.to_string(),
                    tried: config.entry_points().actors.names(),
                }
            })?;
            handler.perform_action(action, context)
        }
    }
}

fn uptodate_check(
    config: &Config,
    task: &NormalizedTask,
    declared: &Uptodate,
    context: &ExecutionContext,
) -> Result<UptodateCheck> {
    match declared {
        Uptodate::Literal(value) => Ok(UptodateCheck::constant(*value)),
        Uptodate::Updater { updater, args } => {
            let handler = config.entry_points().updaters.get(updater).ok_or_else(|| {
                DoitomlError::NoUpdater {
                    source_desc: task.doitoml.source.to_string(),
                    uptodate: declared.to_value().to_string(),
                    known: config.entry_points().updaters.names(),
                }
            })?;
            handler.get_update_function(args, context)
        }
    }
}
