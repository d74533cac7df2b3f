// src/core/updaters.rs

use crate::core::config_resolver::Config;
use crate::core::entry_points::Plugin;
use crate::core::functions::{FunctionTable, PyCall, is_truthy_result};
use crate::errors::{DoitomlError, Result};
use crate::models::{ExecutionContext, UptodateCheck};
use crate::sources::ConfigSource;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const CONFIG_CHANGED_KEY: &str = "_config_changed";
const RUN_ONCE_KEY: &str = "run-once";

/// Builds up-to-date checks from `{name: args}` entries of a task's `uptodate`.
pub trait Updater: Plugin + fmt::Debug {
    /// Resolves the arguments while the configuration is built.
    fn transform_uptodate(&self, config: &Config, source: &ConfigSource, args: &Value)
    -> Result<Value>;

    /// Builds the check a runner evaluates before running the task.
    fn get_update_function(&self, args: &Value, ctx: &ExecutionContext) -> Result<UptodateCheck>;
}

/// Resolves every string inside `value`, keeping its shape.
fn resolve_value(config: &Config, source: &ConfigSource, value: &Value) -> Result<Option<Value>> {
    Ok(match value {
        Value::String(spec) => config
            .resolve_one_path_spec(source, spec, false, None)?
            .map(|mut values| {
                if values.len() == 1 {
                    Value::String(values.remove(0))
                } else {
                    Value::Array(values.into_iter().map(Value::String).collect())
                }
            }),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                match (item, resolve_value(config, source, item)?) {
                    (Value::String(_), Some(Value::Array(many))) => resolved.extend(many),
                    (_, Some(one)) => resolved.push(one),
                    (_, None) => return Ok(None),
                }
            }
            Some(Value::Array(resolved))
        }
        Value::Object(entries) => {
            let mut resolved = Map::new();
            for (key, item) in entries {
                match resolve_value(config, source, item)? {
                    Some(one) => {
                        resolved.insert(key.clone(), one);
                    }
                    None => return Ok(None),
                }
            }
            Some(Value::Object(resolved))
        }
        other => Some(other.clone()),
    })
}

/// Up to date while the resolved arguments hash to the last recorded digest.
#[derive(Debug, Default)]
pub struct ConfigChanged;

impl Plugin for ConfigChanged {}

impl Updater for ConfigChanged {
    fn transform_uptodate(
        &self,
        config: &Config,
        source: &ConfigSource,
        args: &Value,
    ) -> Result<Value> {
        resolve_value(config, source, args)?.ok_or_else(|| {
            DoitomlError::Updater(format!("{} config_changed had unresolved values: {}", source, args))
        })
    }

    fn get_update_function(&self, args: &Value, _ctx: &ExecutionContext) -> Result<UptodateCheck> {
        // serde_json maps are sorted, so this is canonical.
        let canonical = serde_json::to_string(args)
            .map_err(|e| DoitomlError::Updater(format!("cannot serialize {}: {}", args, e)))?;
        let digest = blake3::hash(canonical.as_bytes()).to_hex().to_string();
        let saves = BTreeMap::from([(CONFIG_CHANGED_KEY.to_string(), digest.clone())]);
        Ok(UptodateCheck::new(
            format!("config_changed {}", digest),
            saves,
            move |history| Ok(history.values.get(CONFIG_CHANGED_KEY) == Some(&digest)),
        ))
    }
}

/// Up to date once the task has succeeded.
#[derive(Debug, Default)]
pub struct RunOnce;

impl Plugin for RunOnce {}

impl Updater for RunOnce {
    fn transform_uptodate(
        &self,
        _config: &Config,
        _source: &ConfigSource,
        _args: &Value,
    ) -> Result<Value> {
        Ok(Value::Null)
    }

    fn get_update_function(&self, _args: &Value, _ctx: &ExecutionContext) -> Result<UptodateCheck> {
        let saves = BTreeMap::from([(RUN_ONCE_KEY.to_string(), "true".to_string())]);
        Ok(UptodateCheck::new("run_once", saves, |history| {
            Ok(history.values.contains_key(RUN_ONCE_KEY))
        }))
    }
}

/// Up to date unless the host function returns `false`.
#[derive(Debug)]
pub struct PyUpdater {
    functions: Arc<FunctionTable>,
}

impl PyUpdater {
    /// An updater calling into `functions`.
    pub fn new(functions: Arc<FunctionTable>) -> Self {
        Self { functions }
    }
}

impl Plugin for PyUpdater {}

impl Updater for PyUpdater {
    fn transform_uptodate(
        &self,
        config: &Config,
        source: &ConfigSource,
        args: &Value,
    ) -> Result<Value> {
        Ok(PyCall::resolve(config, source, args)?.to_value())
    }

    fn get_update_function(&self, args: &Value, ctx: &ExecutionContext) -> Result<UptodateCheck> {
        let call = PyCall::from_resolved(args)?;
        let functions = Arc::clone(&self.functions);
        let ctx = ctx.clone();
        Ok(UptodateCheck::new(
            format!("py {}", call.locator),
            BTreeMap::new(),
            move |_history| Ok(is_truthy_result(&call.invoke(&functions, &ctx)?)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogMode, LogPaths, TaskHistory};
    use serde_json::json;
    use std::path::PathBuf;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
            log_paths: LogPaths::default(),
            log_mode: LogMode::Append,
        }
    }

    #[test]
    fn config_changed_compares_digests() {
        let check = ConfigChanged
            .get_update_function(&json!({"b": 1, "a": ["x"]}), &ctx())
            .unwrap();
        assert!(!check.is_uptodate(&TaskHistory::default()).unwrap());

        let history = TaskHistory {
            succeeded: true,
            values: check.saves.clone(),
        };
        assert!(check.is_uptodate(&history).unwrap());

        let changed = ConfigChanged
            .get_update_function(&json!({"b": 2, "a": ["x"]}), &ctx())
            .unwrap();
        assert!(!changed.is_uptodate(&history).unwrap());
    }

    #[test]
    fn run_once_is_fresh_after_first_save() {
        let check = RunOnce.get_update_function(&Value::Null, &ctx()).unwrap();
        assert!(!check.is_uptodate(&TaskHistory::default()).unwrap());
        let history = TaskHistory {
            succeeded: true,
            values: check.saves.clone(),
        };
        assert!(check.is_uptodate(&history).unwrap());
    }

    #[test]
    fn py_updater_calls_the_host_function() {
        let mut table = FunctionTable::default();
        table.register("checks:fresh", Arc::new(|_args, kwargs, _ctx| {
            Ok(kwargs.get("fresh").cloned().unwrap_or(Value::Bool(false)))
        }));
        let updater = PyUpdater::new(Arc::new(table));
        let stale = json!({"checks:fresh": {"args": [], "kwargs": {"fresh": false}}});
        let fresh = json!({"checks:fresh": {"args": [], "kwargs": {"fresh": "yes"}}});
        let history = TaskHistory::default();
        assert!(!updater.get_update_function(&stale, &ctx()).unwrap().is_uptodate(&history).unwrap());
        assert!(updater.get_update_function(&fresh, &ctx()).unwrap().is_uptodate(&history).unwrap());
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use crate::models::{LogMode, LogPaths};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn digest(args: &Value) -> String {
        let ctx = ExecutionContext {
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
            log_paths: LogPaths::default(),
            log_mode: LogMode::Append,
        };
        ConfigChanged
            .get_update_function(args, &ctx)
            .map(|check| check.saves.get(CONFIG_CHANGED_KEY).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    proptest! {
        /// Property: the digest ignores the order keys were declared in
        #[test]
        fn config_changed_digest_ignores_key_order(
            entries in prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,12}", 1..6),
        ) {
            let forward: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let backward: Map<String, Value> = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();

            let first = digest(&Value::Object(forward));
            prop_assert!(!first.is_empty());
            prop_assert_eq!(first, digest(&Value::Object(backward)));
        }

        /// Property: changing any value changes the digest
        #[test]
        fn config_changed_digest_tracks_values(
            key in "[a-z]{1,8}",
            before in "[a-z]{1,8}",
            after in "[a-z]{1,8}",
        ) {
            prop_assume!(before != after);
            let mut old = Map::new();
            old.insert(key.clone(), Value::String(before));
            let mut new = Map::new();
            new.insert(key, Value::String(after));
            prop_assert_ne!(digest(&Value::Object(old)), digest(&Value::Object(new)));
        }
    }
}
