// src/core/schema.rs

//! Structural validation of the exported configuration.
//!
//! Checks run over the plain `to_dict()` document, so anything a plugin put
//! there is held to the same shape as the built-in fields. Every violation is
//! collected before failing.

use crate::constants::{NAME, config_keys, meta_keys, task_keys};
use crate::errors::{DoitomlError, Result};
use serde_json::{Map, Value};

/// Collects `#/data/path: message` lines.
#[derive(Debug, Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, path: &str, message: impl AsRef<str>) {
        self.0.push(format!("#{}: {}", path, message.as_ref()));
    }
}

/// Validates an exported configuration, reporting every violation at once.
pub fn validate(dict: &Value) -> Result<()> {
    let mut found = Violations::default();
    let Some(root) = expect_object(dict, "", &mut found) else {
        return Err(DoitomlError::Schema(found.0.join("\n")));
    };

    if let Some(env) = root.get(config_keys::ENV) {
        if let Some(env) = expect_object(env, "/env", &mut found) {
            for (key, value) in env {
                if !value.is_string() {
                    found.push(&format!("/env/{}", key), "must be a string");
                }
            }
        }
    }

    for section in [config_keys::PATHS, config_keys::TOKENS] {
        let Some(by_prefix) = root.get(section) else {
            continue;
        };
        let Some(by_prefix) = expect_object(by_prefix, &format!("/{}", section), &mut found) else {
            continue;
        };
        for (prefix, named) in by_prefix {
            let here = format!("/{}/{}", section, prefix);
            if let Some(named) = expect_object(named, &here, &mut found) {
                for (name, values) in named {
                    check_string_list(values, &format!("{}/{}", here, name), &mut found);
                }
            }
        }
    }

    if let Some(tasks) = root.get(config_keys::TASKS) {
        if let Some(tasks) = expect_object(tasks, "/tasks", &mut found) {
            for (name, task) in tasks {
                check_task(task, &format!("/tasks/{}", name), &mut found);
            }
        }
    }

    if found.0.is_empty() {
        Ok(())
    } else {
        log::debug!("{} schema violations", found.0.len());
        Err(DoitomlError::Schema(found.0.join("\n")))
    }
}

fn expect_object<'a>(value: &'a Value, path: &str, found: &mut Violations) -> Option<&'a Map<String, Value>> {
    let object = value.as_object();
    if object.is_none() {
        found.push(path, format!("must be an object, found {}", value));
    }
    object
}

fn check_string_list(value: &Value, path: &str, found: &mut Violations) {
    match value.as_array() {
        Some(items) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    found.push(&format!("{}/{}", path, i), "must be a string");
                }
            }
        }
        None => found.push(path, "must be a list of strings"),
    }
}

fn check_task(task: &Value, path: &str, found: &mut Violations) {
    let Some(task) = expect_object(task, path, found) else {
        return;
    };

    match task.get(task_keys::ACTIONS).and_then(Value::as_array) {
        Some(actions) => {
            for (i, action) in actions.iter().enumerate() {
                let ok = match action {
                    Value::String(_) => true,
                    Value::Array(tokens) => tokens.iter().all(Value::is_string),
                    Value::Object(map) => map.len() == 1,
                    _ => false,
                };
                if !ok {
                    found.push(
                        &format!("{}/{}/{}", path, task_keys::ACTIONS, i),
                        "must be a string, a list of strings or a single-key object",
                    );
                }
            }
        }
        None => found.push(&format!("{}/{}", path, task_keys::ACTIONS), "must be a list"),
    }

    for field in [task_keys::FILE_DEP, task_keys::TARGETS, task_keys::CLEAN, task_keys::TASK_DEP] {
        if let Some(value) = task.get(field) {
            check_string_list(value, &format!("{}/{}", path, field), found);
        }
    }

    if let Some(verbosity) = task.get(task_keys::VERBOSITY) {
        if !verbosity.as_i64().is_some_and(|v| (1..=3).contains(&v)) {
            found.push(
                &format!("{}/{}", path, task_keys::VERBOSITY),
                format!("must be an integer from 1 to 3, found {}", verbosity),
            );
        }
    }

    let meta_path = format!("{}/{}/{}", path, task_keys::META, NAME);
    let Some(meta) = task.get(task_keys::META).and_then(|meta| meta.get(NAME)) else {
        found.push(&meta_path, "is required");
        return;
    };
    let Some(meta) = expect_object(meta, &meta_path, found) else {
        return;
    };
    for key in [meta_keys::CWD, meta_keys::SOURCE] {
        if !meta.get(key).is_some_and(Value::is_string) {
            found.push(&format!("{}/{}", meta_path, key), "must be a string");
        }
    }
    if !meta.get(meta_keys::ENV).is_some_and(Value::is_object) {
        found.push(&format!("{}/{}", meta_path, meta_keys::ENV), "must be an object");
    }
    let log_ok = meta
        .get(meta_keys::LOG)
        .and_then(Value::as_array)
        .is_some_and(|log| log.len() == 2 && log.iter().all(|e| e.is_null() || e.is_string()));
    if !log_ok {
        found.push(
            &format!("{}/{}", meta_path, meta_keys::LOG),
            "must be a pair of paths or nulls",
        );
    }
}
