// src/core/skippers.rs

//! Skip conditions for tasks and task groups.
//!
//! A literal skip value is tested directly; a single-key mapping is handed to
//! the [`Skipper`] registered under that key. `any`, `all` and `not` recurse
//! through [`should_skip`], so conditions nest freely.

use crate::constants::FALSEY;
use crate::core::config_resolver::Config;
use crate::core::entry_points::Plugin;
use crate::core::functions::{FunctionTable, PyCall, is_truthy_result};
use crate::errors::{DoitomlError, Result};
use crate::models::{ExecutionContext, LogMode, LogPaths};
use crate::sources::ConfigSource;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A `{kind: value}` skip condition.
pub trait Skipper: Plugin + fmt::Debug {
    /// True when the task, or the group it heads, should be dropped.
    fn should_skip(&self, config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool>;
}

/// Evaluates any skip value.
pub fn should_skip(config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
    match skip {
        Value::Null => Ok(false),
        Value::Bool(value) => Ok(*value),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(spec) => {
            let values = config
                .resolve_one_path_spec(source, spec, false, None)?
                .ok_or_else(|| DoitomlError::Skip(format!("{} could not resolve skip {}", source, spec)))?;
            Ok(values.iter().any(|value| is_truthy_text(value)))
        }
        Value::Object(map) if map.len() == 1 => {
            let Some((key, value)) = map.iter().next() else {
                return Ok(false);
            };
            let skipper = config.entry_points().skippers.get(key).ok_or_else(|| {
                DoitomlError::Skip(format!(
                    "{} cannot skip based on `{}`, expected one of {:?}",
                    source,
                    key,
                    config.entry_points().skippers.names()
                ))
            })?;
            skipper.should_skip(config, source, value)
        }
        other => Err(DoitomlError::Skip(format!("{} ambiguous skip: {}", source, other))),
    }
}

/// A resolved skip string is true unless it is one of [`FALSEY`].
fn is_truthy_text(value: &str) -> bool {
    !FALSEY.contains(&value.trim().to_lowercase().as_str())
}

fn members<'a>(source: &ConfigSource, name: &str, skip: &'a Value) -> Result<&'a Vec<Value>> {
    skip.as_array()
        .ok_or_else(|| DoitomlError::Skip(format!("{} Cannot skip `{}`: {}", source, name, skip)))
}

// --- BOOLEAN ALGEBRA ---

/// Skips when any member does.
#[derive(Debug, Default)]
pub struct AnySkipper;

impl Plugin for AnySkipper {}

impl Skipper for AnySkipper {
    fn should_skip(&self, config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
        for member in members(source, "any", skip)? {
            if should_skip(config, source, member)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Skips when every member does.
#[derive(Debug, Default)]
pub struct AllSkipper;

impl Plugin for AllSkipper {}

impl Skipper for AllSkipper {
    fn should_skip(&self, config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
        for member in members(source, "all", skip)? {
            if !should_skip(config, source, member)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Inverts its single condition.
#[derive(Debug, Default)]
pub struct NotSkipper;

impl Plugin for NotSkipper {}

impl Skipper for NotSkipper {
    fn should_skip(&self, config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
        Ok(!should_skip(config, source, skip)?)
    }
}

// --- FILESYSTEM ---

/// True when every entry resolves to at least one path and all of them exist.
/// Any entry that resolves to nothing keeps the task.
#[derive(Debug, Default)]
pub struct ExistsSkipper;

impl Plugin for ExistsSkipper {}

impl Skipper for ExistsSkipper {
    fn should_skip(&self, config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
        let specs: Vec<&str> = match skip {
            Value::String(spec) => vec![spec.as_str()],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().ok_or_else(|| {
                        DoitomlError::Skip(format!("{} Cannot skip `exists`: {}", source, skip))
                    })
                })
                .collect::<Result<_>>()?,
            other => {
                return Err(DoitomlError::Skip(format!(
                    "{} Cannot skip `exists`: {}",
                    source, other
                )));
            }
        };

        if specs.is_empty() {
            return Ok(false);
        }
        for spec in specs {
            let resolved = match config.resolve_one_path_spec(source, spec, true, None)? {
                Some(resolved) if !resolved.is_empty() => resolved,
                _ => return Ok(false),
            };
            if !resolved.iter().all(|path| Path::new(path).exists()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// --- PLATFORM ---

/// The value of a platform attribute, named as Python's `platform` module does.
fn platform_attribute(name: &str) -> Option<String> {
    use std::env::consts::{ARCH, FAMILY, OS};
    let value = match name {
        "system" => match OS {
            "linux" => "Linux".to_string(),
            "macos" => "Darwin".to_string(),
            "windows" => "Windows".to_string(),
            other => {
                let mut chars = other.chars();
                chars
                    .next()
                    .map(|first| first.to_uppercase().chain(chars).collect())
                    .unwrap_or_default()
            }
        },
        "machine" | "arch" => ARCH.to_string(),
        "os" => OS.to_string(),
        "family" => FAMILY.to_string(),
        _ => return None,
    };
    Some(value)
}

/// `{"platform": {"system": "Windows"}}`: the pattern must match at the start.
#[derive(Debug, Default)]
pub struct PlatformSkipper;

impl Plugin for PlatformSkipper {}

impl Skipper for PlatformSkipper {
    fn should_skip(&self, _config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
        let map = skip
            .as_object()
            .ok_or_else(|| DoitomlError::Skip(format!("{} Cannot skip `platform`: {}", source, skip)))?;
        let (key, pattern) = match (map.len(), map.iter().next()) {
            (1, Some(entry)) => entry,
            _ => {
                return Err(DoitomlError::Skip(format!(
                    "{} can only skip based on one `platform`: {}",
                    source, skip
                )));
            }
        };
        let value = platform_attribute(key).ok_or_else(|| {
            DoitomlError::Skip(format!("{} cannot skip based on `platform.{}`", source, key))
        })?;
        let pattern = pattern.as_str().ok_or_else(|| {
            DoitomlError::Skip(format!("{} `platform.{}` needs a pattern: {}", source, key, pattern))
        })?;
        let matcher = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
            DoitomlError::Skip(format!("{} bad `platform.{}` pattern: {}", source, key, e))
        })?;
        Ok(matcher.is_match(&value))
    }
}

// --- HOST FUNCTIONS ---

/// Skips unless the host function returns `false`.
#[derive(Debug)]
pub struct PySkipper {
    functions: Arc<FunctionTable>,
}

impl PySkipper {
    /// A skipper calling into `functions`.
    pub fn new(functions: Arc<FunctionTable>) -> Self {
        Self { functions }
    }
}

impl Plugin for PySkipper {}

impl Skipper for PySkipper {
    fn should_skip(&self, config: &Config, source: &ConfigSource, skip: &Value) -> Result<bool> {
        let call = PyCall::resolve(config, source, skip)?;
        let ctx = ExecutionContext {
            cwd: source.parent().to_path_buf(),
            env: config.execution_env(&BTreeMap::new()),
            log_paths: LogPaths::default(),
            log_mode: LogMode::Write,
        };
        Ok(is_truthy_result(&call.invoke(&self.functions, &ctx)?))
    }
}
