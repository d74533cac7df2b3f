// src/core/functions.rs

//! # Host functions
//!
//! The `py` actor, updater and skipper all name a function with a locator of
//! the form `[searchPath:]module.sub:function`. A locator is first looked up
//! in a [`FunctionTable`] of Rust callbacks registered by the embedding
//! program. Failing that, and only when an interpreter is configured, the
//! function is called in a Python subprocess that receives the execution
//! context explicitly (cwd, env, log files, `PYTHONPATH`) and hands its
//! result back as JSON through a temporary file.

use crate::core::config_resolver::Config;
use crate::errors::{DoitomlError, Result};
use crate::models::ExecutionContext;
use crate::sources::ConfigSource;
use crate::system::executor;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::process::{Command as StdCommand, Stdio};
use std::sync::Arc;

lazy_static! {
    static ref LOCATOR_RE: Regex =
        Regex::new(r"^((?P<py_path>[^:]+?):)?((?P<dotted>[^:]+?):)((?P<func_name>[^:]+?))$")
            .unwrap();
}

/// Imports `module`, calls `function(*args, **kwargs)` and writes the JSON result.
const PYTHON_SHIM: &str = r#"
import importlib, json, sys
dotted, func_name, result_path, payload = sys.argv[1:5]
call = json.loads(payload)
result = getattr(importlib.import_module(dotted), func_name)(*call["args"], **call["kwargs"])
try:
    text = json.dumps(result)
except (TypeError, ValueError):
    text = json.dumps(repr(result))
with open(result_path, "w", encoding="utf-8") as fd:
    fd.write(text)
"#;

/// A host callback: positional args, named args and the calling context.
pub type HostFunction = Arc<
    dyn Fn(&[Value], &Map<String, Value>, &ExecutionContext) -> Result<Value> + Send + Sync,
>;

/// A parsed `[searchPath:]module:function` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyLocator {
    /// Prepended to `sys.path` for the interpreter fallback.
    pub search_path: Option<String>,
    /// Dotted module name.
    pub module: String,
    /// Attribute looked up on the module.
    pub function: String,
}

impl PyLocator {
    /// Parses a locator; `None` when `text` is not one.
    pub fn parse(text: &str) -> Option<Self> {
        let captures = LOCATOR_RE.captures(text)?;
        Some(Self {
            search_path: captures.name("py_path").map(|m| m.as_str().to_string()),
            module: captures.name("dotted")?.as_str().to_string(),
            function: captures.name("func_name")?.as_str().to_string(),
        })
    }

    /// The function table key: the locator without its search path.
    pub fn key(&self) -> String {
        format!("{}:{}", self.module, self.function)
    }
}

impl fmt::Display for PyLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(search_path) = &self.search_path {
            write!(f, "{}:", search_path)?;
        }
        write!(f, "{}:{}", self.module, self.function)
    }
}

/// Host callbacks keyed by `module:function`, plus the optional interpreter fallback.
#[derive(Default, Clone)]
pub struct FunctionTable {
    functions: BTreeMap<String, HostFunction>,
    python: Option<String>,
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("python", &self.python)
            .finish()
    }
}

impl FunctionTable {
    /// Registers `function` under `locator`, ignoring any search path.
    ///
    /// # Arguments
    /// * `locator` - `[searchPath:]module:function`, or any other key.
    /// * `function` - Called in place of the interpreter.
    pub fn register(&mut self, locator: &str, function: HostFunction) {
        let key = PyLocator::parse(locator)
            .map(|l| l.key())
            .unwrap_or_else(|| locator.to_string());
        log::debug!("Registered host function '{}'", key);
        self.functions.insert(key, function);
    }

    /// Sets or clears the interpreter used for unregistered locators.
    pub fn set_python(&mut self, interpreter: Option<String>) {
        self.python = interpreter;
    }

    /// Whether a host function is registered for `locator`.
    pub fn contains(&self, locator: &PyLocator) -> bool {
        self.functions.contains_key(&locator.key())
    }

    /// Calls the function named by `locator` within `ctx`.
    pub fn call(
        &self,
        locator: &PyLocator,
        args: &[Value],
        kwargs: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        if let Some(function) = self.functions.get(&locator.key()) {
            log::trace!("Calling host function '{}'", locator);
            return function(args, kwargs, ctx);
        }
        match &self.python {
            Some(interpreter) => call_python(interpreter, locator, args, kwargs, ctx),
            None => Err(DoitomlError::Py(format!(
                "no host function is registered for '{}' and no Python interpreter is configured",
                locator
            ))),
        }
    }
}

fn call_python(
    interpreter: &str,
    locator: &PyLocator,
    args: &[Value],
    kwargs: &Map<String, Value>,
    ctx: &ExecutionContext,
) -> Result<Value> {
    let result_file = tempfile::NamedTempFile::new().map_err(|e| DoitomlError::io("<tempfile>", e))?;
    let payload = serde_json::json!({"args": args, "kwargs": kwargs}).to_string();

    let search_path = ctx
        .cwd
        .join(locator.search_path.as_deref().unwrap_or("."));
    let mut env = ctx.env.clone();
    let mut python_path = vec![search_path];
    if let Some(existing) = env.get("PYTHONPATH") {
        python_path.extend(std::env::split_paths(existing));
    }
    let joined = std::env::join_paths(python_path)
        .map_err(|e| DoitomlError::Py(format!("{}: bad PYTHONPATH: {}", locator, e)))?;
    env.insert("PYTHONPATH".to_string(), joined.to_string_lossy().into_owned());

    let (out, err) = executor::log_streams(ctx)?;
    let status = StdCommand::new(interpreter)
        .arg("-c")
        .arg(PYTHON_SHIM)
        .arg(&locator.module)
        .arg(&locator.function)
        .arg(result_file.path())
        .arg(payload)
        .current_dir(dunce::simplified(&ctx.cwd))
        .env_clear()
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(out)
        .stderr(err)
        .status()
        .map_err(|e| DoitomlError::Py(format!("{}: could not start {}: {}", locator, interpreter, e)))?;

    if !status.success() {
        return Err(DoitomlError::Py(format!("{} failed: {}", locator, status)));
    }
    let text = fs::read_to_string(result_file.path())
        .map_err(|e| DoitomlError::io(result_file.path(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| DoitomlError::Py(format!("{} returned unreadable JSON: {}", locator, e)))
}

/// Any result other than exactly `false` counts as success.
pub fn is_truthy_result(value: &Value) -> bool {
    !matches!(value, Value::Bool(false))
}

/// Resolves the `args` and `kwargs` of a `py` call through the DSL.
///
/// String arguments may fan out; positional ones are flattened into the list,
/// named ones become a list only when they resolve to several values.
pub fn resolve_py_args(
    config: &Config,
    source: &ConfigSource,
    args_kwargs: &Value,
) -> Result<(Vec<Value>, Map<String, Value>)> {
    let empty = Map::new();
    let call = match args_kwargs {
        Value::Null => &empty,
        Value::Object(call) => call,
        other => {
            return Err(DoitomlError::Actor(format!(
                "{} python call had unusable args: {}",
                source, other
            )));
        }
    };

    let mut args = Vec::new();
    let mut unresolved_args = Vec::new();
    match call.get("args") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match resolve_arg(config, source, item)? {
                    Some(values) => args.extend(values),
                    None => unresolved_args.push(item.clone()),
                }
            }
        }
        Some(other) => unresolved_args.push(other.clone()),
    }
    if !unresolved_args.is_empty() {
        return Err(DoitomlError::Actor(format!(
            "{} python call had unresolved positional args: {:?}",
            source, unresolved_args
        )));
    }

    let mut kwargs = Map::new();
    let mut unresolved_kwargs = Map::new();
    match call.get("kwargs") {
        None | Some(Value::Null) => {}
        Some(Value::Object(items)) => {
            for (name, item) in items {
                match resolve_arg(config, source, item)? {
                    Some(mut values) if item.is_string() && values.len() == 1 => {
                        kwargs.insert(name.clone(), values.remove(0));
                    }
                    Some(values) if item.is_string() || item.is_array() => {
                        kwargs.insert(name.clone(), Value::Array(values));
                    }
                    Some(mut values) => {
                        kwargs.insert(name.clone(), values.pop().unwrap_or(Value::Null));
                    }
                    None => {
                        unresolved_kwargs.insert(name.clone(), item.clone());
                    }
                }
            }
        }
        Some(other) => {
            unresolved_kwargs.insert("kwargs".to_string(), other.clone());
        }
    }
    if !unresolved_kwargs.is_empty() {
        return Err(DoitomlError::Actor(format!(
            "{} python call had unresolved named args: {}",
            source,
            Value::Object(unresolved_kwargs)
        )));
    }

    Ok((args, kwargs))
}

/// Strings resolve to one or more strings, lists are flattened, anything else is kept.
fn resolve_arg(config: &Config, source: &ConfigSource, arg: &Value) -> Result<Option<Vec<Value>>> {
    match arg {
        Value::String(spec) => Ok(config
            .resolve_one_path_spec(source, spec, false, None)?
            .map(|values| values.into_iter().map(Value::String).collect())),
        Value::Array(items) => {
            let mut resolved = Vec::new();
            for item in items {
                match resolve_arg(config, source, item)? {
                    Some(values) => resolved.extend(values),
                    None => return Ok(None),
                }
            }
            Ok(Some(resolved))
        }
        other => Ok(Some(vec![other.clone()])),
    }
}

/// A `{locator: {args, kwargs}}` call with resolved arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct PyCall {
    /// The function to call.
    pub locator: PyLocator,
    /// Resolved positional arguments.
    pub args: Vec<Value>,
    /// Resolved named arguments.
    pub kwargs: Map<String, Value>,
}

impl PyCall {
    /// Reads the single `locator: args_kwargs` entry of `value` without resolving it.
    pub fn split(value: &Value) -> Option<(PyLocator, &Value)> {
        let map = value.as_object()?;
        if map.len() != 1 {
            return None;
        }
        let (locator, args_kwargs) = map.iter().next()?;
        Some((PyLocator::parse(locator)?, args_kwargs))
    }

    /// Parses `value` and resolves its arguments against `config`.
    pub fn resolve(config: &Config, source: &ConfigSource, value: &Value) -> Result<Self> {
        let (locator, args_kwargs) = Self::split(value).ok_or_else(|| {
            DoitomlError::Py(format!(
                "{} expected a single `module:function` entry, found {}",
                source, value
            ))
        })?;
        let (args, kwargs) = resolve_py_args(config, source, args_kwargs)?;
        Ok(Self {
            locator,
            args,
            kwargs,
        })
    }

    /// Reads a call whose arguments were already resolved.
    pub fn from_resolved(value: &Value) -> Result<Self> {
        let (locator, args_kwargs) = Self::split(value)
            .ok_or_else(|| DoitomlError::Py(format!("not a python call: {}", value)))?;
        let args = args_kwargs
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let kwargs = args_kwargs
            .get("kwargs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            locator,
            args,
            kwargs,
        })
    }

    /// The call in its exported `{locator: {args, kwargs}}` shape.
    pub fn to_value(&self) -> Value {
        let mut args_kwargs = Map::new();
        args_kwargs.insert("args".to_string(), Value::Array(self.args.clone()));
        args_kwargs.insert("kwargs".to_string(), Value::Object(self.kwargs.clone()));
        let mut call = Map::new();
        call.insert(self.locator.to_string(), Value::Object(args_kwargs));
        Value::Object(call)
    }

    /// Makes the call.
    ///
    /// # Returns
    /// The function's result, or a `Py` error when nothing can serve it.
    pub fn invoke(&self, functions: &FunctionTable, ctx: &ExecutionContext) -> Result<Value> {
        functions.call(&self.locator, &self.args, &self.kwargs, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogMode, LogPaths};
    use serde_json::json;
    use std::path::PathBuf;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
            log_paths: LogPaths::default(),
            log_mode: LogMode::Write,
        }
    }

    #[test]
    fn parses_locators_with_and_without_search_path() {
        let plain = PyLocator::parse("pkg.tasks:build").unwrap();
        assert_eq!(plain.search_path, None);
        assert_eq!(plain.key(), "pkg.tasks:build");

        let pathed = PyLocator::parse("scripts:pkg.tasks:build").unwrap();
        assert_eq!(pathed.search_path.as_deref(), Some("scripts"));
        assert_eq!(pathed.to_string(), "scripts:pkg.tasks:build");

        assert!(PyLocator::parse("no_function").is_none());
    }

    #[test]
    fn registered_callbacks_are_called_with_resolved_arguments() {
        let mut table = FunctionTable::default();
        table.register(
            "scripts:mod:add",
            Arc::new(|args, kwargs, _ctx| {
                let total: i64 = args.iter().filter_map(Value::as_i64).sum();
                let extra = kwargs.get("extra").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(total + extra))
            }),
        );
        let call = PyCall::from_resolved(&json!({"mod:add": {"args": [1, 2], "kwargs": {"extra": 3}}}))
            .unwrap();
        assert_eq!(call.invoke(&table, &ctx()).unwrap(), json!(6));
    }

    #[test]
    fn missing_functions_without_interpreter_fail() {
        let table = FunctionTable::default();
        let locator = PyLocator::parse("mod:missing").unwrap();
        let err = table.call(&locator, &[], &Map::new(), &ctx()).err();
        assert!(matches!(err, Some(DoitomlError::Py(_))));
    }

    #[test]
    fn only_false_is_falsy() {
        assert!(!is_truthy_result(&json!(false)));
        for value in [json!(null), json!(0), json!(""), json!(true), json!([])] {
            assert!(is_truthy_result(&value));
        }
    }
}
