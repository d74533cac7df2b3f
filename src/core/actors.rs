// src/core/actors.rs

use crate::core::config_resolver::Config;
use crate::core::entry_points::Plugin;
use crate::core::functions::{FunctionTable, PyCall, is_truthy_result};
use crate::errors::{DoitomlError, Result};
use crate::models::{ExecutionContext, RuntimeAction};
use crate::sources::ConfigSource;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Handles one shape of mapping-valued task action.
pub trait Actor: Plugin + fmt::Debug {
    /// Whether this actor claims `action`.
    fn knows(&self, action: &Value) -> bool;

    /// Resolves the action's arguments while the configuration is built.
    fn transform_action(
        &self,
        config: &Config,
        source: &ConfigSource,
        action: &Value,
    ) -> Result<Vec<Value>>;

    /// Turns a transformed action into self-contained runtime steps.
    fn perform_action(&self, action: &Value, ctx: &ExecutionContext) -> Result<Vec<RuntimeAction>>;
}

/// Runs `{"py": {"[path:]module:function": {"args": [...], "kwargs": {...}}}}`.
#[derive(Debug)]
pub struct PyActor {
    functions: Arc<FunctionTable>,
}

impl PyActor {
    /// An actor calling into `functions`, or the interpreter fallback.
    pub fn new(functions: Arc<FunctionTable>) -> Self {
        Self { functions }
    }
}

impl Plugin for PyActor {}

fn py_call(action: &Value) -> Option<&Value> {
    action.as_object().and_then(|map| map.get("py"))
}

impl Actor for PyActor {
    fn knows(&self, action: &Value) -> bool {
        py_call(action).is_some_and(|call| PyCall::split(call).is_some())
    }

    fn transform_action(
        &self,
        config: &Config,
        source: &ConfigSource,
        action: &Value,
    ) -> Result<Vec<Value>> {
        let call = py_call(action)
            .ok_or_else(|| DoitomlError::Actor(format!("{} not a py action: {}", source, action)))?;
        let resolved = PyCall::resolve(config, source, call)?;
        let mut transformed = Map::new();
        transformed.insert("py".to_string(), resolved.to_value());
        Ok(vec![Value::Object(transformed)])
    }

    fn perform_action(&self, action: &Value, ctx: &ExecutionContext) -> Result<Vec<RuntimeAction>> {
        let call = py_call(action)
            .ok_or_else(|| DoitomlError::Actor(format!("not a py action: {}", action)))?;
        let call = PyCall::from_resolved(call)?;
        let functions = Arc::clone(&self.functions);
        let ctx = ctx.clone();
        Ok(vec![RuntimeAction::new(
            format!("py {}", call.locator),
            move || Ok(is_truthy_result(&call.invoke(&functions, &ctx)?)),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogMode, LogPaths};
    use serde_json::json;
    use std::collections::BTreeMap;
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
    fn knows_only_well_formed_py_actions() {
        let actor = PyActor::new(Arc::new(FunctionTable::default()));
        assert!(actor.knows(&json!({"py": {"mod:func": {}}})));
        assert!(!actor.knows(&json!({"py": {"nofunction": {}}})));
        assert!(!actor.knows(&json!({"sh": "echo"})));
        assert!(!actor.knows(&json!("py")));
    }

    #[test]
    fn performed_actions_fail_only_on_false() {
        let mut table = FunctionTable::default();
        table.register(
            "mod:echo",
            Arc::new(|args, _kwargs, _ctx| Ok(args.first().cloned().unwrap_or(Value::Null))),
        );
        let actor = PyActor::new(Arc::new(table));
        let passing = json!({"py": {"mod:echo": {"args": [null], "kwargs": {}}}});
        let failing = json!({"py": {"mod:echo": {"args": [false], "kwargs": {}}}});
        let run = |action: &Value| -> bool {
            actor
                .perform_action(action, &ctx())
                .unwrap()
                .iter()
                .all(|step| step.call().unwrap())
        };
        assert!(run(&passing));
        assert!(!run(&failing));
    }
}
