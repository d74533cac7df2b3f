// src/core/templaters.rs

use crate::core::config_resolver::Config;
use crate::core::entry_points::{LoadContext, Plugin, PluginResult};
use crate::errors::Result;
use crate::sources::ConfigSource;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Expands one template declaration into task-shaped values.
pub trait Templater: Plugin + fmt::Debug {
    /// Returns a task, a group of tasks, or a list of tasks carrying a `name`.
    fn transform_task(
        &self,
        config: &Config,
        source: &ConfigSource,
        task_name: &str,
        task: &Value,
    ) -> Result<Value>;
}

/// Builds the Jinja2 templater, or reports the missing optional dependency.
pub fn jinja2_factory(_ctx: &LoadContext<'_>) -> PluginResult<Arc<dyn Templater>> {
    #[cfg(feature = "jinja2")]
    {
        Ok(Arc::new(jinja2::Jinja2))
    }
    #[cfg(not(feature = "jinja2"))]
    {
        Err(crate::core::entry_points::PluginError::MissingDependency(
            "build with the `jinja2` feature to expand jinja2 templates".to_string(),
        ))
    }
}

/// Builds the JSON-e templater, or reports the missing optional dependency.
pub fn jsone_factory(_ctx: &LoadContext<'_>) -> PluginResult<Arc<dyn Templater>> {
    #[cfg(feature = "jsone")]
    {
        Ok(Arc::new(jsone::JsonE))
    }
    #[cfg(not(feature = "jsone"))]
    {
        Err(crate::core::entry_points::PluginError::MissingDependency(
            "build with the `jsone` feature to expand json-e templates".to_string(),
        ))
    }
}

/// Templates written as Jinja2 text in one of the known parser formats.
#[cfg(feature = "jinja2")]
pub mod jinja2 {
    use super::Templater;
    use crate::core::config_resolver::Config;
    use crate::core::entry_points::Plugin;
    use crate::errors::{DoitomlError, Result};
    use crate::sources::ConfigSource;
    use serde_json::Value;

    /// `{parser: "template"}`: rendered against the configuration so far, then parsed.
    #[derive(Debug, Default)]
    pub struct Jinja2;

    impl Plugin for Jinja2 {}

    impl Templater for Jinja2 {
        fn transform_task(
            &self,
            config: &Config,
            source: &ConfigSource,
            task_name: &str,
            task: &Value,
        ) -> Result<Value> {
            let task = task.as_object().ok_or_else(|| {
                DoitomlError::Templater(format!(
                    "{} jinja2 template {} must be a mapping, found {}",
                    source, task_name, task
                ))
            })?;
            let parsers = &config.entry_points().parsers;
            let (parser, template) = parsers
                .iter()
                .find_map(|(name, parser)| task.get(name).map(|template| (parser, template)))
                .ok_or_else(|| {
                    DoitomlError::Templater(format!(
                        "{} jinja2 template {} needs one of {:?}",
                        source,
                        task_name,
                        parsers.names()
                    ))
                })?;
            let template = template.as_str().ok_or_else(|| {
                DoitomlError::Templater(format!(
                    "{} jinja2 template {} is not a string: {}",
                    source, task_name, template
                ))
            })?;

            let context = config.to_dict();
            let rendered = minijinja::Environment::new()
                .render_str(template, &context)
                .map_err(|e| {
                    DoitomlError::Templater(format!(
                        "{} failed to render {}:\n{}\n{}",
                        source, task_name, template, e
                    ))
                })?;
            log::trace!("{} rendered {}:\n{}", source, task_name, rendered);
            parser.parse_str(&rendered, source.path()).map_err(|e| {
                DoitomlError::Templater(format!(
                    "{} failed to parse {}:\n{}\n{}\n{}",
                    source, task_name, template, rendered, e
                ))
            })
        }
    }
}

/// Templates written as JSON-e documents.
#[cfg(feature = "jsone")]
pub mod jsone {
    use super::Templater;
    use crate::core::config_resolver::Config;
    use crate::core::entry_points::Plugin;
    use crate::errors::{DoitomlError, Result, UnresolvedKind};
    use crate::sources::ConfigSource;
    use serde_json::{Map, Value};

    const DOLLAR_MAP: &str = "$map";

    /// Renders a task document against the configuration so far.
    ///
    /// A top-level `$map` is resolved through the DSL first, so it may name
    /// paths, tokens and globs.
    #[derive(Debug, Default)]
    pub struct JsonE;

    impl Plugin for JsonE {}

    impl JsonE {
        fn expand_map(&self, config: &Config, source: &ConfigSource, dollar_map: &Value) -> Result<Value> {
            let mut unresolved = Vec::new();
            let expanded = match dollar_map {
                Value::String(_) => self.expand_list(config, source, std::slice::from_ref(dollar_map), &mut unresolved)?,
                Value::Array(items) => self.expand_list(config, source, items, &mut unresolved)?,
                Value::Object(items) => self.expand_dict(config, source, items, &mut unresolved)?,
                other => {
                    return Err(DoitomlError::Templater(format!(
                        "{} don't know what to do with $map {}",
                        source, other
                    )));
                }
            };

            if !unresolved.is_empty() {
                return Err(DoitomlError::Unresolved {
                    kind: UnresolvedKind::TaskSpecs,
                    details: format!("{} $map had unresolved paths: {:?}", source, unresolved),
                });
            }
            let empty = match &expanded {
                Value::Array(items) => items.is_empty(),
                Value::Object(items) => items.is_empty(),
                _ => false,
            };
            if empty {
                return Err(DoitomlError::Templater(format!(
                    "{} $map did not find anything: {}",
                    source, dollar_map
                )));
            }
            Ok(expanded)
        }

        /// Every item is resolved and the results are flattened, in order.
        fn expand_list(
            &self,
            config: &Config,
            source: &ConfigSource,
            items: &[Value],
            unresolved: &mut Vec<String>,
        ) -> Result<Value> {
            let mut expanded = Vec::new();
            for item in items {
                let Value::String(spec) = item else {
                    expanded.push(Value::String(item.to_string()));
                    continue;
                };
                match config.resolve_one_path_spec(source, spec, false, None)? {
                    Some(values) => expanded.extend(values.into_iter().map(Value::String)),
                    None => unresolved.push(spec.clone()),
                }
            }
            Ok(Value::Array(expanded))
        }

        /// Each key keeps only the first value its spec resolves to.
        fn expand_dict(
            &self,
            config: &Config,
            source: &ConfigSource,
            items: &Map<String, Value>,
            unresolved: &mut Vec<String>,
        ) -> Result<Value> {
            let mut expanded = Map::new();
            for (key, specs) in items {
                let mut inner = Vec::new();
                let first = match specs {
                    Value::String(_) => self.expand_list(config, source, std::slice::from_ref(specs), &mut inner)?,
                    Value::Array(list) => self.expand_list(config, source, list, &mut inner)?,
                    other => Value::Array(vec![other.clone()]),
                };
                match first.as_array().and_then(|values| values.first()) {
                    Some(value) if inner.is_empty() => {
                        expanded.insert(key.clone(), value.clone());
                    }
                    _ => unresolved.push(key.clone()),
                }
            }
            Ok(Value::Object(expanded))
        }
    }

    impl Templater for JsonE {
        fn transform_task(
            &self,
            config: &Config,
            source: &ConfigSource,
            task_name: &str,
            task: &Value,
        ) -> Result<Value> {
            let is_empty = match task {
                Value::Null => true,
                Value::Object(map) => map.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::String(text) => text.is_empty(),
                _ => false,
            };
            if is_empty {
                return Err(DoitomlError::Templater(format!(
                    "{} task template {} was unexpectedly empty: {}",
                    source, task_name, task
                )));
            }

            let mut template = task.clone();
            if let Some(dollar_map) = template.get(DOLLAR_MAP).cloned() {
                let expanded = self.expand_map(config, source, &dollar_map)?;
                if let Some(map) = template.as_object_mut() {
                    map.insert(DOLLAR_MAP.to_string(), expanded);
                }
            }

            let context = config.to_dict();
            let rendered = json_e::render(&template, &context).map_err(|e| {
                DoitomlError::Templater(format!("{} failed to render {}: {}", source, task_name, e))
            })?;
            log::trace!("{} rendered {}: {}", source, task_name, rendered);
            Ok(rendered)
        }
    }
}

#[cfg(all(test, feature = "jinja2"))]
mod tests {
    use serde_json::json;

    #[test]
    fn minijinja_renders_serde_values() {
        let context = json!({"paths": {"": {"src": ["a.py", "b.py"]}}});
        let rendered = minijinja::Environment::new()
            .render_str(r#"{% for p in paths[""]["src"] %}{{ p }};{% endfor %}"#, &context)
            .unwrap();
        assert_eq!(rendered, "a.py;b.py;");
    }
}
