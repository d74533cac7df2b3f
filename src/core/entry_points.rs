// src/core/entry_points.rs

//! # Entry Points
//!
//! Every extension point (parsers, config parsers, DSL transformers, actors,
//! templaters, updaters and skippers) is a [`Registry`] built from named
//! factories. Registries are sorted by [`Plugin::rank`], then by name, and that
//! order is the dispatch order everywhere else.
//!
//! A factory may report that an optional dependency (a cargo feature) is not
//! available: the entry is logged and left out. Any other failure is fatal.

use crate::constants::DEFAULT_RANK;
use crate::core::actors::{Actor, PyActor};
use crate::core::functions::{FunctionTable, HostFunction};
use crate::core::interpolator::{Dsl, EnvReplacer, Getter, Globber, PathRef};
use crate::core::skippers::{
    AllSkipper, AnySkipper, ExistsSkipper, NotSkipper, PlatformSkipper, PySkipper, Skipper,
};
use crate::core::templaters::{self, Templater};
use crate::core::updaters::{ConfigChanged, PyUpdater, RunOnce, Updater};
use crate::errors::{DoitomlError, Result};
use crate::sources::json::JsonParser;
use crate::sources::toml::TomlParser;
use crate::sources::{ConfigParser, PackageJsonConfigParser, Parser, PyprojectConfigParser, yaml};
use std::fmt;
use std::sync::Arc;

/// Behavior shared by every plugin.
pub trait Plugin: Send + Sync {
    /// Lower ranks are tried first.
    fn rank(&self) -> i64 {
        DEFAULT_RANK
    }
}

/// Why a factory did not produce a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// An optional dependency is not compiled in; the plugin is simply absent.
    MissingDependency(String),
    /// Any other failure; loading stops.
    Failed(String),
}

/// What a plugin factory returns.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// What a factory may look at while building its plugin.
#[derive(Debug)]
pub struct LoadContext<'a> {
    /// Names of the parsers that loaded, sorted.
    pub parser_names: &'a [String],
    /// Host functions for the `py` protocol.
    pub functions: &'a Arc<FunctionTable>,
}

/// Builds one plugin from the load context.
pub type Factory<T> = Box<dyn Fn(&LoadContext<'_>) -> PluginResult<Arc<T>> + Send + Sync>;

type Factories<T> = Vec<(String, Factory<T>)>;

/// A ranked, named group of plugins.
#[derive(Debug)]
pub struct Registry<T: ?Sized> {
    group: &'static str,
    entries: Vec<(String, Arc<T>)>,
}

impl<T: ?Sized + Plugin> Registry<T> {
    fn load(group: &'static str, factories: Factories<T>, ctx: &LoadContext<'_>) -> Result<Self> {
        let mut entries = Vec::with_capacity(factories.len());
        for (name, factory) in factories {
            match factory(ctx) {
                Ok(plugin) => entries.push((name, plugin)),
                Err(PluginError::MissingDependency(reason)) => {
                    log::info!("{} entry point '{}' is unavailable: {}", group, name, reason);
                }
                Err(PluginError::Failed(message)) => {
                    return Err(DoitomlError::EntryPoint {
                        group,
                        name,
                        message,
                    });
                }
            }
        }
        entries.sort_by(|(a_name, a), (b_name, b)| {
            a.rank()
                .cmp(&b.rank())
                .then_with(|| a_name.to_lowercase().cmp(&b_name.to_lowercase()))
        });
        log::debug!(
            "Loaded {} {}: {:?}",
            entries.len(),
            group,
            entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>()
        );
        Ok(Self { group, entries })
    }

    /// The registry name used in logs and errors.
    pub fn group(&self) -> &'static str {
        self.group
    }

    /// The plugin registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Entries in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Registered names in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// How many plugins loaded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing loaded, e.g. every factory was missing a dependency.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All loaded plugins.
#[derive(Debug)]
pub struct EntryPoints {
    /// Document formats, by name.
    pub parsers: Registry<dyn Parser>,
    /// Host formats tried when a config file is loaded.
    pub config_parsers: Registry<dyn ConfigParser>,
    /// Token transformers, tried in rank order.
    pub dsl: Registry<dyn Dsl>,
    /// Handlers for mapping-shaped actions.
    pub actors: Registry<dyn Actor>,
    /// Template kinds.
    pub templaters: Registry<dyn Templater>,
    /// Up-to-date kinds.
    pub updaters: Registry<dyn Updater>,
    /// Skip condition kinds.
    pub skippers: Registry<dyn Skipper>,
    /// Host functions backing the `py` protocol.
    pub functions: Arc<FunctionTable>,
}

impl EntryPoints {
    /// The built-in plugins, with no host functions.
    pub fn builtin() -> Result<Self> {
        EntryPointsBuilder::default().build()
    }
}

/// Collects factories before any plugin is built.
///
/// Registering a name that already exists replaces the earlier factory, so
/// built-ins can be overridden.
pub struct EntryPointsBuilder {
    parsers: Factories<dyn Parser>,
    config_parsers: Factories<dyn ConfigParser>,
    dsl: Factories<dyn Dsl>,
    actors: Factories<dyn Actor>,
    templaters: Factories<dyn Templater>,
    updaters: Factories<dyn Updater>,
    skippers: Factories<dyn Skipper>,
    functions: FunctionTable,
}

impl fmt::Debug for EntryPointsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T: ?Sized>(factories: &Factories<T>) -> Vec<&str> {
            factories.iter().map(|(n, _)| n.as_str()).collect()
        }
        f.debug_struct("EntryPointsBuilder")
            .field("parsers", &names(&self.parsers))
            .field("config_parsers", &names(&self.config_parsers))
            .field("dsl", &names(&self.dsl))
            .field("actors", &names(&self.actors))
            .field("templaters", &names(&self.templaters))
            .field("updaters", &names(&self.updaters))
            .field("skippers", &names(&self.skippers))
            .field("functions", &self.functions)
            .finish()
    }
}

impl Default for EntryPointsBuilder {
    fn default() -> Self {
        Self::empty()
            .parser("json", |_| Ok(Arc::new(JsonParser)))
            .parser("toml", |_| Ok(Arc::new(TomlParser)))
            .parser("yaml", yaml::factory)
            .config_parser("pyproject.toml", |_| Ok(Arc::new(PyprojectConfigParser)))
            .config_parser("package.json", |_| Ok(Arc::new(PackageJsonConfigParser)))
            .dsl("doitoml-colon-path-ref", |_| Ok(Arc::new(PathRef)))
            .dsl("doitoml-dollar-env", |_| Ok(Arc::new(EnvReplacer)))
            .dsl("doitoml-colon-glob", |_| Ok(Arc::new(Globber)))
            .dsl("doitoml-colon-get", |ctx| {
                Getter::new(ctx.parser_names)
                    .map(|g| Arc::new(g) as Arc<dyn Dsl>)
                    .map_err(|e| PluginError::Failed(e.to_string()))
            })
            .actor("py", |ctx| Ok(Arc::new(PyActor::new(Arc::clone(ctx.functions)))))
            .templater("jinja2", templaters::jinja2_factory)
            .templater("json-e", templaters::jsone_factory)
            .updater("config_changed", |_| Ok(Arc::new(ConfigChanged)))
            .updater("run_once", |_| Ok(Arc::new(RunOnce)))
            .updater("py", |ctx| Ok(Arc::new(PyUpdater::new(Arc::clone(ctx.functions)))))
            .skipper("any", |_| Ok(Arc::new(AnySkipper)))
            .skipper("all", |_| Ok(Arc::new(AllSkipper)))
            .skipper("not", |_| Ok(Arc::new(NotSkipper)))
            .skipper("exists", |_| Ok(Arc::new(ExistsSkipper)))
            .skipper("platform", |_| Ok(Arc::new(PlatformSkipper)))
            .skipper("py", |ctx| Ok(Arc::new(PySkipper::new(Arc::clone(ctx.functions)))))
    }
}

fn upsert<T: ?Sized>(factories: &mut Factories<T>, name: &str, factory: Factory<T>) {
    factories.retain(|(n, _)| n != name);
    factories.push((name.to_string(), factory));
}

macro_rules! register_method {
    ($(#[$doc:meta])* $method:ident, $field:ident, $trait:ident) => {
        $(#[$doc])*
        pub fn $method<F>(mut self, name: &str, factory: F) -> Self
        where
            F: Fn(&LoadContext<'_>) -> PluginResult<Arc<dyn $trait>> + Send + Sync + 'static,
        {
            upsert(&mut self.$field, name, Box::new(factory));
            self
        }
    };
}

impl EntryPointsBuilder {
    /// A builder with no plugins at all.
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
            config_parsers: Vec::new(),
            dsl: Vec::new(),
            actors: Vec::new(),
            templaters: Vec::new(),
            updaters: Vec::new(),
            skippers: Vec::new(),
            functions: FunctionTable::default(),
        }
    }

    register_method!(
        /// Registers a document parser, usable by `:get` and templaters.
        parser, parsers, Parser
    );
    register_method!(
        /// Registers a host format for configuration discovery.
        config_parser, config_parsers, ConfigParser
    );
    register_method!(
        /// Registers a token transformer.
        dsl, dsl, Dsl
    );
    register_method!(
        /// Registers a handler for mapping-shaped actions.
        actor, actors, Actor
    );
    register_method!(
        /// Registers a template kind.
        templater, templaters, Templater
    );
    register_method!(
        /// Registers an up-to-date check kind.
        updater, updaters, Updater
    );
    register_method!(
        /// Registers a skip condition kind.
        skipper, skippers, Skipper
    );

    /// Registers a host function for the `py` protocol under `module:function`.
    pub fn function<F>(mut self, locator: &str, function: F) -> Self
    where
        F: Fn(
                &[serde_json::Value],
                &serde_json::Map<String, serde_json::Value>,
                &crate::models::ExecutionContext,
            ) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        let function: HostFunction = Arc::new(function);
        self.functions.register(locator, function);
        self
    }

    /// Sets the interpreter used for `py` locators with no registered host function.
    pub fn python(mut self, interpreter: Option<String>) -> Self {
        self.functions.set_python(interpreter);
        self
    }

    /// Builds every registry. Parsers load first so transformers can see them.
    pub fn build(self) -> Result<EntryPoints> {
        let functions = Arc::new(self.functions);
        let mut ctx = LoadContext {
            parser_names: &[],
            functions: &functions,
        };
        let parsers = Registry::load("parsers", self.parsers, &ctx)?;
        let mut parser_names = parsers.names();
        parser_names.sort();
        ctx.parser_names = &parser_names;

        Ok(EntryPoints {
            config_parsers: Registry::load("config parsers", self.config_parsers, &ctx)?,
            dsl: Registry::load("dsl", self.dsl, &ctx)?,
            actors: Registry::load("actors", self.actors, &ctx)?,
            templaters: Registry::load("templaters", self.templaters, &ctx)?,
            updaters: Registry::load("updaters", self.updaters, &ctx)?,
            skippers: Registry::load("skippers", self.skippers, &ctx)?,
            parsers,
            functions: Arc::clone(&functions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsl_dispatch_order_is_rank_then_name() {
        let entry_points = EntryPoints::builtin().unwrap();
        assert_eq!(
            entry_points.dsl.names(),
            vec![
                "doitoml-colon-path-ref",
                "doitoml-dollar-env",
                "doitoml-colon-get",
                "doitoml-colon-glob",
            ]
        );
    }

    #[test]
    fn missing_dependencies_are_skipped() {
        let entry_points = EntryPointsBuilder::empty()
            .parser("json", |_| Ok(Arc::new(JsonParser)))
            .parser("exotic", |_| {
                Err(PluginError::MissingDependency("not compiled in".to_string()))
            })
            .build()
            .unwrap();
        assert_eq!(entry_points.parsers.names(), vec!["json"]);
    }

    #[test]
    fn hard_failures_are_fatal() {
        let err = EntryPointsBuilder::empty()
            .parser("broken", |_| Err(PluginError::Failed("boom".to_string())))
            .build()
            .err();
        assert!(matches!(
            err,
            Some(DoitomlError::EntryPoint { ref name, .. }) if name == "broken"
        ));
    }

    #[test]
    fn later_registrations_replace_earlier_ones() {
        let entry_points = EntryPointsBuilder::default()
            .skipper("any", |_| Ok(Arc::new(AllSkipper)))
            .build()
            .unwrap();
        assert_eq!(
            entry_points.skippers.iter().filter(|(n, _)| *n == "any").count(),
            1
        );
    }
}
