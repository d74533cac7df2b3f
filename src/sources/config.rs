// src/sources/config.rs

use crate::constants::{NAME, config_keys};
use crate::core::entry_points::Plugin;
use crate::errors::{DoitomlError, Result};
use crate::sources::json::JsonParser;
use crate::sources::toml::TomlParser;
use crate::sources::{FileSource, Parser, get_in};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

lazy_static! {
    static ref PYPROJECT_RE: Regex = Regex::new(r"^pyproject\.toml$").unwrap();
    static ref PACKAGE_JSON_RE: Regex = Regex::new(r"^package\.json$").unwrap();
}

/// A file format that can host `doitoml` configuration.
pub trait ConfigParser: Plugin + fmt::Debug {
    /// The host format's name, for messages.
    fn name(&self) -> &str;

    /// Matched against the file name of a candidate configuration path.
    fn pattern(&self) -> &Regex;

    /// File names, relative to the working directory, checked during discovery.
    fn well_known(&self) -> &[&'static str];

    /// Reads the file and extracts the tool's configuration subtree.
    fn load(&self, path: &Path) -> Result<ConfigSource>;
}

/// One loaded configuration: the tool-specific subtree of a host document.
///
/// Two sources are equal when they were read from the same path.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    kind: String,
    raw_config: Map<String, Value>,
}

impl PartialEq for ConfigSource {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ConfigSource {}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} prefix='{}' path='{}'>",
            self.kind,
            self.prefix(),
            self.path.display()
        )
    }
}

impl ConfigSource {
    /// Builds a source from an already extracted subtree. A missing subtree is empty.
    pub fn new(path: impl Into<PathBuf>, kind: impl Into<String>, raw: Value) -> Result<Self> {
        let path = path.into();
        let raw_config = match raw {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(DoitomlError::Config(format!(
                    "{} configuration must be a mapping, found {}",
                    path.display(),
                    other
                )));
            }
        };
        Ok(Self {
            path,
            kind: kind.into(),
            raw_config,
        })
    }

    /// Reads a sub-object of a foreign document as a configuration source.
    pub fn wrapper(file: &FileSource, bits: &[String]) -> Result<Self> {
        let value = file.get(bits)?;
        if !value.is_object() {
            return Err(DoitomlError::Config(format!(
                "{} at {:?} is not a mapping",
                file.path().display(),
                bits
            )));
        }
        Self::new(file.path(), "WrapperConfigSource", value)
    }

    /// The file this source was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The config parser that produced it, for messages.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The tool subtree as written.
    pub fn raw_config(&self) -> &Map<String, Value> {
        &self.raw_config
    }

    /// The directory every source-relative path is resolved against.
    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// The namespace this source claims; empty when undeclared.
    pub fn prefix(&self) -> &str {
        self.raw_config
            .get(config_keys::PREFIX)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Further configuration declared by this source, as raw specs.
    pub fn config_paths(&self) -> Result<Vec<String>> {
        match self.raw_config.get(config_keys::CONFIG_PATHS) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        DoitomlError::Config(format!(
                            "{self} config_paths must be strings, found {item}"
                        ))
                    })
                })
                .collect(),
            Some(other) => Err(DoitomlError::Config(format!(
                "{self} config_paths must be a list, found {other}"
            ))),
        }
    }

    /// Reads an optional boolean toggle from the top level.
    pub fn toggle(&self, key: &str) -> Option<bool> {
        self.raw_config.get(key).and_then(Value::as_bool)
    }

    /// A named mapping section (`env`, `paths`, `tokens`, `tasks`, `templates`).
    pub fn section(&self, key: &str) -> Result<Map<String, Value>> {
        match self.raw_config.get(key) {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(other) => Err(DoitomlError::Config(format!(
                "{self} {key} must be a mapping, found {other}"
            ))),
        }
    }
}

fn load_subtree(
    path: &Path,
    kind: &str,
    parser: Arc<dyn Parser>,
    bits: &[&str],
) -> Result<ConfigSource> {
    let document = FileSource::new(path, parser).parse()?;
    let bits: Vec<String> = bits.iter().map(|b| b.to_string()).collect();
    let raw = get_in(&document, &bits).cloned().unwrap_or(Value::Null);
    ConfigSource::new(path, kind, raw)
}

/// Configuration under `[tool.doitoml]` of a `pyproject.toml`.
#[derive(Debug, Default)]
pub struct PyprojectConfigParser;

impl Plugin for PyprojectConfigParser {}

impl ConfigParser for PyprojectConfigParser {
    fn name(&self) -> &str {
        "pyproject.toml"
    }

    fn pattern(&self) -> &Regex {
        &PYPROJECT_RE
    }

    fn well_known(&self) -> &[&'static str] {
        &["pyproject.toml"]
    }

    fn load(&self, path: &Path) -> Result<ConfigSource> {
        load_subtree(path, "PyprojectToml", Arc::new(TomlParser), &["tool", NAME])
    }
}

/// Configuration under the `doitoml` key of a `package.json`.
#[derive(Debug, Default)]
pub struct PackageJsonConfigParser;

impl Plugin for PackageJsonConfigParser {}

impl ConfigParser for PackageJsonConfigParser {
    fn name(&self) -> &str {
        "package.json"
    }

    fn pattern(&self) -> &Regex {
        &PACKAGE_JSON_RE
    }

    fn well_known(&self) -> &[&'static str] {
        &["package.json"]
    }

    fn load(&self, path: &Path) -> Result<ConfigSource> {
        load_subtree(path, "PackageJson", Arc::new(JsonParser), &[NAME])
    }
}
