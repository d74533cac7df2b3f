// src/sources/mod.rs

//! # Sources
//!
//! A [`Parser`] turns the text of one file format into a [`serde_json::Value`],
//! the single document model used everywhere else. A [`FileSource`] pairs a
//! path with a parser and knows how to walk into the parsed document.
//! [`ConfigSource`] adds the namespace and tool-specific subtree on top.

/// Configuration sources and their host formats.
pub mod config;
/// The JSON parser.
pub mod json;
/// The TOML parser.
pub mod toml;
pub mod yaml;

pub use config::{ConfigParser, ConfigSource, PackageJsonConfigParser, PyprojectConfigParser};

use crate::core::entry_points::Plugin;
use crate::errors::{DoitomlError, Result};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A file format that can be read into the shared document model.
pub trait Parser: Plugin + fmt::Debug {
    /// The name configuration authors use for this format, e.g. in `:get::json::...`.
    fn name(&self) -> &str;

    /// Parses document text. `origin` is only used for error messages.
    fn parse_str(&self, text: &str, origin: &Path) -> Result<Value>;
}

/// One physical file, read through a specific [`Parser`].
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    parser: Arc<dyn Parser>,
}

impl FileSource {
    /// A file read with `parser`; nothing is read yet.
    pub fn new(path: impl Into<PathBuf>, parser: Arc<dyn Parser>) -> Self {
        Self {
            path: path.into(),
            parser,
        }
    }

    /// The file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is there.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads the raw text of the file.
    pub fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path).map_err(|e| DoitomlError::io(&self.path, e))
    }

    /// Reads and parses the whole document.
    pub fn parse(&self) -> Result<Value> {
        let text = self.read()?;
        self.parser.parse_str(&text, &self.path)
    }

    /// Parses the document and walks `bits` into it.
    pub fn get(&self, bits: &[String]) -> Result<Value> {
        let document = self.parse()?;
        get_in(&document, bits)
            .cloned()
            .map_err(|e| DoitomlError::Dsl(format!("{}: {}", self.path.display(), e)))
    }
}

/// Walks a key path into a document: object keys by name, list members by index.
pub fn get_in<'a>(value: &'a Value, bits: &[String]) -> Result<&'a Value> {
    let mut current = value;
    for (depth, bit) in bits.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(bit),
            Value::Array(items) => bit.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            DoitomlError::Dsl(format!(
                "cannot get {:?} from {:?}",
                bits.get(..=depth).unwrap_or(bits),
                short(current)
            ))
        })?;
    }
    Ok(current)
}

fn short(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 60 {
        format!("{}...", text.chars().take(60).collect::<String>())
    } else {
        text
    }
}
