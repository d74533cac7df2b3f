// src/sources/json.rs

use crate::core::entry_points::Plugin;
use crate::errors::{DoitomlError, Result};
use crate::sources::Parser;
use serde_json::Value;
use std::path::Path;

/// Reads JSON documents.
#[derive(Debug, Default)]
pub struct JsonParser;

impl Plugin for JsonParser {}

impl Parser for JsonParser {
    fn name(&self) -> &str {
        "json"
    }

    fn parse_str(&self, text: &str, origin: &Path) -> Result<Value> {
        serde_json::from_str(text).map_err(|e| DoitomlError::Parse {
            path: origin.display().to_string(),
            parser: self.name().to_string(),
            message: e.to_string(),
        })
    }
}
