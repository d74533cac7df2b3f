// src/sources/toml.rs

use crate::core::entry_points::Plugin;
use crate::errors::{DoitomlError, Result};
use crate::sources::Parser;
use serde_json::Value;
use std::path::Path;

/// Reads TOML documents.
#[derive(Debug, Default)]
pub struct TomlParser;

impl Plugin for TomlParser {}

impl Parser for TomlParser {
    fn name(&self) -> &str {
        "toml"
    }

    fn parse_str(&self, text: &str, origin: &Path) -> Result<Value> {
        toml::from_str::<Value>(text).map_err(|e| DoitomlError::Parse {
            path: origin.display().to_string(),
            parser: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_tables() {
        let text = "[tool.doitoml]\nprefix = \"x\"\n[tool.doitoml.env]\nA = \"1\"\n";
        let value = TomlParser.parse_str(text, Path::new("pyproject.toml")).ok();
        assert_eq!(
            value,
            Some(json!({"tool": {"doitoml": {"prefix": "x", "env": {"A": "1"}}}}))
        );
    }

    #[test]
    fn reports_the_origin_on_failure() {
        let err = TomlParser.parse_str("[broken", Path::new("bad.toml")).err();
        assert!(matches!(
            err,
            Some(DoitomlError::Parse { ref path, ref parser, .. })
                if path == "bad.toml" && parser == "toml"
        ));
    }
}
