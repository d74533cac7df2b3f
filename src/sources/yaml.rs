// src/sources/yaml.rs

//! YAML support, available with the `yaml` feature.

use crate::core::entry_points::{LoadContext, PluginResult};
#[cfg(not(feature = "yaml"))]
use crate::core::entry_points::PluginError;
use crate::sources::Parser;
use std::sync::Arc;

#[cfg(feature = "yaml")]
pub use enabled::YamlParser;

/// Builds the YAML parser, or reports the missing optional dependency.
pub fn factory(_ctx: &LoadContext<'_>) -> PluginResult<Arc<dyn Parser>> {
    #[cfg(feature = "yaml")]
    {
        Ok(Arc::new(YamlParser))
    }
    #[cfg(not(feature = "yaml"))]
    {
        Err(PluginError::MissingDependency(
            "build with the `yaml` feature to read YAML sources".to_string(),
        ))
    }
}

#[cfg(feature = "yaml")]
mod enabled {
    use crate::core::entry_points::Plugin;
    use crate::errors::{DoitomlError, Result};
    use crate::sources::Parser;
    use serde_json::Value;
    use std::path::Path;

    /// Reads YAML documents.
    #[derive(Debug, Default)]
    pub struct YamlParser;

    impl Plugin for YamlParser {}

    impl Parser for YamlParser {
        fn name(&self) -> &str {
            "yaml"
        }

        fn parse_str(&self, text: &str, origin: &Path) -> Result<Value> {
            serde_yaml::from_str::<Value>(text).map_err(|e| DoitomlError::Parse {
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
        fn parses_mappings_and_lists() {
            let value = YamlParser
                .parse_str("a:\n  - 1\n  - two\n", Path::new("x.yaml"))
                .ok();
            assert_eq!(value, Some(json!({"a": [1, "two"]})));
        }
    }
}
