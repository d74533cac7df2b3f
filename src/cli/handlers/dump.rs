// src/cli/handlers/dump.rs

use crate::doitoml::DoiTOML;
use anyhow::{Context, Result};

/// Prints the resolved configuration as pretty JSON.
pub fn handle(doitoml: &DoiTOML) -> Result<()> {
    let dumped = serde_json::to_string_pretty(&doitoml.to_dict())
        .context("Failed to serialize the resolved configuration")?;
    println!("{}", dumped);
    Ok(())
}
