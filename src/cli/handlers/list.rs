// src/cli/handlers/list.rs

use crate::doitoml::DoiTOML;
use anyhow::Result;
use colored::Colorize;

/// Prints every task name, aligned, followed by its doc.
pub fn handle(doitoml: &DoiTOML) -> Result<()> {
    let groups = doitoml.tasks()?;
    let width = groups
        .iter()
        .flat_map(|group| group.tasks.iter())
        .map(|task| task.full_name().len())
        .max()
        .unwrap_or(0);

    for group in &groups {
        log::debug!("{}: {}", group.name, group.doc);
        for task in &group.tasks {
            let doc = task.doc.as_deref().unwrap_or_default();
            let name = format!("{:<width$}", task.full_name(), width = width);
            println!("{}  {}", name.cyan(), doc.dimmed());
        }
    }
    Ok(())
}
