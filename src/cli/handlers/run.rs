// src/cli/handlers/run.rs

use crate::doitoml::DoiTOML;
use crate::models::TaskRecord;
use anyhow::{Result, anyhow, bail};
use colored::Colorize;

///
/// Main entry point for the 'run' command.
/// Names may be a full task name (`group:task`) or a group, which runs all of its tasks.
///
pub fn handle(doitoml: &DoiTOML, names: &[String]) -> Result<()> {
    let groups = doitoml.tasks()?;

    let mut selected: Vec<&TaskRecord> = Vec::new();
    for name in names {
        let matched: Vec<&TaskRecord> = match groups.iter().find(|group| &group.name == name) {
            Some(group) => group.tasks.iter().collect(),
            None => groups
                .iter()
                .flat_map(|group| group.tasks.iter())
                .filter(|task| &task.full_name() == name)
                .collect(),
        };
        if matched.is_empty() {
            return Err(anyhow!("Task '{}' not found.", name.cyan()));
        }
        selected.extend(matched);
    }

    for task in selected {
        eprintln!("{} {}", ".".green().bold(), task.full_name());
        if !task.run()? {
            bail!("Task '{}' failed.", task.full_name().red());
        }
    }
    Ok(())
}
