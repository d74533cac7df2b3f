// src/core/config_loader.rs

//! # Config Loader
//!
//! Source discovery: builds the worklist of candidate files, loads each with
//! the first config parser whose pattern matches, claims prefixes and follows
//! `config_paths` breadth-first. The first claimed source seeds the safe paths
//! that every later filesystem access is checked against.

use crate::constants::config_keys;
use crate::core::config_resolver::{Config, string_list};
use crate::core::interpolator::GetSpec;
use crate::core::paths::{expand_path_template, normalize_path};
use crate::errors::{DoitomlError, Result};
use crate::sources::ConfigSource;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One worklist entry: a file still to be loaded, or an already built wrapper.
#[derive(Debug)]
enum Pending {
    Path(PathBuf),
    Source(ConfigSource),
}

impl Pending {
    fn path(&self) -> &Path {
        match self {
            Self::Path(path) => path,
            Self::Source(source) => source.path(),
        }
    }
}

impl Config {
    /// Discovers, loads and claims every configuration source.
    pub(crate) fn find_config_sources(&mut self) -> Result<()> {
        let mut pending: VecDeque<Pending> = self
            .initial_config_paths()
            .into_iter()
            .map(Pending::Path)
            .collect();
        let mut checked: Vec<PathBuf> = Vec::new();

        while let Some(next) = pending.pop_front() {
            checked.push(next.path().to_path_buf());
            let source = match next {
                Pending::Path(path) => {
                    self.safe_paths.check(&path)?;
                    self.load_config_source(&path)?
                }
                Pending::Source(source) => source,
            };

            if source.raw_config().is_empty() {
                log::debug!("Skipping {}: no configuration", source);
                continue;
            }
            if self.sources.iter().any(|known| **known == source) {
                log::debug!("Skipping {}: already loaded", source);
                continue;
            }

            let source = self.claim_prefix(source)?;
            if self.sources.len() == 1 {
                self.seed_safe_paths(&source)?;
            }

            for extra in self.extra_config_sources(&source)? {
                let seen = checked.iter().any(|p| p == extra.path())
                    || pending.iter().any(|p| p.path() == extra.path());
                if matches!(extra, Pending::Path(_)) && seen {
                    continue;
                }
                pending.push_back(extra);
            }
        }

        if self.sources.is_empty() {
            let checked = checked
                .iter()
                .map(|path| format!("\n- {}", path.display()))
                .collect();
            return Err(DoitomlError::NoConfig { checked });
        }
        Ok(())
    }

    /// Explicit paths, else the well-known files present in the working
    /// directory, else the default path if it exists.
    fn initial_config_paths(&self) -> Vec<PathBuf> {
        let cwd = &self.options.cwd;
        if !self.options.config_paths.is_empty() {
            return self
                .options
                .config_paths
                .iter()
                .map(|path| normalize_path(&cwd.join(path)))
                .collect();
        }

        let mut found = Vec::new();
        if self.options.discover_config_paths {
            for (_name, parser) in self.entry_points.config_parsers.iter() {
                for well_known in parser.well_known() {
                    let path = normalize_path(&cwd.join(well_known));
                    if path.exists() && !found.contains(&path) {
                        found.push(path);
                    }
                }
            }
        }
        if found.is_empty() {
            let fallback = normalize_path(&cwd.join(&self.options.default_config_path));
            if fallback.exists() {
                found.push(fallback);
            }
        }
        log::debug!("Initial config paths: {:?}", found);
        found
    }

    fn load_config_source(&self, path: &Path) -> Result<ConfigSource> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tried = Vec::new();
        for (name, parser) in self.entry_points.config_parsers.iter() {
            if parser.pattern().is_match(&file_name) {
                log::debug!("Loading {} with {}", path.display(), name);
                return parser.load(path);
            }
            tried.push(parser.pattern().as_str().to_string());
        }
        Err(DoitomlError::UnknownConfig {
            path: path.display().to_string(),
            tried,
        })
    }

    fn claim_prefix(&mut self, source: ConfigSource) -> Result<Arc<ConfigSource>> {
        if let Some(claimed_by) = self.source_for_prefix(source.prefix()) {
            return Err(DoitomlError::Prefix {
                source_desc: source.to_string(),
                prefix: source.prefix().to_string(),
                claimed_by: claimed_by.to_string(),
            });
        }
        log::info!("{} claimed prefix '{}'", source, source.prefix());
        let source = Arc::new(source);
        self.sources.push(Arc::clone(&source));
        Ok(source)
    }

    /// The first source's directory, the caller's extra roots and its own `safe_paths`.
    fn seed_safe_paths(&mut self, first: &ConfigSource) -> Result<()> {
        self.safe_paths.add(first.parent());
        for extra in &self.options.extra_safe_paths {
            self.safe_paths.add(&self.options.cwd.join(extra));
        }
        if let Some(declared) = first.raw_config().get(config_keys::SAFE_PATHS) {
            let templates = string_list(declared).ok_or_else(|| {
                DoitomlError::Config(format!(
                    "{} safe_paths must be a list of strings, found {}",
                    first, declared
                ))
            })?;
            for template in templates {
                let root = expand_path_template(&template, first.parent())?;
                self.safe_paths.add(&root);
            }
        }
        Ok(())
    }

    /// Follows a source's `config_paths`: getter tokens become wrapper
    /// sources, anything else is a path relative to the source.
    fn extra_config_sources(&self, source: &ConfigSource) -> Result<Vec<Pending>> {
        let mut extra = Vec::new();
        for spec in source.config_paths()? {
            if let Some(captures) = self.getter_pattern.captures(&spec) {
                let get = GetSpec::from_captures(&captures);
                let file = get.file_source(self, source.parent())?;
                extra.push(Pending::Source(ConfigSource::wrapper(&file, &get.bits)?));
                continue;
            }
            let path = normalize_path(&source.parent().join(&spec));
            self.safe_paths.check(&path)?;
            extra.push(Pending::Path(path));
        }
        Ok(extra)
    }
}
