// src/lib.rs

//! Declarative task configuration gathered from several files, resolved into
//! runnable task records.
//!
//! ```no_run
//! use doitoml::{DoiTOML, DoiTomlOptions};
//!
//! let doitoml = DoiTOML::load(DoiTomlOptions::new().cwd("/path/to/project"))?;
//! for group in doitoml.tasks()? {
//!     for task in &group.tasks {
//!         println!("{}", task.full_name());
//!     }
//! }
//! # Ok::<(), doitoml::DoitomlError>(())
//! ```

/// The `doitoml` command line.
pub mod cli;
/// Names and defaults shared across the crate.
pub mod constants;
/// Resolution, normalization and the plugin kinds.
pub mod core;
/// Timing helpers for debug logs.
pub mod dev_utils;
pub mod doitoml;
pub mod errors;
pub mod models;
pub mod sources;
pub mod system;

pub use crate::core::config_resolver::{Config, ConfigOptions};
pub use crate::core::entry_points::{EntryPoints, EntryPointsBuilder, PluginError};
pub use crate::doitoml::{DoiTOML, DoiTomlOptions, LoadError};
pub use crate::errors::{DoitomlError, ErrorCategory, Result, UnresolvedKind};
pub use crate::models::{TaskGroup, TaskHistory, TaskRecord};
