// src/core/mod.rs

/// Mapping-shaped task actions.
pub mod actors;
pub mod compiler;
pub mod config_loader;
pub mod config_resolver;
pub mod entry_points;
pub mod functions;
pub mod interpolator;
/// Path normalization and the safe roots.
pub mod paths;
pub mod schema;
pub mod skippers;
pub mod task_executor;
/// Template kinds that expand into tasks.
pub mod templaters;
/// Up-to-date check kinds.
pub mod updaters;
