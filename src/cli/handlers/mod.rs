// src/cli/handlers/mod.rs

/// `doitoml dump`.
pub mod dump;
/// `doitoml list`.
pub mod list;
/// `doitoml run`.
pub mod run;
