// src/system/mod.rs

//! Process plumbing: spawning commands with an explicit working directory,
//! environment and log destinations.

/// Runs commands with their own cwd, env and logs.
pub mod executor;
