// src/bin/doitoml.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use doitoml::cli::{Cli, Command, handlers, parse_level};
use doitoml::{DoiTOML, LoadError};
use log::LevelFilter;

/// The main entry point of the `doitoml` application.
/// It sets up logging, parses arguments, dispatches to the correct handler,
/// and performs centralized error handling.
fn main() {
    let cli = Cli::parse();
    let explicit_level = init_logging(cli.log_level);

    if let Err(e) = run_cli(&cli, explicit_level) {
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Starts `env_logger`. Returns whether the level was chosen by the caller.
///
/// Without `--log-level` or `RUST_LOG` everything is let through the logger
/// and the `log` max level starts at `warn`, so a configuration's own
/// `log_level` can still raise it once loaded.
fn init_logging(level: Option<LevelFilter>) -> bool {
    let mut builder = env_logger::Builder::new();
    let explicit = match level {
        Some(level) => {
            builder.filter_level(level);
            true
        }
        None if std::env::var_os("RUST_LOG").is_some() => {
            builder.parse_default_env();
            true
        }
        None => {
            builder.filter_level(LevelFilter::Trace);
            false
        }
    };
    builder.init();
    if !explicit {
        log::set_max_level(LevelFilter::Warn);
    }
    explicit
}

fn run_cli(cli: &Cli, explicit_level: bool) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let doitoml = match DoiTOML::try_build(cli.options()) {
        Ok(doitoml) => doitoml,
        Err(LoadError {
            error,
            fail_quietly: true,
        }) => {
            log::error!("{}: {}", error.kind_name(), error);
            std::process::exit(1);
        }
        Err(LoadError { error, .. }) => return Err(error.into()),
    };

    if !explicit_level {
        if let Some(level) = doitoml.config().log_level().and_then(parse_level) {
            log::set_max_level(level);
        }
    }

    match &cli.command {
        Command::List => handlers::list::handle(&doitoml),
        Command::Dump => handlers::dump::handle(&doitoml),
        Command::Run { tasks } => handlers::run::handle(&doitoml, tasks),
    }
}
