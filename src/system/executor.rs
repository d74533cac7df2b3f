// src/system/executor.rs

use crate::models::{ExecutionContext, LogMode, LogPaths};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command as StdCommand, Stdio};
use thiserror::Error;

/// Failures of spawned commands and their log files.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The token list was empty.
    #[error("No command specified to run.")]
    EmptyCommand,
    /// The program could not be started.
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    /// A log file or its parent could not be created.
    #[error("Log file '{path}' could not be prepared: {source}")]
    LogFile {
        /// The log file.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn log_error(path: &Path, source: std::io::Error) -> ExecutionError {
    ExecutionError::LogFile {
        path: path.display().to_string(),
        source,
    }
}

/// Creates the parents of every log file and truncates the files themselves.
///
/// Run once at the start of a task so later actions can append.
pub fn prepare_logs(log_paths: &LogPaths) -> Result<(), ExecutionError> {
    for path in [&log_paths.stdout, &log_paths.stderr].into_iter().flatten() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| log_error(parent, e))?;
        }
        File::create(path).map_err(|e| log_error(path, e))?;
    }
    Ok(())
}

fn open_log(path: &Path, mode: LogMode) -> Result<File, ExecutionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| log_error(parent, e))?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Write => options.write(true).truncate(true),
        LogMode::Append => options.append(true),
    };
    options.open(path).map_err(|e| log_error(path, e))
}

/// Opens the stdout and stderr destinations of a context.
///
/// Streams without a log path inherit the parent's. When both streams name the
/// same file they share one handle, so their output interleaves.
pub fn log_streams(ctx: &ExecutionContext) -> Result<(Stdio, Stdio), ExecutionError> {
    let LogPaths { stdout, stderr } = &ctx.log_paths;
    if ctx.log_paths.is_shared() {
        if let Some(path) = stdout {
            let file = open_log(path, ctx.log_mode)?;
            let clone = file.try_clone().map_err(|e| log_error(path, e))?;
            return Ok((Stdio::from(file), Stdio::from(clone)));
        }
    }
    let out = match stdout {
        Some(path) => Stdio::from(open_log(path, ctx.log_mode)?),
        None => Stdio::inherit(),
    };
    let err = match stderr {
        Some(path) => Stdio::from(open_log(path, ctx.log_mode)?),
        None => Stdio::inherit(),
    };
    Ok((out, err))
}

fn run(mut command: StdCommand, label: &str, ctx: &ExecutionContext) -> Result<bool, ExecutionError> {
    let (out, err) = log_streams(ctx)?;
    command
        .current_dir(dunce::simplified(&ctx.cwd))
        .env_clear()
        .envs(&ctx.env)
        .stdin(Stdio::null())
        .stdout(out)
        .stderr(err);

    let status = command
        .status()
        .map_err(|e| ExecutionError::CommandFailed(label.to_string(), e))?;
    if !status.success() {
        log::debug!("Command '{}' exited with {}", label, status);
    }
    Ok(status.success())
}

/// Runs a command line through the platform shell. `Ok(false)` on a non-zero exit.
pub fn run_shell(command_line: &str, ctx: &ExecutionContext) -> Result<bool, ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Ok(true);
    }
    let mut command = if cfg!(target_os = "windows") {
        let mut c = StdCommand::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = StdCommand::new("sh");
        c.arg("-c");
        c
    };
    command.arg(trimmed);
    run(command, trimmed, ctx)
}

/// Runs a program with pre-split arguments, without a shell.
pub fn run_tokens(tokens: &[String], ctx: &ExecutionContext) -> Result<bool, ExecutionError> {
    let (program, args) = tokens.split_first().ok_or(ExecutionError::EmptyCommand)?;
    let label = shlex::try_join(tokens.iter().map(String::as_str)).unwrap_or_else(|_| tokens.join(" "));
    let mut command = StdCommand::new(program);
    command.args(args);
    match run(command, &label, ctx) {
        // `cmd` builtins are not programs; retry them through the shell.
        Err(ExecutionError::CommandFailed(_, e))
            if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") =>
        {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            run_shell(&label, ctx)
        }
        other => other,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn context(dir: &Path, log_paths: LogPaths) -> ExecutionContext {
        let mut env = BTreeMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        env.insert("GREETING".to_string(), "hello".to_string());
        ExecutionContext {
            cwd: dir.to_path_buf(),
            env,
            log_paths,
            log_mode: LogMode::Append,
        }
    }

    #[test]
    fn shell_commands_see_the_context_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let ctx = context(
            dir.path(),
            LogPaths {
                stdout: Some(out.clone()),
                stderr: None,
            },
        );
        prepare_logs(&ctx.log_paths).unwrap();
        assert!(run_shell("echo $GREETING; pwd", &ctx).unwrap());
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("hello\n"));
        let cwd = dunce::canonicalize(dir.path()).unwrap();
        assert!(text.contains(cwd.to_str().unwrap()));
    }

    #[test]
    fn non_zero_exits_are_failures_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), LogPaths::default());
        assert!(!run_shell("exit 3", &ctx).unwrap());
        assert!(run_tokens(&[], &ctx).is_err());
    }

    #[test]
    fn shared_log_files_interleave_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("logs").join("out.txt");
        let ctx = context(
            dir.path(),
            LogPaths {
                stdout: Some(out.clone()),
                stderr: Some(out.clone()),
            },
        );
        prepare_logs(&ctx.log_paths).unwrap();
        assert!(run_shell("echo one; echo two 1>&2", &ctx).unwrap());
        assert!(run_tokens(&["sh".into(), "-c".into(), "echo three".into()], &ctx).unwrap());
        assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\nthree\n");

        prepare_logs(&ctx.log_paths).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
    }
}
