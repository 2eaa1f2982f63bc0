//! External tool invocation.
//!
//! Every collaborator the pipeline drives (compilers, packagers, signers,
//! notarization, git, docker) is reached through [`CommandRunner`]. The
//! pipeline only ever sees `{program, args, working_dir}` going in and
//! `{exit_code, stdout, stderr}` coming out, so tests substitute a fake
//! runner and never spawn a process.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Number of trailing stderr lines kept in a [`CommandError::Failed`].
const STDERR_TAIL_LINES: usize = 20;

/// Errors raised by external tool invocations.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The process could not be started at all.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("'{command}' failed with exit code {exit_code}\n{stderr_tail}")]
    Failed {
        /// Rendered command line
        command: String,
        /// Exit code, `-1` when killed by a signal
        exit_code: i32,
        /// Last lines of stderr
        stderr_tail: String,
    },
}

/// A command to execute.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments, passed verbatim
    pub args: Vec<String>,
    /// Working directory, inherited when `None`
    pub working_dir: Option<PathBuf>,
    /// Indices into `args` that are masked when displayed
    secret: Vec<usize>,
}

impl CommandSpec {
    /// A command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            secret: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append an argument that is shown as `***` in logs and errors.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Append a path argument.
    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run inside `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret.contains(&i) {
                f.write_str(" ***")?;
            } else if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.to_string())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Whether the command exited with code 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is *not* an error at this level; see [`run_checked`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Run a command and turn a non-zero exit into [`CommandError::Failed`].
///
/// # Errors
///
/// Returns an error if the process cannot be spawned or exits unsuccessfully.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, CommandError> {
    tracing::debug!(command = %spec, "running external command");
    let output = runner.run(spec).await?;
    if output.passed() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            command: spec.to_string(),
            exit_code: output.exit_code,
            stderr_tail: tail_lines(&output.stderr, STDERR_TAIL_LINES),
        })
    }
}

/// Runs commands as child processes on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Keep only the last `n` lines of `text`.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let spec = CommandSpec::new("git")
            .arg("commit")
            .arg("-m")
            .arg("Version bump");
        assert_eq!(spec.to_string(), "git commit -m \"Version bump\"");
    }

    #[test]
    fn display_masks_secret_arguments() {
        let spec = CommandSpec::new("signtool")
            .args(["sign", "/p"])
            .secret_arg("TopSecretKeyPw")
            .arg("app.msi");
        assert_eq!(spec.args[2], "TopSecretKeyPw");
        assert_eq!(spec.to_string(), "signtool sign /p *** app.msi");
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text = (1..=30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, "28\n29\n30");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_output() {
        let out = ProcessRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_checked_rejects_non_zero_exit() {
        let err = run_checked(&ProcessRunner, &CommandSpec::new("false"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = ProcessRunner
            .run(&CommandSpec::new("relkit-definitely-not-a-program"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
