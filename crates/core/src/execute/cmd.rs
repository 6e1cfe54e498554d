//! Shell command runner.
//!
//! Runs the `run` command of a [`GoalExecution`] through the platform shell.
//! Goals without a command succeed immediately with empty output.

use std::future::Future;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, info};

use super::StepRunner;
use super::types::ExecuteError;
use crate::action::GoalExecution;

/// A [`StepRunner`] that executes each goal's `run` command.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
  shell: Option<String>,
  working_dir: Option<PathBuf>,
}

impl CommandRunner {
  pub fn new(shell: Option<String>, working_dir: Option<PathBuf>) -> Self {
    Self { shell, working_dir }
  }
}

impl StepRunner for CommandRunner {
  fn run(&self, unit: &str, action: &GoalExecution) -> impl Future<Output = Result<String, ExecuteError>> + Send {
    let unit = unit.to_string();
    let action = action.clone();
    let shell = self.shell.clone();
    let working_dir = self.working_dir.clone();

    async move {
      let Some(cmd) = action.run.as_deref() else {
        debug!(unit = %unit, step = %action, "no command bound, nothing to run");
        return Ok(String::new());
      };
      execute_cmd(cmd, &unit, &action, working_dir.as_ref(), shell.as_deref()).await
    }
  }
}

/// Execute a step command and return its trimmed stdout.
///
/// The command sees `LIFECYCLE_UNIT`, `LIFECYCLE_PHASE`, `LIFECYCLE_PLUGIN` and
/// `LIFECYCLE_GOAL` in its environment.
pub async fn execute_cmd(
  cmd: &str,
  unit: &str,
  action: &GoalExecution,
  working_dir: Option<&PathBuf>,
  shell: Option<&str>,
) -> Result<String, ExecuteError> {
  info!(unit = %unit, cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .env("LIFECYCLE_UNIT", unit)
    .env("LIFECYCLE_PHASE", &action.phase)
    .env("LIFECYCLE_PLUGIN", action.plugin.as_str())
    .env("LIFECYCLE_GOAL", &action.goal);

  if let Some(dir) = working_dir {
    command.current_dir(dir);
  }

  debug!(shell = %shell_cmd, working_dir = ?working_dir, "spawning process");

  let output = command.output().await?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }

    return Err(ExecuteError::CmdFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Get the shell command and arguments for the current platform.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[cfg(unix)]
  fn echo_env(var: &str) -> String {
    format!("echo ${}", var)
  }

  #[cfg(windows)]
  fn echo_env(var: &str) -> String {
    format!("Write-Output $env:{}", var)
  }

  #[tokio::test]
  async fn goal_without_command_succeeds() {
    let runner = CommandRunner::default();
    let goal = GoalExecution::new("org.example:noop", "noop", "validate");
    assert_eq!(runner.run("unit", &goal).await.unwrap(), "");
  }

  #[tokio::test]
  async fn runs_command_and_returns_stdout() {
    let runner = CommandRunner::default();
    let goal = GoalExecution::new("org.example:echo", "echo", "compile").with_run("echo hello");
    assert_eq!(runner.run("unit", &goal).await.unwrap(), "hello");
  }

  #[tokio::test]
  async fn exposes_step_environment() {
    let runner = CommandRunner::default();
    let goal = GoalExecution::new("org.example:echo", "echo", "package").with_run(echo_env("LIFECYCLE_PHASE"));
    assert_eq!(runner.run("app", &goal).await.unwrap(), "package");

    let goal = goal.with_run(echo_env("LIFECYCLE_UNIT"));
    assert_eq!(runner.run("app", &goal).await.unwrap(), "app");
  }

  #[tokio::test]
  async fn failing_command_reports_exit_code() {
    let runner = CommandRunner::default();
    let goal = GoalExecution::new("org.example:fail", "fail", "test").with_run("exit 3");

    let err = runner.run("unit", &goal).await.unwrap_err();
    assert!(matches!(err, ExecuteError::CmdFailed { code: Some(3), .. }));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn runs_in_working_dir() {
    let temp = TempDir::new().unwrap();
    let runner = CommandRunner::new(None, Some(temp.path().to_path_buf()));
    let goal = GoalExecution::new("org.example:touch", "touch", "package").with_run("touch marker");

    runner.run("unit", &goal).await.unwrap();
    assert!(temp.path().join("marker").exists());
  }

  #[test]
  fn shell_override_arguments() {
    assert_eq!(get_shell(Some("/bin/bash")).1, vec!["-c"]);
    assert_eq!(get_shell(Some("pwsh")).1, vec!["-NoProfile", "-Command"]);
    assert_eq!(get_shell(Some("cmd.exe")).1, vec!["/C"]);
  }
}
