//! Execution of rendered hook commands.

use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::process::Command;

use super::HookError;

/// Captured result of a successful hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOutput {
    /// Combined stdout and stderr, trimmed.
    pub output: String,
}

/// Executes a rendered hook command.
pub trait HookRunner: Send + Sync + 'static {
    /// Run `command` to completion. A non-zero exit is an error.
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<HookOutput, HookError>>;
}

/// Runs hooks through the platform shell (`sh -c`, or `cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    fn command(line: &str) -> Command {
        #[cfg(windows)]
        let mut command = {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(line);
            command
        };
        #[cfg(not(windows))]
        let mut command = {
            let mut command = Command::new("sh");
            command.arg("-c").arg(line);
            command
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl HookRunner for ShellRunner {
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<HookOutput, HookError>> {
        Box::pin(async move {
            let output = Self::command(command)
                .output()
                .await
                .map_err(|source| HookError::Spawn {
                    command: command.to_string(),
                    source,
                })?;

            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let combined = combined.trim().to_string();

            if output.status.success() {
                Ok(HookOutput { output: combined })
            } else {
                Err(HookError::Failed {
                    command: command.to_string(),
                    status: output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    output: combined,
                })
            }
        })
    }
}
