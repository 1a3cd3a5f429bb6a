//! Bounded execution of external tools.

use std::ffi::OsStr;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ServiceError;

/// Runs external programs with a time limit, killing them on timeout or drop.
#[derive(Debug, Clone, Copy)]
pub struct ToolRunner {
    timeout: Duration,
}

fn tool_name(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}

impl ToolRunner {
    /// Create a runner that allows each invocation at most `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program` with `args`, capturing stdout and stderr.
    ///
    /// Returns the raw [`Output`] whatever the exit status; callers decide
    /// which statuses count as failure.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Spawn`] or [`ServiceError::Timeout`].
    pub async fn output<I, S>(&self, program: impl AsRef<OsStr>, args: I) -> Result<Output, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.output_with_stdin(program, args, None).await
    }

    /// Like [`ToolRunner::output`], feeding `stdin` to the child if given.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Spawn`], [`ServiceError::Timeout`] or
    /// [`ServiceError::Io`] if writing stdin fails.
    pub async fn output_with_stdin<I, S>(
        &self,
        program: impl AsRef<OsStr>,
        args: I,
        stdin: Option<&[u8]>,
    ) -> Result<Output, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let tool = tool_name(program);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("running {cmd:?}");

        let mut child = cmd.spawn().map_err(|source| ServiceError::Spawn {
            tool: tool.clone(),
            source,
        })?;
        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data).await?;
            drop(pipe);
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Timeout {
                tool,
                after: self.timeout,
            }),
        }
    }

    /// Run `program` and require a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Failed`] for a non-zero status, in addition to
    /// the errors of [`ToolRunner::output`].
    pub async fn checked<I, S>(&self, program: impl AsRef<OsStr>, args: I) -> Result<Output, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let output = self.output(program, args).await?;
        ensure_success(program, output)
    }

    /// Run `program` attached to the caller's terminal: stdin and stdout are
    /// inherited, stderr is captured.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Spawn`] or [`ServiceError::Timeout`].
    pub async fn interactive<I, S>(&self, program: impl AsRef<OsStr>, args: I) -> Result<Output, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let tool = tool_name(program);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                tool: tool.clone(),
                source,
            })?;
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Timeout {
                tool,
                after: self.timeout,
            }),
        }
    }

    /// Run `program` with every stream inherited and no time limit, returning its status.
    ///
    /// Used where the child must behave exactly as if invoked directly.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Spawn`] if the program cannot be started.
    pub async fn passthrough<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<ExitStatus, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                tool: tool_name(program),
                source,
            })?;
        Ok(child.wait().await?)
    }
}

/// Turn a non-zero exit into [`ServiceError::Failed`].
///
/// # Errors
///
/// Returns [`ServiceError::Failed`] carrying the trimmed stderr.
pub fn ensure_success(program: &OsStr, output: Output) -> Result<Output, ServiceError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(ServiceError::Failed {
            tool: tool_name(program),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_successful_tool() {
        let runner = ToolRunner::new(Duration::from_secs(10));
        let out = runner.checked("sh", ["-c", "printf hello"]).await.unwrap();
        assert_eq!(out.stdout, b"hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed_with_stderr() {
        let runner = ToolRunner::new(Duration::from_secs(10));
        let err = runner
            .checked("sh", ["-c", "echo broken >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            ServiceError::Failed { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let runner = ToolRunner::new(Duration::from_millis(100));
        let err = runner.output("sleep", ["5"]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let runner = ToolRunner::new(Duration::from_secs(1));
        let err = runner
            .output("/nonexistent/bootsig-tool", Vec::<&str>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Spawn { .. }));
    }

    #[tokio::test]
    async fn stdin_is_forwarded() {
        let runner = ToolRunner::new(Duration::from_secs(10));
        let out = runner
            .output_with_stdin("cat", Vec::<&str>::new(), Some(b"payload"))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"payload");
    }
}
