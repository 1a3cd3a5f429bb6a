//! Error types for external tool invocations.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving an external tool.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The tool could not be started.
    #[error("failed to start {tool}: {source}")]
    Spawn {
        /// Program name.
        tool: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The tool ran and reported failure.
    #[error("{tool} failed with {}: {stderr}", describe_status(.status))]
    Failed {
        /// Program name.
        tool: String,
        /// Exit code, `None` if killed by a signal.
        status: Option<i32>,
        /// Captured standard error (trimmed).
        stderr: String,
    },
    /// The tool exceeded its time limit and was killed.
    #[error("{tool} did not finish within {}s", .after.as_secs())]
    Timeout {
        /// Program name.
        tool: String,
        /// The limit that was exceeded.
        after: Duration,
    },
    /// The tool's output could not be understood.
    #[error("unexpected output from {tool}: {reason}")]
    Parse {
        /// Program name.
        tool: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A local file operation around the tool failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "a signal".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_display_names_exit_code() {
        let err = ServiceError::Failed {
            tool: "gpg".to_owned(),
            status: Some(2),
            stderr: "no secret key".to_owned(),
        };
        assert_eq!(err.to_string(), "gpg failed with exit status 2: no secret key");
    }

    #[test]
    fn failed_display_handles_signal() {
        let err = ServiceError::Failed {
            tool: "sbsign".to_owned(),
            status: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn timeout_display_shows_seconds() {
        let err = ServiceError::Timeout {
            tool: "grub-mkstandalone".to_owned(),
            after: Duration::from_secs(600),
        };
        assert_eq!(err.to_string(), "grub-mkstandalone did not finish within 600s");
    }
}
