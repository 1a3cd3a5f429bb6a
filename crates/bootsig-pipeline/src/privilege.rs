//! Privilege check.

use std::path::Path;

use crate::error::PipelineError;

/// Extract the effective UID from the contents of `/proc/<pid>/status`.
#[must_use]
pub fn effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
}

/// Fail unless the current process runs with effective UID 0.
///
/// # Errors
///
/// Returns [`PipelineError::Privilege`] for a non-root caller, or
/// [`PipelineError::Io`] if the process status cannot be read.
pub fn require_root() -> Result<(), PipelineError> {
    let status = std::fs::read_to_string(Path::new("/proc/self/status"))?;
    match effective_uid(&status) {
        Some(0) => Ok(()),
        Some(uid) => Err(PipelineError::Privilege(uid)),
        None => Err(PipelineError::Io(std::io::Error::other(
            "no Uid line in /proc/self/status",
        ))),
    }
}
