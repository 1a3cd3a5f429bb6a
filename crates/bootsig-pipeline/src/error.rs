//! Error taxonomy for one bootsig invocation.

use std::path::PathBuf;

use bootsig_core::config::ConfigError;
use bootsig_core::context::ContextError;
use bootsig_services::error::ServiceError;
use thiserror::Error;

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every way an invocation can fail. Absence of keys is not an error; see
/// [`crate::stages::keystore::KeyProbe`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Not running as root.
    #[error("must be run as root (effective uid is {0})")]
    Privilege(u32),
    /// Another invocation holds the run lock.
    #[error("another bootsig run (pid {holder}) holds {}", .path.display())]
    Locked {
        /// Lock file path.
        path: PathBuf,
        /// Process id recorded by the holder.
        holder: String,
    },
    /// The operator cancelled passphrase entry or declined to retry.
    #[error("passphrase entry cancelled; nothing was changed")]
    PassphraseDeclined,
    /// Every allowed passphrase attempt was rejected.
    #[error("passphrase rejected {0} times; nothing was changed")]
    PassphraseRejected(u32),
    /// An external tool failed or timed out.
    #[error("external tool failure: {0}")]
    Tool(#[from] ServiceError),
    /// A signature did not verify.
    #[error("signature verification failed for {}", .0.display())]
    Verification(PathBuf),
    /// An operation that needs keys was requested without usable keys.
    #[error("no usable signing key: {0}")]
    KeysRequired(String),
    /// The configured image modules cannot verify the key's signatures.
    #[error("verification modules lack '{module}', needed for {algorithm} signatures")]
    MissingAlgorithmModule {
        /// Module that must be embedded.
        module: String,
        /// Algorithm of the signing key.
        algorithm: String,
    },
    /// The signing key uses an algorithm the bootloader cannot verify.
    #[error("signing key uses {0}, which the bootloader cannot verify")]
    UnsupportedAlgorithm(String),
    /// None of the kernel paths exist.
    #[error("no kernel found at {}", join_paths(.0))]
    KernelNotFound(Vec<PathBuf>),
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Hook input could not be interpreted.
    #[error("hook context error: {0}")]
    Context(#[from] ContextError),
    /// A local file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_not_found_lists_every_candidate() {
        let err = PipelineError::KernelNotFound(vec![
            PathBuf::from("/boot/vmlinuz-6.1"),
            PathBuf::from("/boot/vmlinux-6.1"),
        ]);
        assert_eq!(
            err.to_string(),
            "no kernel found at /boot/vmlinuz-6.1, /boot/vmlinux-6.1"
        );
    }

    #[test]
    fn tool_failure_wraps_service_error() {
        let err: PipelineError = ServiceError::Failed {
            tool: "sbsign".to_owned(),
            status: Some(1),
            stderr: "cannot read key".to_owned(),
        }
        .into();
        assert!(err.to_string().starts_with("external tool failure: sbsign failed"));
    }
}
