//! Detached and embedded signing primitives.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use bootsig_core::artifact::detached_signature_path;
use bootsig_core::types::SigningIdentity;
use log::debug;

use crate::error::ServiceError;
use crate::process::ToolRunner;
use crate::BoxFuture;

/// Produces and checks signatures. The cryptography lives in the tools behind it.
pub trait SigningService: Send + Sync {
    /// Write a detached signature for `artifact` to [`detached_signature_path`],
    /// replacing any existing one.
    ///
    /// `passphrase_file` holds the decrypted key passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if signing fails, including on a wrong passphrase.
    fn sign_detached<'a>(
        &'a self,
        identity: &'a SigningIdentity,
        passphrase_file: &'a Path,
        artifact: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, ServiceError>>;

    /// Check `signature` over `artifact` against the keyring.
    ///
    /// Returns `Ok(false)` for a signature that does not verify.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] only if the verifier cannot be run.
    fn verify_detached<'a>(&'a self, artifact: &'a Path, signature: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>>;

    /// Write an executable-signed copy of `input` to `output` (which may equal `input`).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the executable signer fails.
    fn sign_embedded<'a>(
        &'a self,
        identity: &'a SigningIdentity,
        input: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Return `true` if `binary` carries any embedded signature.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the inspector cannot be run.
    fn has_embedded_signature<'a>(&'a self, binary: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>>;

    /// Return `true` if `binary`'s embedded signature verifies against the identity's certificate.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the verifier cannot be run.
    fn verify_embedded<'a>(&'a self, identity: &'a SigningIdentity, binary: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>>;
}

/// [`SigningService`] backed by `gpg` (detached) and `sbsign`/`sbverify` (embedded).
#[derive(Debug, Clone)]
pub struct GpgSbSigner {
    runner: ToolRunner,
    homedir: Option<PathBuf>,
}

impl GpgSbSigner {
    /// Create a signer.
    #[must_use]
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            homedir: None,
        }
    }

    /// Use `homedir` as the gpg home directory.
    #[must_use]
    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    fn gpg_args(&self) -> Vec<String> {
        let mut args = vec!["--batch".to_owned(), "--no-tty".to_owned(), "--yes".to_owned()];
        if let Some(home) = &self.homedir {
            args.push("--homedir".to_owned());
            args.push(home.display().to_string());
        }
        args
    }
}

/// Return `true` if `sbverify --list` output reports at least one signature.
#[must_use]
pub fn listing_has_signature(listing: &str) -> bool {
    listing
        .lines()
        .any(|line| line.trim_start().starts_with("signature "))
}

impl SigningService for GpgSbSigner {
    fn sign_detached<'a>(
        &'a self,
        identity: &'a SigningIdentity,
        passphrase_file: &'a Path,
        artifact: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, ServiceError>> {
        Box::pin(async move {
            let signature = detached_signature_path(artifact);
            let mut args = self.gpg_args();
            args.extend([
                "--pinentry-mode".to_owned(),
                "loopback".to_owned(),
                "--passphrase-file".to_owned(),
                passphrase_file.display().to_string(),
                "--local-user".to_owned(),
                identity.key_id.to_string(),
                "--detach-sign".to_owned(),
                "--output".to_owned(),
                signature.display().to_string(),
                artifact.display().to_string(),
            ]);
            self.runner.checked("gpg", &args).await?;
            debug!("signed {}", artifact.display());
            Ok(signature)
        })
    }

    fn verify_detached<'a>(&'a self, artifact: &'a Path, signature: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let mut args = self.gpg_args();
            args.extend([
                "--verify".to_owned(),
                signature.display().to_string(),
                artifact.display().to_string(),
            ]);
            let output = self.runner.output("gpg", &args).await?;
            if !output.status.success() {
                debug!(
                    "gpg rejected {}: {}",
                    signature.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(output.status.success())
        })
    }

    fn sign_embedded<'a>(
        &'a self,
        identity: &'a SigningIdentity,
        input: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let args = [
                OsStr::new("--key"),
                identity.private_key.as_os_str(),
                OsStr::new("--cert"),
                identity.certificate.as_os_str(),
                OsStr::new("--output"),
                output.as_os_str(),
                input.as_os_str(),
            ];
            self.runner.checked("sbsign", args).await?;
            Ok(())
        })
    }

    fn has_embedded_signature<'a>(&'a self, binary: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let output = self
                .runner
                .output("sbverify", [OsStr::new("--list"), binary.as_os_str()])
                .await?;
            // Non-PE files (initramfs images) fail the listing; they are simply unsigned.
            Ok(listing_has_signature(&String::from_utf8_lossy(&output.stdout)))
        })
    }

    fn verify_embedded<'a>(&'a self, identity: &'a SigningIdentity, binary: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let output = self
                .runner
                .output(
                    "sbverify",
                    [OsStr::new("--cert"), identity.certificate.as_os_str(), binary.as_os_str()],
                )
                .await?;
            Ok(output.status.success())
        })
    }
}
