//! Keyring lookup and public-key export.

use std::path::{Path, PathBuf};

use bootsig_core::types::{KeyAlgorithm, KeyId};
use log::debug;

use crate::error::ServiceError;
use crate::process::ToolRunner;
use crate::BoxFuture;

/// A secret key found in the keyring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyInfo {
    /// Long key identifier.
    pub key_id: KeyId,
    /// Public-key algorithm.
    pub algorithm: KeyAlgorithm,
}

/// Read access to the detached-signature keyring.
pub trait KeyringService: Send + Sync {
    /// Look up a usable secret key by user-id label.
    ///
    /// Returns `Ok(None)` if no secret key matches.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the keyring cannot be queried.
    fn find_secret_key<'a>(&'a self, label: &'a str) -> BoxFuture<'a, Result<Option<SecretKeyInfo>, ServiceError>>;

    /// Write the public half of `key_id` to `dest` in binary OpenPGP format.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the export fails or produces no data.
    fn export_public_key<'a>(&'a self, key_id: &'a KeyId, dest: &'a Path) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// [`KeyringService`] backed by `gpg`.
#[derive(Debug, Clone)]
pub struct GpgKeyring {
    runner: ToolRunner,
    homedir: Option<PathBuf>,
}

impl GpgKeyring {
    /// Create a keyring adapter using `gpg`'s default home directory.
    #[must_use]
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            homedir: None,
        }
    }

    /// Use `homedir` instead of the default `~/.gnupg`.
    #[must_use]
    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--batch".to_owned(), "--no-tty".to_owned()];
        if let Some(home) = &self.homedir {
            args.push("--homedir".to_owned());
            args.push(home.display().to_string());
        }
        args
    }
}

/// Parse the first usable `sec` record of `gpg --with-colons --list-secret-keys`.
///
/// Revoked (`r`), expired (`e`) and disabled (`d`) keys are skipped.
///
/// # Errors
///
/// Returns [`ServiceError::Parse`] if a `sec` record carries a malformed key id.
pub fn parse_secret_key_listing(listing: &str) -> Result<Option<SecretKeyInfo>, ServiceError> {
    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.first() != Some(&"sec") || fields.len() < 5 {
            continue;
        }
        if matches!(fields[1], "r" | "e" | "d" | "i") {
            debug!("skipping unusable secret key {} (validity {})", fields[4], fields[1]);
            continue;
        }
        let key_id = KeyId::new(fields[4]).map_err(|e| ServiceError::Parse {
            tool: "gpg".to_owned(),
            reason: format!("bad key id '{}': {e}", fields[4]),
        })?;
        return Ok(Some(SecretKeyInfo {
            key_id,
            algorithm: KeyAlgorithm::from_openpgp_id(fields[3]),
        }));
    }
    Ok(None)
}

impl KeyringService for GpgKeyring {
    fn find_secret_key<'a>(&'a self, label: &'a str) -> BoxFuture<'a, Result<Option<SecretKeyInfo>, ServiceError>> {
        Box::pin(async move {
            let mut args = self.base_args();
            args.extend(["--with-colons".to_owned(), "--list-secret-keys".to_owned(), label.to_owned()]);
            let output = self.runner.output("gpg", &args).await?;
            // gpg exits 2 when nothing matches; that is absence, not failure.
            if !output.status.success() {
                debug!("no secret key for '{label}' in keyring");
                return Ok(None);
            }
            parse_secret_key_listing(&String::from_utf8_lossy(&output.stdout))
        })
    }

    fn export_public_key<'a>(&'a self, key_id: &'a KeyId, dest: &'a Path) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let mut args = self.base_args();
            args.extend(["--export".to_owned(), key_id.to_string()]);
            let output = self.runner.checked("gpg", &args).await?;
            if output.stdout.is_empty() {
                return Err(ServiceError::Parse {
                    tool: "gpg".to_owned(),
                    reason: format!("export of {key_id} produced no data"),
                });
            }
            tokio::fs::write(dest, &output.stdout).await?;
            Ok(())
        })
    }
}
