//! Key store access: probe for a usable signing identity, export its public
//! key and obtain a verified passphrase.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use bootsig_core::config::Config;
use bootsig_core::types::{KeyId, Passphrase, SigningIdentity};
use bootsig_services::error::ServiceError;
use bootsig_services::keyring::KeyringService;
use bootsig_services::prompt::PassphrasePrompt;
use bootsig_services::signing::SigningService;
use log::{debug, info, warn};
use tempfile::{Builder, NamedTempFile, TempDir};

use crate::error::PipelineError;

/// Result of looking for signing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyProbe {
    /// Keys are present and usable.
    Ready(SigningIdentity),
    /// Keys are missing; the reason is operator-facing.
    Absent(String),
}

/// Look for the key directory, the certificate and private key files inside
/// it, and a matching secret key in the keyring.
///
/// # Errors
///
/// Returns [`PipelineError::Tool`] only if the keyring cannot be queried.
/// Missing keys are reported as [`KeyProbe::Absent`].
pub async fn probe(config: &Config, keyring: &dyn KeyringService) -> Result<KeyProbe, PipelineError> {
    if !config.key_dir.is_dir() {
        return Ok(KeyProbe::Absent(format!(
            "key directory {} does not exist",
            config.key_dir.display()
        )));
    }
    let certificate = config.certificate_path();
    let private_key = config.private_key_path();
    for path in [&certificate, &private_key] {
        if !path.is_file() {
            return Ok(KeyProbe::Absent(format!("{} is missing", path.display())));
        }
    }
    let Some(secret) = keyring.find_secret_key(&config.key_label).await? else {
        return Ok(KeyProbe::Absent(format!(
            "no secret key labelled '{}' in the keyring",
            config.key_label
        )));
    };
    debug!("found {} key {}", secret.algorithm, secret.key_id);
    Ok(KeyProbe::Ready(SigningIdentity {
        label: config.key_label.clone(),
        key_id: secret.key_id,
        algorithm: secret.algorithm,
        certificate,
        private_key,
    }))
}

/// The exported public key, deleted when dropped.
#[derive(Debug)]
pub struct ExportedKey {
    file: NamedTempFile,
}

impl ExportedKey {
    /// Export the public half of `key_id` to a fresh temporary file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the temporary file cannot be created or the export fails.
    pub async fn export(keyring: &dyn KeyringService, key_id: &KeyId) -> Result<Self, PipelineError> {
        let file = Builder::new().prefix("bootsig-pubkey-").suffix(".gpg").tempfile()?;
        keyring.export_public_key(key_id, file.path()).await?;
        Ok(Self { file })
    }

    /// Location of the exported key.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// The decrypted passphrase, held in an owner-only temporary file that is
/// overwritten and deleted when dropped.
#[derive(Debug)]
pub struct PassphraseFile {
    file: NamedTempFile,
}

impl PassphraseFile {
    /// Write `passphrase` to a new temporary file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be written.
    pub fn write(passphrase: &Passphrase) -> Result<Self, PipelineError> {
        // tempfile creates with mode 0600.
        let mut file = Builder::new().prefix("bootsig-pass-").tempfile()?;
        file.write_all(passphrase.expose().as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    /// Location handed to the signing tools.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for PassphraseFile {
    fn drop(&mut self) {
        let file = self.file.as_file_mut();
        if let Ok(len) = file.metadata().map(|m| m.len()) {
            let zeros = vec![0u8; usize::try_from(len).unwrap_or(0)];
            let _ = file
                .seek(SeekFrom::Start(0))
                .and_then(|_| file.write_all(&zeros))
                .and_then(|()| file.sync_data());
        }
        let _ = file.set_len(0);
    }
}

/// Try `passphrase_file` by signing a throwaway payload.
async fn unlocks(
    signer: &dyn SigningService,
    identity: &SigningIdentity,
    passphrase_file: &Path,
) -> Result<bool, PipelineError> {
    let scratch: TempDir = Builder::new().prefix("bootsig-probe-").tempdir()?;
    let payload = scratch.path().join("probe");
    std::fs::write(&payload, b"bootsig passphrase probe\n")?;
    match signer.sign_detached(identity, passphrase_file, &payload).await {
        Ok(_) => Ok(true),
        Err(ServiceError::Failed { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Prompt for the passphrase until it unlocks the key, the operator gives up,
/// or `attempts` prompts have been rejected.
///
/// # Errors
///
/// Returns [`PipelineError::PassphraseDeclined`] when the operator cancels or
/// declines a retry, [`PipelineError::PassphraseRejected`] when every attempt
/// failed, or another [`PipelineError`] if the prompt or signer cannot run.
pub async fn acquire_passphrase(
    prompt: &dyn PassphrasePrompt,
    signer: &dyn SigningService,
    identity: &SigningIdentity,
    attempts: u32,
) -> Result<PassphraseFile, PipelineError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let Some(passphrase) = prompt.ask_passphrase(attempt).await? else {
            return Err(PipelineError::PassphraseDeclined);
        };
        let file = PassphraseFile::write(&passphrase)?;
        drop(passphrase);
        if unlocks(signer, identity, file.path()).await? {
            info!("signing key {} unlocked", identity.key_id);
            return Ok(file);
        }
        warn!("passphrase rejected (attempt {attempt} of {attempts})");
        if attempt < attempts && !prompt.confirm_retry().await? {
            return Err(PipelineError::PassphraseDeclined);
        }
    }
    Err(PipelineError::PassphraseRejected(attempts))
}
