//! Signature engine: detached signatures over files, embedded signatures over
//! executables, and signature removal.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bootsig_core::artifact::detached_signature_path;
use bootsig_core::types::SigningIdentity;
use bootsig_services::signing::SigningService;
use log::debug;

use crate::error::PipelineError;

/// Write and verify a detached signature for `artifact`.
///
/// # Errors
///
/// Returns [`PipelineError::Tool`] if signing fails, or
/// [`PipelineError::Verification`] if the fresh signature does not verify.
pub async fn sign_artifact(
    signer: &dyn SigningService,
    identity: &SigningIdentity,
    passphrase_file: &Path,
    artifact: &Path,
) -> Result<PathBuf, PipelineError> {
    let signature = signer.sign_detached(identity, passphrase_file, artifact).await?;
    if !signer.verify_detached(artifact, &signature).await? {
        return Err(PipelineError::Verification(artifact.to_path_buf()));
    }
    debug!("signed {}", artifact.display());
    Ok(signature)
}

/// Sign every file in `files`, stopping at the first failure.
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised by [`sign_artifact`].
pub async fn sign_files(
    signer: &dyn SigningService,
    identity: &SigningIdentity,
    passphrase_file: &Path,
    files: &[PathBuf],
) -> Result<Vec<PathBuf>, PipelineError> {
    let mut signatures = Vec::with_capacity(files.len());
    for file in files {
        signatures.push(sign_artifact(signer, identity, passphrase_file, file).await?);
    }
    Ok(signatures)
}

/// Replace `binary` with a copy carrying an embedded signature, then verify it.
///
/// # Errors
///
/// Returns [`PipelineError::Tool`] if the executable signer fails, or
/// [`PipelineError::Verification`] if the result does not verify.
pub async fn sign_embedded_in_place(
    signer: &dyn SigningService,
    identity: &SigningIdentity,
    binary: &Path,
) -> Result<(), PipelineError> {
    signer.sign_embedded(identity, binary, binary).await?;
    if !signer.verify_embedded(identity, binary).await? {
        return Err(PipelineError::Verification(binary.to_path_buf()));
    }
    debug!("embedded signature on {}", binary.display());
    Ok(())
}

/// Delete the detached signature of `artifact`. Returns `false` if there was none.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] for any failure other than absence.
pub fn remove_signature(artifact: &Path) -> Result<bool, PipelineError> {
    let signature = detached_signature_path(artifact);
    match std::fs::remove_file(&signature) {
        Ok(()) => {
            debug!("removed {}", signature.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootsig_core::types::{KeyAlgorithm, KeyId};
    use bootsig_services::memory::MemorySigner;
    use tempfile::{tempdir, TempDir};

    const KEY: &str = "1111222233334444";

    fn fixture() -> (TempDir, SigningIdentity, PathBuf) {
        let dir = tempdir().unwrap();
        let pass = dir.path().join("pass");
        std::fs::write(&pass, "hunter2").unwrap();
        let identity = SigningIdentity {
            label: "bootsig".to_owned(),
            key_id: KeyId::new(KEY).unwrap(),
            algorithm: KeyAlgorithm::Rsa,
            certificate: dir.path().join("db.crt"),
            private_key: dir.path().join("db.key"),
        };
        (dir, identity, pass)
    }

    #[tokio::test]
    async fn detached_signature_sits_next_to_artifact() {
        let (dir, identity, pass) = fixture();
        let artifact = dir.path().join("normal.mod");
        std::fs::write(&artifact, "module").unwrap();
        let signer = MemorySigner::new(KEY, "hunter2");
        let sig = sign_artifact(&signer, &identity, &pass, &artifact).await.unwrap();
        assert_eq!(sig, dir.path().join("normal.mod.sig"));
        assert!(signer.verify_detached(&artifact, &sig).await.unwrap());
    }

    #[tokio::test]
    async fn first_failure_stops_the_loop() {
        let (dir, identity, pass) = fixture();
        let files: Vec<PathBuf> = ["a.mod", "b.mod", "c.mod"]
            .iter()
            .map(|n| dir.path().join(n))
            .collect();
        for f in &files {
            std::fs::write(f, "module").unwrap();
        }
        let signer = MemorySigner::new(KEY, "hunter2").failing_on(&files[1]);
        let err = sign_files(&signer, &identity, &pass, &files).await.unwrap_err();
        assert!(matches!(err, PipelineError::Tool(_)));
        assert_eq!(signer.log().detached, vec![files[0].clone()]);
        assert!(!detached_signature_path(&files[2]).exists());
    }

    #[tokio::test]
    async fn embedded_signature_verifies() {
        let (dir, identity, _) = fixture();
        let binary = dir.path().join("grubx64.efi");
        std::fs::write(&binary, "MZ image").unwrap();
        let signer = MemorySigner::new(KEY, "hunter2");
        sign_embedded_in_place(&signer, &identity, &binary).await.unwrap();
        assert!(signer.has_embedded_signature(&binary).await.unwrap());
    }

    #[test]
    fn removing_absent_signature_is_tolerated() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("vmlinuz-6.1.0-13-amd64");
        assert!(!remove_signature(&artifact).unwrap());
        std::fs::write(detached_signature_path(&artifact), "sig").unwrap();
        assert!(remove_signature(&artifact).unwrap());
        assert!(!detached_signature_path(&artifact).exists());
    }
}
