//! Read-only audit of the detached signatures in the boot directory.

use std::fmt;
use std::path::PathBuf;

use bootsig_core::artifact::detached_signature_path;
use bootsig_core::config::Config;
use bootsig_services::signing::SigningService;

use crate::error::PipelineError;
use crate::stages::kernel::boot_artifacts;

/// Signature state of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The detached signature verifies.
    Verified,
    /// There is no detached signature.
    Missing,
    /// A detached signature exists but does not verify.
    Invalid,
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verified => "ok",
            Self::Missing => "unsigned",
            Self::Invalid => "BAD SIGNATURE",
        })
    }
}

/// One audited artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// The artifact.
    pub path: PathBuf,
    /// Its signature state.
    pub status: SignatureStatus,
}

/// Check every kernel and initramfs in the boot directory.
///
/// # Errors
///
/// Returns [`PipelineError`] if the directory cannot be read or the verifier cannot run.
pub async fn audit(config: &Config, signer: &dyn SigningService) -> Result<Vec<AuditEntry>, PipelineError> {
    let mut entries = Vec::new();
    for path in boot_artifacts(config)? {
        let signature = detached_signature_path(&path);
        let status = if !signature.is_file() {
            SignatureStatus::Missing
        } else if signer.verify_detached(&path, &signature).await? {
            SignatureStatus::Verified
        } else {
            SignatureStatus::Invalid
        };
        entries.push(AuditEntry { path, status });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootsig_services::memory::MemorySigner;
    use tempfile::tempdir;

    #[tokio::test]
    async fn classifies_each_artifact() {
        let dir = tempdir().unwrap();
        let config = Config {
            boot_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let signer = MemorySigner::new("1111222233334444", "pw");
        let good = dir.path().join("vmlinuz-6.1");
        let bad = dir.path().join("vmlinuz-6.2");
        let bare = dir.path().join("initrd.img-6.1");
        for p in [&good, &bad, &bare] {
            std::fs::write(p, p.display().to_string()).unwrap();
        }
        std::fs::write(detached_signature_path(&good), signer.tag_for(good.display().to_string().as_bytes())).unwrap();
        std::fs::write(detached_signature_path(&bad), "forged").unwrap();

        let report = audit(&config, &signer).await.unwrap();
        let statuses: Vec<(String, SignatureStatus)> = report
            .into_iter()
            .map(|e| (e.path.file_name().unwrap().to_string_lossy().into_owned(), e.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("initrd.img-6.1".to_owned(), SignatureStatus::Missing),
                ("vmlinuz-6.1".to_owned(), SignatureStatus::Verified),
                ("vmlinuz-6.2".to_owned(), SignatureStatus::Invalid),
            ]
        );
    }
}
