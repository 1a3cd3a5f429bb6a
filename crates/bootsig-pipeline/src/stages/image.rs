//! Standalone image build and installation.

use std::io::Read;
use std::path::{Path, PathBuf};

use bootsig_core::config::Config;
use bootsig_core::types::KeyAlgorithm;
use bootsig_services::image::{ImageBuildService, StandaloneRequest};
use log::{debug, info};
use sha2::{Digest, Sha256};
use tempfile::{Builder, TempDir};

use crate::error::PipelineError;
use crate::stages::staging::StagingTree;

/// Module that verifies OpenPGP signatures at boot.
pub const SIGNATURE_MODULE: &str = "pgp";

/// Modules to embed for a key of `algorithm`, checked against the configured list.
///
/// # Errors
///
/// Returns [`PipelineError::UnsupportedAlgorithm`] if the bootloader has no
/// verifier for `algorithm`, or [`PipelineError::MissingAlgorithmModule`] if the
/// configured modules omit the signature module or the algorithm's verifier.
pub fn required_modules(config: &Config, algorithm: &KeyAlgorithm) -> Result<Vec<String>, PipelineError> {
    let Some(verifier) = algorithm.verifier_module() else {
        return Err(PipelineError::UnsupportedAlgorithm(algorithm.to_string()));
    };
    for module in [SIGNATURE_MODULE, verifier] {
        if !config.verification_modules.iter().any(|m| m == module) {
            return Err(PipelineError::MissingAlgorithmModule {
                module: module.to_owned(),
                algorithm: algorithm.to_string(),
            });
        }
    }
    Ok(config.verification_modules.clone())
}

/// A built image in its own scratch directory, removed when dropped.
#[derive(Debug)]
pub struct BuiltImage {
    _dir: TempDir,
    path: PathBuf,
}

impl BuiltImage {
    /// Location of the image.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Build the standalone image from `staging` with `public_key` and `modules` embedded.
///
/// # Errors
///
/// Returns [`PipelineError`] if the scratch directory cannot be created or the builder fails.
pub async fn build(
    images: &dyn ImageBuildService,
    config: &Config,
    staging: &StagingTree,
    public_key: &Path,
    modules: Vec<String>,
) -> Result<BuiltImage, PipelineError> {
    let dir = Builder::new().prefix("bootsig-image-").tempdir()?;
    let path = dir.path().join(&config.loader_name);
    let request = StandaloneRequest {
        target: config.grub_target.clone(),
        staging: staging.path().to_path_buf(),
        public_key: public_key.to_path_buf(),
        modules,
        output: path.clone(),
    };
    images.build_standalone(&request).await?;
    debug!("built {}", path.display());
    Ok(BuiltImage { _dir: dir, path })
}

/// Hex SHA-256 of the file at `path`.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the file cannot be read.
pub fn image_digest(path: &Path) -> Result<String, PipelineError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Copy `image` to `dest`, replacing any previous image atomically.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the copy or rename fails.
pub fn install(image: &Path, dest: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut pending = dest.as_os_str().to_owned();
    pending.push(".new");
    let pending = PathBuf::from(pending);
    std::fs::copy(image, &pending)?;
    std::fs::rename(&pending, dest)?;
    info!("installed {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_key_needs_gcry_rsa() {
        let config = Config {
            verification_modules: vec!["pgp".to_owned(), "gcry_sha256".to_owned()],
            ..Config::default()
        };
        let err = required_modules(&config, &KeyAlgorithm::Rsa).unwrap_err();
        assert!(matches!(err, PipelineError::MissingAlgorithmModule { module, .. } if module == "gcry_rsa"));
    }

    #[test]
    fn default_modules_cover_rsa_and_dsa() {
        let config = Config::default();
        assert!(required_modules(&config, &KeyAlgorithm::Rsa).is_ok());
        assert!(required_modules(&config, &KeyAlgorithm::Dsa).is_ok());
    }

    #[test]
    fn unknown_algorithm_is_refused() {
        let err = required_modules(&Config::default(), &KeyAlgorithm::Other("22".to_owned())).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn install_replaces_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("built.efi");
        let dest = dir.path().join("EFI/bootsig/grubx64.efi");
        std::fs::write(&image, "new").unwrap();
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, "old").unwrap();
        install(&image, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
        assert!(!dest.with_extension("efi.new").exists());
    }

    #[test]
    fn digest_is_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(
            image_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
