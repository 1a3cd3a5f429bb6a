//! Bootloader directory assembly and standalone image build.

use std::path::{Path, PathBuf};

use crate::error::ServiceError;
use crate::process::ToolRunner;
use crate::BoxFuture;

/// Inputs of one standalone image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandaloneRequest {
    /// Platform target, e.g. `x86_64-efi`.
    pub target: String,
    /// Staged directory embedded as the image's `/boot/grub`.
    pub staging: PathBuf,
    /// OpenPGP public key embedded for signature checks.
    pub public_key: PathBuf,
    /// Modules preloaded into the image.
    pub modules: Vec<String>,
    /// Output image path.
    pub output: PathBuf,
}

/// The bootloader's own build tooling.
pub trait ImageBuildService: Send + Sync {
    /// Populate `dest` with every runtime file the bootloader needs for `target`.
    ///
    /// The builder may also emit its own loader image and configuration;
    /// callers are expected to discard those.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the builder fails.
    fn assemble_directory<'a>(&'a self, target: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Build a self-contained executable image from `request.staging`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the builder fails.
    fn build_standalone<'a>(&'a self, request: &'a StandaloneRequest) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// [`ImageBuildService`] backed by `grub-mknetdir` and `grub-mkstandalone`.
#[derive(Debug, Clone)]
pub struct GrubImageBuilder {
    runner: ToolRunner,
    /// Subdirectory the assembled tree lives under, relative to the staging root.
    subdir: String,
}

impl GrubImageBuilder {
    /// Create a builder that assembles into `<dest>/grub`.
    #[must_use]
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            subdir: "grub".to_owned(),
        }
    }
}

/// Arguments for `grub-mkstandalone` that realise `request`.
#[must_use]
pub fn standalone_args(request: &StandaloneRequest) -> Vec<String> {
    vec![
        format!("--format={}", request.target),
        format!("--output={}", request.output.display()),
        format!("--pubkey={}", request.public_key.display()),
        format!("--modules={}", request.modules.join(" ")),
        format!("boot/grub={}", request.staging.join("grub").display()),
    ]
}

impl ImageBuildService for GrubImageBuilder {
    fn assemble_directory<'a>(&'a self, target: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let args = [
                format!("--net-directory={}", dest.display()),
                format!("--subdir={}", self.subdir),
                format!("--directory=/usr/lib/grub/{target}"),
            ];
            self.runner.checked("grub-mknetdir", &args).await?;
            Ok(())
        })
    }

    fn build_standalone<'a>(&'a self, request: &'a StandaloneRequest) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.runner
                .checked("grub-mkstandalone", standalone_args(request))
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_args_embed_key_and_modules() {
        let request = StandaloneRequest {
            target: "x86_64-efi".to_owned(),
            staging: PathBuf::from("/tmp/stage"),
            public_key: PathBuf::from("/tmp/key.pub"),
            modules: vec!["pgp".to_owned(), "gcry_rsa".to_owned()],
            output: PathBuf::from("/tmp/out.efi"),
        };
        let args = standalone_args(&request);
        assert!(args.contains(&"--pubkey=/tmp/key.pub".to_owned()));
        assert!(args.contains(&"--modules=pgp gcry_rsa".to_owned()));
        assert_eq!(args.last().unwrap(), "boot/grub=/tmp/stage/grub");
    }
}
