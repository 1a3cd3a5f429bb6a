//! Staging tree: a private scratch copy of the bootloader runtime, ready to sign.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use bootsig_core::artifact::is_signature_file;
use bootsig_core::config::Config;
use bootsig_services::image::ImageBuildService;
use log::{debug, info};
use tempfile::{Builder, TempDir};
use walkdir::WalkDir;

use crate::error::PipelineError;

/// Name the bootloader reads its configuration from.
pub const CONFIG_NAME: &str = "grub.cfg";

/// Subdirectory of the staging root that becomes `/boot/grub` in the image.
pub const TREE_SUBDIR: &str = "grub";

/// An exclusively owned staging directory, removed recursively when dropped.
#[derive(Debug)]
pub struct StagingTree {
    dir: TempDir,
}

fn walk_error(e: walkdir::Error) -> PipelineError {
    PipelineError::Io(std::io::Error::other(e.to_string()))
}

fn is_untrusted(path: &Path) -> bool {
    path.extension() == Some(OsStr::new("efi")) || path.file_name() == Some(OsStr::new(CONFIG_NAME))
}

impl StagingTree {
    /// Populate a fresh staging directory through the builder's directory
    /// assembly, drop every loader image and configuration file the builder
    /// emitted, and install the curated configuration if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the builder fails or the tree cannot be edited.
    pub async fn assemble(images: &dyn ImageBuildService, config: &Config) -> Result<Self, PipelineError> {
        let dir = Builder::new().prefix("bootsig-stage-").tempdir()?;
        images.assemble_directory(&config.grub_target, dir.path()).await?;

        let untrusted: Vec<PathBuf> = WalkDir::new(dir.path())
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(walk_error)?
            .into_iter()
            .filter(|e| e.file_type().is_file() && is_untrusted(e.path()))
            .map(walkdir::DirEntry::into_path)
            .collect();
        for path in &untrusted {
            debug!("discarding builder output {}", path.display());
            std::fs::remove_file(path)?;
        }

        let tree = Self { dir };
        if config.curated_config.is_file() {
            let dest = tree.grub_dir().join(CONFIG_NAME);
            std::fs::create_dir_all(tree.grub_dir())?;
            std::fs::copy(&config.curated_config, &dest)?;
            debug!("staged {}", config.curated_config.display());
        } else {
            info!(
                "no configuration at {}; staging without one",
                config.curated_config.display()
            );
        }
        Ok(tree)
    }

    /// Staging root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory embedded as the image's `/boot/grub`.
    #[must_use]
    pub fn grub_dir(&self) -> PathBuf {
        self.dir.path().join(TREE_SUBDIR)
    }

    /// Every regular file in the tree except signatures, in a stable order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the tree cannot be walked.
    pub fn files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(self.dir.path()).sort_by_file_name() {
            let entry = entry.map_err(walk_error)?;
            if entry.file_type().is_file() && !is_signature_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootsig_services::memory::MemoryImageBuilder;
    use tempfile::tempdir;

    fn config_with_curated(path: PathBuf) -> Config {
        Config {
            curated_config: path,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn builder_loader_and_config_are_discarded() {
        let root = tempdir().unwrap();
        let config = config_with_curated(root.path().join("absent.cfg"));
        let tree = StagingTree::assemble(&MemoryImageBuilder::new(), &config)
            .await
            .unwrap();
        let files = tree.files().unwrap();
        assert!(!files.is_empty());
        assert!(files.iter().all(|f| !is_untrusted(f)), "{files:?}");
        assert!(files.iter().any(|f| f.ends_with("x86_64-efi/pgp.mod")));
    }

    #[tokio::test]
    async fn curated_config_replaces_builder_config() {
        let root = tempdir().unwrap();
        let curated = root.path().join("grub.cfg");
        std::fs::write(&curated, "set check_signatures=enforce\n").unwrap();
        let tree = StagingTree::assemble(&MemoryImageBuilder::new(), &config_with_curated(curated))
            .await
            .unwrap();
        let staged = std::fs::read_to_string(tree.grub_dir().join(CONFIG_NAME)).unwrap();
        assert_eq!(staged, "set check_signatures=enforce\n");
    }

    #[tokio::test]
    async fn tree_is_removed_on_drop() {
        let root = tempdir().unwrap();
        let config = config_with_curated(root.path().join("absent.cfg"));
        let tree = StagingTree::assemble(&MemoryImageBuilder::new(), &config)
            .await
            .unwrap();
        let path = tree.path().to_path_buf();
        drop(tree);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn signature_files_are_not_listed() {
        let root = tempdir().unwrap();
        let config = config_with_curated(root.path().join("absent.cfg"));
        let tree = StagingTree::assemble(&MemoryImageBuilder::new(), &config)
            .await
            .unwrap();
        std::fs::write(tree.grub_dir().join("x86_64-efi/pgp.mod.sig"), "sig").unwrap();
        assert!(tree.files().unwrap().iter().all(|f| !is_signature_file(f)));
    }
}
