//! Rollback and cleanup: hand over to the stock installer, strip stock boot
//! files after a secure install, and restore stock behaviour on removal.

use std::io::ErrorKind;
use std::path::Path;

use bootsig_core::config::Config;
use bootsig_services::firmware::FirmwareBootService;
use bootsig_services::installer::StockInstaller;
use log::{debug, info, warn};

use crate::error::PipelineError;
use crate::stages::registrar;

/// Run the stock installer with `args` untouched and return its exit code.
///
/// # Errors
///
/// Returns [`PipelineError::Tool`] if the installer cannot be started.
pub async fn fall_back(installer: &dyn StockInstaller, args: &[String]) -> Result<i32, PipelineError> {
    Ok(installer.run(args).await?)
}

fn remove_path(path: &Path) -> std::io::Result<bool> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete the stock builder's leftovers and blank the stock configuration.
///
/// Paths that contain the signed image or the curated configuration are left alone.
/// Returns the number of paths removed.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if an existing artifact cannot be removed.
pub fn strip_stock_artifacts(config: &Config) -> Result<usize, PipelineError> {
    let image = config.image_path();
    let mut removed = 0;
    for path in &config.stock_artifacts {
        if image.starts_with(path) || config.curated_config.starts_with(path) {
            warn!("not stripping {}: it holds bootsig files", path.display());
            continue;
        }
        if remove_path(path)? {
            debug!("stripped {}", path.display());
            removed += 1;
        }
    }
    if config.stock_config != config.curated_config && config.stock_config.is_file() {
        std::fs::write(&config.stock_config, b"")?;
        debug!("blanked {}", config.stock_config.display());
    }
    info!("removed {removed} stock boot artifacts");
    Ok(removed)
}

/// Reinstall the stock bootloader; if that succeeds, remove this loader's
/// boot entries and signed image. Returns the stock installer's exit code.
///
/// # Errors
///
/// Returns [`PipelineError`] if the installer cannot be started or the image
/// cannot be removed.
pub async fn restore_stock(
    config: &Config,
    installer: &dyn StockInstaller,
    firmware: &dyn FirmwareBootService,
    args: &[String],
) -> Result<i32, PipelineError> {
    let code = installer.run(args).await?;
    if code != 0 {
        warn!("stock installer exited with {code}; leaving the signed loader in place");
        return Ok(code);
    }
    let purged = registrar::purge_entries(firmware, &config.label).await;
    let image = config.image_path();
    if remove_path(&image)? {
        info!("removed {}", image.display());
    }
    if let Some(dir) = image.parent() {
        // Only succeeds when empty.
        let _ = std::fs::remove_dir(dir);
    }
    info!("stock bootloader restored ({purged} boot entries removed)");
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootsig_services::memory::{MemoryFirmware, RecordingStockInstaller};
    use tempfile::tempdir;

    fn config_in(root: &Path) -> Config {
        Config {
            esp_dir: root.join("efi"),
            curated_config: root.join("grub/grub.cfg"),
            stock_config: root.join("efi/EFI/debian/grub.cfg"),
            stock_artifacts: vec![
                root.join("efi/EFI/debian/grubx64.efi"),
                root.join("efi/EFI/debian/shimx64.efi"),
                root.join("grub/x86_64-efi"),
                root.join("grub/grubenv"),
            ],
            ..Config::default()
        }
    }

    #[test]
    fn strips_files_and_directories() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        std::fs::create_dir_all(root.path().join("efi/EFI/debian")).unwrap();
        std::fs::create_dir_all(root.path().join("grub/x86_64-efi")).unwrap();
        std::fs::write(root.path().join("efi/EFI/debian/grubx64.efi"), "stock").unwrap();
        std::fs::write(root.path().join("grub/x86_64-efi/normal.mod"), "mod").unwrap();
        std::fs::write(&config.stock_config, "configfile /boot/grub/grub.cfg").unwrap();
        std::fs::write(&config.curated_config, "curated").unwrap();

        assert_eq!(strip_stock_artifacts(&config).unwrap(), 2);
        assert!(!root.path().join("grub/x86_64-efi").exists());
        assert_eq!(std::fs::read_to_string(&config.stock_config).unwrap(), "");
        assert_eq!(std::fs::read_to_string(&config.curated_config).unwrap(), "curated");
    }

    #[test]
    fn never_strips_the_signed_image() {
        let root = tempdir().unwrap();
        let mut config = config_in(root.path());
        config.stock_artifacts.push(root.path().join("efi/EFI/bootsig"));
        let image = config.image_path();
        std::fs::create_dir_all(image.parent().unwrap()).unwrap();
        std::fs::write(&image, "signed").unwrap();
        strip_stock_artifacts(&config).unwrap();
        assert!(image.exists());
    }

    #[tokio::test]
    async fn restore_removes_image_and_entries() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        let image = config.image_path();
        std::fs::create_dir_all(image.parent().unwrap()).unwrap();
        std::fs::write(&image, "signed").unwrap();
        let firmware = MemoryFirmware::with_labels(&["debian", "bootsig"]);
        let installer = RecordingStockInstaller::new(0);

        let code = restore_stock(&config, &installer, &firmware, &[]).await.unwrap();
        assert_eq!(code, 0);
        assert!(!image.exists());
        assert_eq!(firmware.entries().len(), 1);
        assert_eq!(installer.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_restore_keeps_signed_loader() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        let image = config.image_path();
        std::fs::create_dir_all(image.parent().unwrap()).unwrap();
        std::fs::write(&image, "signed").unwrap();
        let firmware = MemoryFirmware::with_labels(&["bootsig"]);

        let code = restore_stock(&config, &RecordingStockInstaller::new(1), &firmware, &[])
            .await
            .unwrap();
        assert_eq!(code, 1);
        assert!(image.exists());
        assert_eq!(firmware.entries().len(), 1);
    }
}
