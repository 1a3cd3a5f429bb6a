use std::path::PathBuf;
use std::time::Duration;

use bootsig_core::config::{load_config, Config, ConfigError};
use tempfile::TempDir;

#[test]
fn operator_file_with_timeouts_section() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bootsig.toml");
    std::fs::write(
        &path,
        r#"
label = "Secure GRUB"
key_dir = "/srv/keys"
esp_dir = "/efi"
efi_subdir = "secure"
verification_modules = ["pgp", "gcry_sha512", "gcry_rsa"]

[timeouts]
image_build_secs = 1200
"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.label, "Secure GRUB");
    assert_eq!(config.certificate_path(), PathBuf::from("/srv/keys/db.crt"));
    assert_eq!(config.image_path(), PathBuf::from("/efi/EFI/secure/grubx64.efi"));
    assert_eq!(config.firmware_loader_path(), "\\EFI\\secure\\grubx64.efi");
    assert_eq!(config.timeouts.image_build(), Duration::from_secs(1200));
    assert_eq!(config.timeouts.tool(), Config::default().timeouts.tool());
}

#[test]
fn empty_label_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bootsig.toml");
    std::fs::write(&path, "label = \"  \"\n").unwrap();
    assert!(matches!(
        load_config(&path),
        Err(ConfigError::Invalid { key: "label", .. })
    ));
}

#[test]
fn unknown_keys_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bootsig.toml");
    std::fs::write(&path, "lable = \"typo\"\n").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn default_stock_installer_is_the_diverted_original() {
    let config = Config::default();
    assert_eq!(config.stock_installer, PathBuf::from("/usr/sbin/grub-install.stock"));
    assert_ne!(config.stock_installer, PathBuf::from("/usr/sbin/grub-install"));
}
