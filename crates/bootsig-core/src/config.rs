//! Operator configuration read from `/etc/bootsig/bootsig.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bootsig/bootsig.toml";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV: &str = "BOOTSIG_CONFIG";

/// Errors during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`Config`].
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is present but unusable.
    #[error("invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Per-operation time limits for external tools, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Keyring queries, signing, verification and firmware calls.
    pub tool_secs: u64,
    /// Directory assembly and standalone image build.
    pub image_build_secs: u64,
    /// Interactive passphrase dialog.
    pub prompt_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            tool_secs: 120,
            image_build_secs: 600,
            prompt_secs: 900,
        }
    }
}

impl Timeouts {
    /// Limit for ordinary tool invocations.
    #[must_use]
    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }

    /// Limit for image assembly and build.
    #[must_use]
    pub fn image_build(&self) -> Duration {
        Duration::from_secs(self.image_build_secs)
    }

    /// Limit for the passphrase dialog.
    #[must_use]
    pub fn prompt(&self) -> Duration {
        Duration::from_secs(self.prompt_secs)
    }
}

/// Runtime configuration shared by every bootsig entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Firmware boot-entry label owned by this tool.
    pub label: String,
    /// Directory holding the signing material.
    pub key_dir: PathBuf,
    /// Certificate file name inside `key_dir`.
    pub certificate_name: String,
    /// Private key file name inside `key_dir`.
    pub private_key_name: String,
    /// Keyring user id of the detached-signature key.
    pub key_label: String,
    /// Kernel and initramfs directory.
    pub boot_dir: PathBuf,
    /// Mount point of the EFI system partition.
    pub esp_dir: PathBuf,
    /// Directory under `<esp_dir>/EFI` that receives the signed loader.
    pub efi_subdir: String,
    /// File name of the signed loader image.
    pub loader_name: String,
    /// Bootloader platform target, e.g. `x86_64-efi`.
    pub grub_target: String,
    /// Curated bootloader configuration copied into every build.
    pub curated_config: PathBuf,
    /// The unmodified installer this tool overrides.
    ///
    /// `bootsig-install` takes over the stock name, so this points at the
    /// diverted original rather than `/usr/sbin/grub-install`.
    pub stock_installer: PathBuf,
    /// Stock configuration stub on the ESP, blanked after a secure install.
    pub stock_config: PathBuf,
    /// Unsigned leftovers of the stock installer, removed after a secure install.
    pub stock_artifacts: Vec<PathBuf>,
    /// Modules embedded into the standalone image for signature checking.
    pub verification_modules: Vec<String>,
    /// Lock file serialising concurrent invocations.
    pub lock_file: PathBuf,
    /// Kernel file-name prefixes, tried in order when deriving a path from an ABI tag.
    pub kernel_prefixes: Vec<String>,
    /// Initramfs file-name prefixes.
    pub initrd_prefixes: Vec<String>,
    /// How many passphrase prompts are offered before asking whether to retry.
    pub passphrase_attempts: u32,
    /// External tool time limits.
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            label: "bootsig".to_owned(),
            key_dir: PathBuf::from("/etc/bootsig/keys"),
            certificate_name: "db.crt".to_owned(),
            private_key_name: "db.key".to_owned(),
            key_label: "bootsig".to_owned(),
            boot_dir: PathBuf::from("/boot"),
            esp_dir: PathBuf::from("/boot/efi"),
            efi_subdir: "bootsig".to_owned(),
            loader_name: "grubx64.efi".to_owned(),
            grub_target: "x86_64-efi".to_owned(),
            curated_config: PathBuf::from("/boot/grub/grub.cfg"),
            stock_installer: PathBuf::from("/usr/sbin/grub-install.stock"),
            stock_config: PathBuf::from("/boot/efi/EFI/debian/grub.cfg"),
            stock_artifacts: [
                "/boot/efi/EFI/debian/grubx64.efi",
                "/boot/efi/EFI/debian/shimx64.efi",
                "/boot/efi/EFI/debian/mmx64.efi",
                "/boot/efi/EFI/debian/fbx64.efi",
                "/boot/efi/EFI/debian/BOOTX64.CSV",
                "/boot/grub/fonts",
                "/boot/grub/locale",
                "/boot/grub/x86_64-efi",
                "/boot/grub/grubenv",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            verification_modules: ["pgp", "gcry_sha256", "gcry_sha512", "gcry_rsa", "gcry_dsa"]
                .iter()
                .map(|m| (*m).to_owned())
                .collect(),
            lock_file: PathBuf::from("/run/lock/bootsig.lock"),
            kernel_prefixes: vec!["vmlinuz-".to_owned(), "vmlinux-".to_owned()],
            initrd_prefixes: vec!["initrd.img-".to_owned(), "initramfs-".to_owned()],
            passphrase_attempts: 3,
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Path of the executable-signing certificate.
    #[must_use]
    pub fn certificate_path(&self) -> PathBuf {
        self.key_dir.join(&self.certificate_name)
    }

    /// Path of the executable-signing private key.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.key_dir.join(&self.private_key_name)
    }

    /// Absolute path of the signed loader on the ESP.
    #[must_use]
    pub fn image_path(&self) -> PathBuf {
        self.esp_dir
            .join("EFI")
            .join(&self.efi_subdir)
            .join(&self.loader_name)
    }

    /// Loader path as the firmware expects it: ESP-relative and backslash-separated.
    #[must_use]
    pub fn firmware_loader_path(&self) -> String {
        format!("\\EFI\\{}\\{}", self.efi_subdir, self.loader_name)
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty label, no kernel prefixes,
    /// a zero passphrase budget, or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "label",
                reason: "must not be empty".to_owned(),
            });
        }
        if self.kernel_prefixes.is_empty() {
            return Err(ConfigError::Invalid {
                key: "kernel_prefixes",
                reason: "at least one prefix is required".to_owned(),
            });
        }
        if self.passphrase_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "passphrase_attempts",
                reason: "must be at least 1".to_owned(),
            });
        }
        let t = &self.timeouts;
        if t.tool_secs == 0 || t.image_build_secs == 0 || t.prompt_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeouts",
                reason: "time limits must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}

/// Resolve the configuration path: explicit argument, then [`CONFIG_ENV`], then the default.
#[must_use]
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load and validate a [`Config`] from `path`; a missing file yields defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("no configuration at {}, using defaults", path.display());
            Config::default()
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.toml");
        std::fs::write(
            &path,
            "label = \"secure grub\"\nesp_dir = \"/efi\"\n[timeouts]\ntool_secs = 5\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.label, "secure grub");
        assert_eq!(cfg.image_path(), PathBuf::from("/efi/EFI/bootsig/grubx64.efi"));
        assert_eq!(cfg.timeouts.tool_secs, 5);
        assert_eq!(cfg.timeouts.image_build_secs, 600);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.toml");
        std::fs::write(&path, "label = [").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let cfg = Config {
            passphrase_attempts: 0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "passphrase_attempts", .. })
        ));
    }

    #[test]
    fn firmware_loader_path_uses_backslashes() {
        assert_eq!(Config::default().firmware_loader_path(), "\\EFI\\bootsig\\grubx64.efi");
    }
}
