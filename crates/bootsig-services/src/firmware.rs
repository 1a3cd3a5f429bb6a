//! Firmware boot-entry management.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use bootsig_core::types::{BootEntry, BootNumber, EspLocation, NewBootEntry};
use log::debug;

use crate::error::ServiceError;
use crate::process::ToolRunner;
use crate::BoxFuture;

/// Enumerate, delete and create firmware boot entries.
pub trait FirmwareBootService: Send + Sync {
    /// List every boot entry.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the firmware variables cannot be read.
    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<BootEntry>, ServiceError>>;

    /// Delete one boot entry.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the entry cannot be deleted.
    fn delete_entry<'a>(&'a self, number: &'a BootNumber) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Create one boot entry.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the entry cannot be created.
    fn create_entry<'a>(&'a self, entry: &'a NewBootEntry) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Resolve the disk and partition backing the filesystem mounted at `mount`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the mount or its parent disk cannot be resolved.
    fn resolve_esp<'a>(&'a self, mount: &'a Path) -> BoxFuture<'a, Result<EspLocation, ServiceError>>;
}

/// [`FirmwareBootService`] backed by `efibootmgr`, `findmnt` and `lsblk`.
#[derive(Debug, Clone)]
pub struct Efibootmgr {
    runner: ToolRunner,
    sysfs_block: PathBuf,
}

impl Efibootmgr {
    /// Create an adapter.
    #[must_use]
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            sysfs_block: PathBuf::from("/sys/class/block"),
        }
    }
}

/// Parse `efibootmgr` output into boot entries, ignoring header lines.
#[must_use]
pub fn parse_boot_entries(listing: &str) -> Vec<BootEntry> {
    listing
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("Boot")?;
            let number = BootNumber::new(rest.get(..4)?).ok()?;
            let rest = rest[4..].strip_prefix('*').unwrap_or(&rest[4..]);
            let label = rest.trim_start().split('\t').next()?.trim_end();
            Some(BootEntry {
                number,
                label: label.to_owned(),
            })
        })
        .collect()
}

fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_owned()
}

impl FirmwareBootService for Efibootmgr {
    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<BootEntry>, ServiceError>> {
        Box::pin(async move {
            let output = self.runner.checked("efibootmgr", Vec::<&str>::new()).await?;
            Ok(parse_boot_entries(&String::from_utf8_lossy(&output.stdout)))
        })
    }

    fn delete_entry<'a>(&'a self, number: &'a BootNumber) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.runner
                .checked("efibootmgr", ["-q", "-b", number.as_str(), "-B"])
                .await?;
            Ok(())
        })
    }

    fn create_entry<'a>(&'a self, entry: &'a NewBootEntry) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let partition = entry.location.partition.to_string();
            let args = [
                OsStr::new("-q"),
                OsStr::new("-c"),
                OsStr::new("-d"),
                entry.location.disk.as_os_str(),
                OsStr::new("-p"),
                OsStr::new(&partition),
                OsStr::new("-L"),
                OsStr::new(&entry.label),
                OsStr::new("-l"),
                OsStr::new(&entry.loader),
            ];
            self.runner.checked("efibootmgr", args).await?;
            Ok(())
        })
    }

    fn resolve_esp<'a>(&'a self, mount: &'a Path) -> BoxFuture<'a, Result<EspLocation, ServiceError>> {
        Box::pin(async move {
            let output = self
                .runner
                .checked(
                    "findmnt",
                    [OsStr::new("-n"), OsStr::new("-o"), OsStr::new("SOURCE"), OsStr::new("--target"), mount.as_os_str()],
                )
                .await?;
            let source = first_line(&output.stdout);
            if source.is_empty() {
                return Err(ServiceError::Parse {
                    tool: "findmnt".to_owned(),
                    reason: format!("no source device for {}", mount.display()),
                });
            }

            let output = self
                .runner
                .checked("lsblk", ["-n", "-d", "-o", "PKNAME", source.as_str()])
                .await?;
            let parent = first_line(&output.stdout);
            if parent.is_empty() {
                return Err(ServiceError::Parse {
                    tool: "lsblk".to_owned(),
                    reason: format!("{source} is not a partition"),
                });
            }

            let name = Path::new(&source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let raw = tokio::fs::read_to_string(self.sysfs_block.join(&name).join("partition")).await?;
            let partition = raw.trim().parse::<u32>().map_err(|e| ServiceError::Parse {
                tool: "sysfs".to_owned(),
                reason: format!("partition number of {name}: {e}"),
            })?;
            debug!("ESP {} is /dev/{parent} partition {partition}", mount.display());
            Ok(EspLocation {
                disk: PathBuf::from("/dev").join(parent),
                partition,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
BootCurrent: 0002
Timeout: 1 seconds
BootOrder: 0002,0000,0001
Boot0000* debian\tHD(1,GPT,0b3f...,0x800,0x100000)/File(\\EFI\\debian\\shimx64.efi)
Boot0001  UEFI PXEv4\tPciRoot(0x0)/Pci(0x1,0x0)
Boot0002* BootSig\tHD(1,GPT,0b3f...,0x800,0x100000)/File(\\EFI\\bootsig\\grubx64.efi)
";

    #[test]
    fn parses_active_and_inactive_entries() {
        let entries = parse_boot_entries(LISTING);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].number.as_str(), "0000");
        assert_eq!(entries[0].label, "debian");
        assert_eq!(entries[1].label, "UEFI PXEv4");
        assert_eq!(entries[2].label, "BootSig");
    }

    #[test]
    fn header_lines_are_ignored() {
        assert!(parse_boot_entries("BootCurrent: 0002\nBootOrder: 0001\n").is_empty());
    }
}
