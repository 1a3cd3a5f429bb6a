//! Firmware boot-entry registration.

use bootsig_core::config::Config;
use bootsig_core::types::NewBootEntry;
use bootsig_services::firmware::FirmwareBootService;
use log::{debug, info, warn};

use crate::error::PipelineError;

/// Delete every firmware entry whose label matches `label`. Failures are logged,
/// never returned. Returns the number of entries deleted.
pub async fn purge_entries(firmware: &dyn FirmwareBootService, label: &str) -> usize {
    let entries = match firmware.list_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("could not list boot entries: {e}");
            return 0;
        }
    };
    let mut deleted = 0;
    for entry in entries.iter().filter(|e| e.matches_label(label)) {
        match firmware.delete_entry(&entry.number).await {
            Ok(()) => {
                debug!("deleted Boot{} ({})", entry.number, entry.label);
                deleted += 1;
            }
            Err(e) => debug!("Boot{} not deleted: {e}", entry.number),
        }
    }
    deleted
}

/// Replace any entries for this loader with a single fresh one.
///
/// # Errors
///
/// Returns [`PipelineError::Tool`] if the ESP cannot be resolved or the entry
/// cannot be created. Stale-entry deletion never fails the call.
pub async fn register(firmware: &dyn FirmwareBootService, config: &Config) -> Result<NewBootEntry, PipelineError> {
    let purged = purge_entries(firmware, &config.label).await;
    let location = firmware.resolve_esp(&config.esp_dir).await?;
    let entry = NewBootEntry {
        label: config.label.clone(),
        location,
        loader: config.firmware_loader_path(),
    };
    firmware.create_entry(&entry).await?;
    info!(
        "registered boot entry '{}' on {} partition {} (replaced {purged})",
        entry.label,
        entry.location.disk.display(),
        entry.location.partition
    );
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootsig_services::memory::MemoryFirmware;

    fn labelled(firmware: &MemoryFirmware, label: &str) -> usize {
        firmware
            .entries()
            .iter()
            .filter(|e| e.matches_label(label))
            .count()
    }

    #[tokio::test]
    async fn leaves_exactly_one_entry() {
        for stale in [0usize, 1, 3] {
            let mut labels = vec!["debian", "UEFI PXEv4"];
            labels.extend(std::iter::repeat("BootSig").take(stale));
            let firmware = MemoryFirmware::with_labels(&labels);
            register(&firmware, &Config::default()).await.unwrap();
            assert_eq!(labelled(&firmware, "bootsig"), 1, "{stale} stale entries");
            assert_eq!(firmware.entries().len(), 3);
        }
    }

    #[tokio::test]
    async fn delete_failures_do_not_block_creation() {
        let firmware = MemoryFirmware::with_labels(&["bootsig"]).failing_deletes();
        let entry = register(&firmware, &Config::default()).await.unwrap();
        assert_eq!(entry.loader, "\\EFI\\bootsig\\grubx64.efi");
        assert_eq!(firmware.created().len(), 1);
    }

    #[tokio::test]
    async fn unrelated_entries_survive() {
        let firmware = MemoryFirmware::with_labels(&["debian", "bootsig (old)"]);
        register(&firmware, &Config::default()).await.unwrap();
        let labels: Vec<String> = firmware.entries().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec!["debian".to_owned(), "bootsig".to_owned()]);
    }
}
