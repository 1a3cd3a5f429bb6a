use std::path::PathBuf;

use bootsig_core::types::{EspLocation, KeyAlgorithm, KeyId, NewBootEntry, SigningIdentity};
use bootsig_services::firmware::FirmwareBootService;
use bootsig_services::memory::{MemoryFirmware, MemorySigner, ScriptedPrompt};
use bootsig_services::prompt::PassphrasePrompt;
use bootsig_services::signing::SigningService;
use tempfile::TempDir;

fn identity(dir: &TempDir) -> SigningIdentity {
    SigningIdentity {
        label: "bootsig".to_owned(),
        key_id: KeyId::new("1111222233334444").unwrap(),
        algorithm: KeyAlgorithm::Rsa,
        certificate: dir.path().join("db.crt"),
        private_key: dir.path().join("db.key"),
    }
}

#[tokio::test]
async fn detached_signature_binds_content() {
    let dir = TempDir::new().unwrap();
    let pass = dir.path().join("pass");
    std::fs::write(&pass, "pw").unwrap();
    let artifact = dir.path().join("vmlinuz-6.1");
    std::fs::write(&artifact, "kernel").unwrap();
    let signer = MemorySigner::new("1111222233334444", "pw");

    let sig = signer.sign_detached(&identity(&dir), &pass, &artifact).await.unwrap();
    assert!(signer.verify_detached(&artifact, &sig).await.unwrap());

    std::fs::write(&artifact, "kernel plus rootkit").unwrap();
    assert!(!signer.verify_detached(&artifact, &sig).await.unwrap());
}

#[tokio::test]
async fn wrong_passphrase_is_counted_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let pass = dir.path().join("pass");
    std::fs::write(&pass, "guess").unwrap();
    let artifact = dir.path().join("probe");
    std::fs::write(&artifact, "x").unwrap();
    let signer = MemorySigner::new("1111222233334444", "pw");

    assert!(signer.sign_detached(&identity(&dir), &pass, &artifact).await.is_err());
    assert_eq!(signer.log().rejected, 1);
    assert!(!dir.path().join("probe.sig").exists());
}

#[tokio::test]
async fn signature_from_another_key_does_not_verify() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("grubx64.efi");
    std::fs::write(&binary, "MZ").unwrap();
    let ours = MemorySigner::new("1111222233334444", "pw");
    let theirs = MemorySigner::new("AAAABBBBCCCCDDDD", "pw");

    theirs.sign_embedded(&identity(&dir), &binary, &binary).await.unwrap();
    assert!(ours.has_embedded_signature(&binary).await.unwrap());
    assert!(!ours.verify_embedded(&identity(&dir), &binary).await.unwrap());

    ours.sign_embedded(&identity(&dir), &binary, &binary).await.unwrap();
    assert!(ours.verify_embedded(&identity(&dir), &binary).await.unwrap());
}

#[tokio::test]
async fn firmware_numbers_new_entries_in_free_slots() {
    let firmware = MemoryFirmware::with_labels(&["debian", "bootsig"]);
    let stale = firmware.entries()[1].number.clone();
    firmware.delete_entry(&stale).await.unwrap();
    assert!(firmware.delete_entry(&stale).await.is_err());

    let entry = NewBootEntry {
        label: "bootsig".to_owned(),
        location: EspLocation {
            disk: PathBuf::from("/dev/vda"),
            partition: 1,
        },
        loader: "\\EFI\\bootsig\\grubx64.efi".to_owned(),
    };
    firmware.create_entry(&entry).await.unwrap();
    let numbers: Vec<String> = firmware
        .entries()
        .iter()
        .map(|e| e.number.as_str().to_owned())
        .collect();
    assert_eq!(numbers, vec!["0000".to_owned(), "0001".to_owned()]);
}

#[tokio::test]
async fn exhausted_script_cancels() {
    let prompt = ScriptedPrompt::new(&[Some("pw")], &[true]);
    assert_eq!(prompt.ask_passphrase(1).await.unwrap().unwrap().expose(), "pw");
    assert!(prompt.confirm_retry().await.unwrap());
    assert!(prompt.ask_passphrase(2).await.unwrap().is_none());
    assert!(!prompt.confirm_retry().await.unwrap());
    assert_eq!(prompt.asked(), 2);
}
