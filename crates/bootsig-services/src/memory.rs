//! In-memory implementations of every adapter trait, for tests and dry runs.
//!
//! The fakes keep real files on disk where the pipeline expects files (signatures,
//! staged trees, images) but replace the cryptography with SHA-256 tags bound to
//! a key id, which is enough to detect tampering and wrong keys.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use bootsig_core::artifact::detached_signature_path;
use bootsig_core::types::{BootEntry, BootNumber, EspLocation, NewBootEntry, Passphrase, SigningIdentity};
use sha2::{Digest, Sha256};

use crate::error::ServiceError;
use crate::firmware::FirmwareBootService;
use crate::image::{ImageBuildService, StandaloneRequest};
use crate::installer::StockInstaller;
use crate::keyring::{KeyringService, SecretKeyInfo};
use crate::prompt::PassphrasePrompt;
use crate::signing::SigningService;
use crate::BoxFuture;

const EMBEDDED_MARKER: &[u8] = b"\n#bootsig-embedded:";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn failed(tool: &str, stderr: impl Into<String>) -> ServiceError {
    ServiceError::Failed {
        tool: tool.to_owned(),
        status: Some(2),
        stderr: stderr.into(),
    }
}

/// A [`KeyringService`] holding at most one secret key.
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    label: String,
    key: Option<SecretKeyInfo>,
}

impl MemoryKeyring {
    /// A keyring containing `key` under `label`.
    #[must_use]
    pub fn with_key(label: impl Into<String>, key: SecretKeyInfo) -> Self {
        Self {
            label: label.into(),
            key: Some(key),
        }
    }

    /// A keyring with no secret keys.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl KeyringService for MemoryKeyring {
    fn find_secret_key<'a>(&'a self, label: &'a str) -> BoxFuture<'a, Result<Option<SecretKeyInfo>, ServiceError>> {
        Box::pin(async move { Ok(self.key.clone().filter(|_| label == self.label)) })
    }

    fn export_public_key<'a>(
        &'a self,
        key_id: &'a bootsig_core::types::KeyId,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            std::fs::write(dest, format!("public key {key_id}"))?;
            Ok(())
        })
    }
}

/// Calls observed by a [`MemorySigner`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SignerLog {
    /// Artifacts that received a detached signature, in order.
    pub detached: Vec<PathBuf>,
    /// Outputs that received an embedded signature, in order.
    pub embedded: Vec<PathBuf>,
    /// Passphrase checks that were rejected.
    pub rejected: usize,
    /// Passphrase files read, in order.
    pub passphrase_files: Vec<PathBuf>,
}

/// A [`SigningService`] whose signatures are SHA-256 tags over key id and content.
#[derive(Debug)]
pub struct MemorySigner {
    key_id: String,
    passphrase: String,
    fail_on: Option<PathBuf>,
    log: Mutex<SignerLog>,
}

impl MemorySigner {
    /// A signer for `key_id` that accepts only `passphrase`.
    #[must_use]
    pub fn new(key_id: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            passphrase: passphrase.into(),
            fail_on: None,
            log: Mutex::new(SignerLog::default()),
        }
    }

    /// Make every signing attempt on `path` fail.
    #[must_use]
    pub fn failing_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.fail_on = Some(path.into());
        self
    }

    /// The detached signature this signer would produce for `content`.
    #[must_use]
    pub fn tag_for(&self, content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key_id.as_bytes());
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Snapshot of the calls seen so far.
    #[must_use]
    pub fn log(&self) -> SignerLog {
        lock(&self.log).clone()
    }

    fn check_path(&self, path: &Path) -> Result<(), ServiceError> {
        if self.fail_on.as_deref() == Some(path) {
            return Err(failed("memory-signer", format!("refusing to sign {}", path.display())));
        }
        Ok(())
    }

    fn split_embedded(content: &[u8]) -> (&[u8], Option<&[u8]>) {
        match content
            .windows(EMBEDDED_MARKER.len())
            .rposition(|w| w == EMBEDDED_MARKER)
        {
            Some(pos) => (&content[..pos], Some(&content[pos + EMBEDDED_MARKER.len()..])),
            None => (content, None),
        }
    }
}

impl SigningService for MemorySigner {
    fn sign_detached<'a>(
        &'a self,
        _identity: &'a SigningIdentity,
        passphrase_file: &'a Path,
        artifact: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, ServiceError>> {
        Box::pin(async move {
            lock(&self.log).passphrase_files.push(passphrase_file.to_path_buf());
            let given = std::fs::read_to_string(passphrase_file)?;
            if given != self.passphrase {
                lock(&self.log).rejected += 1;
                return Err(failed("memory-signer", "bad passphrase"));
            }
            self.check_path(artifact)?;
            let content = std::fs::read(artifact)?;
            let signature = detached_signature_path(artifact);
            std::fs::write(&signature, self.tag_for(&content))?;
            lock(&self.log).detached.push(artifact.to_path_buf());
            Ok(signature)
        })
    }

    fn verify_detached<'a>(&'a self, artifact: &'a Path, signature: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let (Ok(content), Ok(tag)) = (std::fs::read(artifact), std::fs::read_to_string(signature)) else {
                return Ok(false);
            };
            Ok(tag == self.tag_for(&content))
        })
    }

    fn sign_embedded<'a>(
        &'a self,
        _identity: &'a SigningIdentity,
        input: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.check_path(output)?;
            let content = std::fs::read(input)?;
            let (body, _) = Self::split_embedded(&content);
            let mut signed = body.to_vec();
            signed.extend_from_slice(EMBEDDED_MARKER);
            signed.extend_from_slice(self.tag_for(body).as_bytes());
            std::fs::write(output, signed)?;
            lock(&self.log).embedded.push(output.to_path_buf());
            Ok(())
        })
    }

    fn has_embedded_signature<'a>(&'a self, binary: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let content = std::fs::read(binary)?;
            Ok(Self::split_embedded(&content).1.is_some())
        })
    }

    fn verify_embedded<'a>(&'a self, _identity: &'a SigningIdentity, binary: &'a Path) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            let content = std::fs::read(binary)?;
            Ok(match Self::split_embedded(&content) {
                (body, Some(tag)) => tag == self.tag_for(body).as_bytes(),
                (_, None) => false,
            })
        })
    }
}

/// An [`ImageBuildService`] that lays out a small fake bootloader tree.
#[derive(Debug, Default)]
pub struct MemoryImageBuilder {
    builds: Mutex<Vec<StandaloneRequest>>,
    stall: bool,
}

impl MemoryImageBuilder {
    /// Files written by [`ImageBuildService::assemble_directory`], relative to the staging root.
    pub const ASSEMBLED: &'static [&'static str] = &[
        "grub/x86_64-efi/normal.mod",
        "grub/x86_64-efi/pgp.mod",
        "grub/x86_64-efi/core.efi",
        "grub/fonts/unicode.pf2",
        "grub/grub.cfg",
    ];

    /// Create a builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose standalone builds never finish.
    #[must_use]
    pub fn stalling() -> Self {
        Self {
            stall: true,
            ..Self::default()
        }
    }

    /// Every build request received so far.
    #[must_use]
    pub fn builds(&self) -> Vec<StandaloneRequest> {
        lock(&self.builds).clone()
    }
}

impl ImageBuildService for MemoryImageBuilder {
    fn assemble_directory<'a>(&'a self, _target: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            for rel in Self::ASSEMBLED {
                let path = dest.join(rel);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, format!("stock {rel}"))?;
            }
            Ok(())
        })
    }

    fn build_standalone<'a>(&'a self, request: &'a StandaloneRequest) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            lock(&self.builds).push(request.clone());
            if self.stall {
                std::future::pending::<()>().await;
            }
            let mut image = b"MZ standalone\n".to_vec();
            for entry in walkdir::WalkDir::new(&request.staging).sort_by_file_name() {
                let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&request.staging).unwrap_or(entry.path());
                image.extend_from_slice(rel.to_string_lossy().as_bytes());
                image.push(b'\n');
                image.extend_from_slice(&std::fs::read(entry.path())?);
            }
            image.extend_from_slice(&std::fs::read(&request.public_key)?);
            std::fs::write(&request.output, image)?;
            Ok(())
        })
    }
}

/// A [`FirmwareBootService`] over an in-memory entry table.
#[derive(Debug)]
pub struct MemoryFirmware {
    entries: Mutex<Vec<BootEntry>>,
    created: Mutex<Vec<NewBootEntry>>,
    esp: EspLocation,
    fail_deletes: bool,
}

impl MemoryFirmware {
    /// Firmware pre-populated with entries labelled `labels`, numbered from `0000`.
    #[must_use]
    pub fn with_labels(labels: &[&str]) -> Self {
        let entries = labels
            .iter()
            .enumerate()
            .filter_map(|(i, label)| {
                Some(BootEntry {
                    number: BootNumber::new(&format!("{i:04X}")).ok()?,
                    label: (*label).to_owned(),
                })
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            created: Mutex::new(Vec::new()),
            esp: EspLocation {
                disk: PathBuf::from("/dev/vda"),
                partition: 1,
            },
            fail_deletes: false,
        }
    }

    /// Make every delete report failure.
    #[must_use]
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Current entry table.
    #[must_use]
    pub fn entries(&self) -> Vec<BootEntry> {
        lock(&self.entries).clone()
    }

    /// Every create request received so far.
    #[must_use]
    pub fn created(&self) -> Vec<NewBootEntry> {
        lock(&self.created).clone()
    }
}

impl FirmwareBootService for MemoryFirmware {
    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<BootEntry>, ServiceError>> {
        Box::pin(async move { Ok(self.entries()) })
    }

    fn delete_entry<'a>(&'a self, number: &'a BootNumber) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            if self.fail_deletes {
                return Err(failed("memory-firmware", format!("cannot delete Boot{number}")));
            }
            let mut entries = lock(&self.entries);
            let before = entries.len();
            entries.retain(|e| &e.number != number);
            if entries.len() == before {
                return Err(failed("memory-firmware", format!("Boot{number} not found")));
            }
            Ok(())
        })
    }

    fn create_entry<'a>(&'a self, entry: &'a NewBootEntry) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let mut entries = lock(&self.entries);
            let next = (0u16..=0xFFFF)
                .map(|n| format!("{n:04X}"))
                .find(|n| entries.iter().all(|e| e.number.as_str() != n))
                .ok_or_else(|| failed("memory-firmware", "no free boot number"))?;
            entries.push(BootEntry {
                number: BootNumber::new(&next).map_err(|e| failed("memory-firmware", e.to_string()))?,
                label: entry.label.clone(),
            });
            lock(&self.created).push(entry.clone());
            Ok(())
        })
    }

    fn resolve_esp<'a>(&'a self, _mount: &'a Path) -> BoxFuture<'a, Result<EspLocation, ServiceError>> {
        Box::pin(async move { Ok(self.esp.clone()) })
    }
}

/// A [`PassphrasePrompt`] that replays scripted answers.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<Option<String>>>,
    retries: Mutex<VecDeque<bool>>,
    asked: Mutex<u32>,
}

impl ScriptedPrompt {
    /// Replay `answers` to passphrase prompts (`None` = cancel) and `retries`
    /// to retry confirmations. Exhausted scripts cancel and decline.
    #[must_use]
    pub fn new(answers: &[Option<&str>], retries: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.map(str::to_owned)).collect()),
            retries: Mutex::new(retries.iter().copied().collect()),
            asked: Mutex::new(0),
        }
    }

    /// How many passphrase prompts were shown.
    #[must_use]
    pub fn asked(&self) -> u32 {
        *lock(&self.asked)
    }
}

impl PassphrasePrompt for ScriptedPrompt {
    fn ask_passphrase(&self, _attempt: u32) -> BoxFuture<'_, Result<Option<Passphrase>, ServiceError>> {
        Box::pin(async move {
            *lock(&self.asked) += 1;
            Ok(lock(&self.answers).pop_front().flatten().map(Passphrase::new))
        })
    }

    fn confirm_retry(&self) -> BoxFuture<'_, Result<bool, ServiceError>> {
        Box::pin(async move { Ok(lock(&self.retries).pop_front().unwrap_or(false)) })
    }
}

/// A [`StockInstaller`] that records its arguments and writes a marker file.
#[derive(Debug)]
pub struct RecordingStockInstaller {
    exit_code: i32,
    marker: Option<PathBuf>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingStockInstaller {
    /// An installer that exits with `exit_code`.
    #[must_use]
    pub fn new(exit_code: i32) -> Self {
        Self {
            exit_code,
            marker: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Also write the joined arguments to `marker` on every run.
    #[must_use]
    pub fn writing_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Argument lists of every run so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<String>> {
        lock(&self.calls).clone()
    }
}

impl StockInstaller for RecordingStockInstaller {
    fn run<'a>(&'a self, args: &'a [String]) -> BoxFuture<'a, Result<i32, ServiceError>> {
        Box::pin(async move {
            if let Some(marker) = &self.marker {
                std::fs::write(marker, args.join(" "))?;
            }
            lock(&self.calls).push(args.to_vec());
            Ok(self.exit_code)
        })
    }
}
