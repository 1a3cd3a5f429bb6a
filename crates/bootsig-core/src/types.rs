//! Validated newtype wrappers for core domain primitives.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Error returned when a domain value fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The value is empty.
    #[error("value must not be empty")]
    Empty,
    /// The key identifier has an unexpected length.
    #[error("key identifier must be 8 to 40 hex characters, got {0}")]
    InvalidKeyIdLength(usize),
    /// The value contains non-hex characters.
    #[error("value contains non-hex characters")]
    InvalidHex,
    /// A boot entry number is not a four-digit hex number.
    #[error("boot entry number must be 4 hex digits, got '{0}'")]
    InvalidBootNumber(String),
}

/// A stable signing key identifier (long key id or fingerprint), stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// Create a new `KeyId` from a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the string is empty, not 8 to 40
    /// characters long, or contains non-hex characters.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !(8..=40).contains(&raw.len()) {
            return Err(ValidationError::InvalidKeyIdLength(raw.len()));
        }
        if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidHex);
        }
        Ok(Self(raw.to_ascii_uppercase()))
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public-key algorithm of the signing key, as reported by the keyring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// RSA (OpenPGP algorithm 1).
    Rsa,
    /// DSA (OpenPGP algorithm 17).
    Dsa,
    /// Anything the bootloader cannot verify.
    Other(String),
}

impl KeyAlgorithm {
    /// Map an OpenPGP public-key algorithm number to a [`KeyAlgorithm`].
    #[must_use]
    pub fn from_openpgp_id(id: &str) -> Self {
        match id.trim() {
            "1" | "2" | "3" => Self::Rsa,
            "17" => Self::Dsa,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Name of the bootloader module that verifies signatures made with this algorithm.
    #[must_use]
    pub fn verifier_module(&self) -> Option<&'static str> {
        match self {
            Self::Rsa => Some("gcry_rsa"),
            Self::Dsa => Some("gcry_dsa"),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => f.write_str("rsa"),
            Self::Dsa => f.write_str("dsa"),
            Self::Other(id) => write!(f, "algorithm {id}"),
        }
    }
}

/// A usable signing keypair: keyring key plus the executable-signing certificate and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// Keyring user-id label the key was looked up by.
    pub label: String,
    /// Stable identifier of the keyring signing key.
    pub key_id: KeyId,
    /// Public-key algorithm of the keyring key.
    pub algorithm: KeyAlgorithm,
    /// Certificate used for embedded executable signatures.
    pub certificate: PathBuf,
    /// Private key used for embedded executable signatures.
    pub private_key: PathBuf,
}

/// A decrypted key passphrase. Zeroised on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wrap a passphrase string.
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self(secret)
    }

    /// Expose the secret bytes.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Firmware boot entry number, e.g. `0003`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BootNumber(String);

impl BootNumber {
    /// Parse a four-digit hex boot number.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidBootNumber`] if `raw` is not four hex digits.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(raw.to_ascii_uppercase()))
        } else {
            Err(ValidationError::InvalidBootNumber(raw.to_owned()))
        }
    }

    /// Return the boot number string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BootNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A firmware-resident boot option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    /// Entry number.
    pub number: BootNumber,
    /// Human-readable label.
    pub label: String,
}

impl BootEntry {
    /// Return `true` if this entry's label contains `label`, ignoring case.
    #[must_use]
    pub fn matches_label(&self, label: &str) -> bool {
        self.label
            .to_lowercase()
            .contains(&label.to_lowercase())
    }
}

/// The disk and partition backing the EFI system partition mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspLocation {
    /// Whole-disk device, e.g. `/dev/nvme0n1`.
    pub disk: PathBuf,
    /// One-based partition number on `disk`.
    pub partition: u32,
}

/// Request to create one firmware boot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBootEntry {
    /// Label shown in the firmware boot menu.
    pub label: String,
    /// Where the loader lives.
    pub location: EspLocation,
    /// Loader path relative to the ESP root, backslash-separated.
    pub loader: String,
}
