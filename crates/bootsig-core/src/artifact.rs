//! Path conventions for signed artifacts and their detached signatures.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Extension appended to an artifact path to name its detached signature.
pub const SIGNATURE_EXTENSION: &str = "sig";

/// Return the detached signature path for `artifact` (`<path>.sig`).
#[must_use]
pub fn detached_signature_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(".");
    name.push(SIGNATURE_EXTENSION);
    PathBuf::from(name)
}

/// Return `true` if `path` names a detached signature rather than an artifact.
#[must_use]
pub fn is_signature_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == SIGNATURE_EXTENSION)
}

/// Conventional kernel paths for `abi` under `boot_dir`, one per prefix, in order.
#[must_use]
pub fn kernel_candidates(boot_dir: &Path, prefixes: &[String], abi: &str) -> Vec<PathBuf> {
    prefixes
        .iter()
        .map(|prefix| boot_dir.join(format!("{prefix}{abi}")))
        .collect()
}

/// Initramfs paths that belong to `abi` under `boot_dir`.
#[must_use]
pub fn initrd_candidates(boot_dir: &Path, prefixes: &[String], abi: &str) -> Vec<PathBuf> {
    prefixes
        .iter()
        .flat_map(|prefix| {
            [
                boot_dir.join(format!("{prefix}{abi}")),
                boot_dir.join(format!("{prefix}{abi}.img")),
            ]
        })
        .collect()
}

/// Return `true` if `file_name` is a kernel or initramfs for any of the given prefixes.
///
/// Signature files are never artifacts.
#[must_use]
pub fn is_boot_artifact(file_name: &str, kernel_prefixes: &[String], initrd_prefixes: &[String]) -> bool {
    if file_name.ends_with(".sig") {
        return false;
    }
    kernel_prefixes
        .iter()
        .chain(initrd_prefixes)
        .any(|prefix| file_name.len() > prefix.len() && file_name.starts_with(prefix.as_str()))
}
