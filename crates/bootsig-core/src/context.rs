//! Per-invocation kernel signing context handed from a lifecycle hook to the pipeline.
//!
//! Package-manager hooks historically communicate through environment
//! variables. Those are parsed exactly once, at the binary edge, via
//! [`KernelSigningContext::from_lookup`]; everything downstream receives the
//! typed struct.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::artifact::kernel_candidates;

/// Presence flag: set by a lifecycle hook.
pub const ENV_ACTION_HOOK: &str = "ACTION_HOOK";
/// Kernel ABI tag, may be empty.
pub const ENV_KERNEL_ABI: &str = "KERNEL_ABI";
/// Explicit kernel path, empty means "derive conventionally".
pub const ENV_KERNEL_PATH: &str = "KERNEL_PATH";
/// `postinst` or `postrm`.
pub const ENV_ACTION: &str = "ACTION";
/// Path of a pre-signed source kernel, empty means none.
pub const ENV_SIGNED_SOURCE: &str = "SIGNED_SOURCE";

/// Errors produced while building a [`KernelSigningContext`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// `ACTION` is not one of the known actions.
    #[error("unknown hook action '{0}' (expected postinst or postrm)")]
    UnknownAction(String),
    /// Neither an ABI tag nor an explicit path was given.
    #[error("hook needs a kernel ABI tag or an explicit kernel path")]
    NoKernel,
}

/// What a lifecycle hook asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// A kernel was installed (`postinst`).
    Install,
    /// A kernel was removed (`postrm`).
    Remove,
}

impl FromStr for HookAction {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postinst" => Ok(Self::Install),
            "postrm" => Ok(Self::Remove),
            other => Err(ContextError::UnknownAction(other.to_owned())),
        }
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => f.write_str("postinst"),
            Self::Remove => f.write_str("postrm"),
        }
    }
}

/// Transient state for one kernel install or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSigningContext {
    /// Install or remove.
    pub action: HookAction,
    /// Kernel ABI tag, e.g. `6.1.0-13-amd64`.
    pub abi: Option<String>,
    /// Explicit kernel path; `None` means derive from `abi`.
    pub kernel_path: Option<PathBuf>,
    /// Pre-signed source kernel whose signature must verify before re-signing.
    pub signed_source: Option<PathBuf>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl KernelSigningContext {
    /// Build a context, rejecting one that names no kernel at all.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoKernel`] if both `abi` and `kernel_path` are absent.
    pub fn new(
        action: HookAction,
        abi: Option<String>,
        kernel_path: Option<PathBuf>,
        signed_source: Option<PathBuf>,
    ) -> Result<Self, ContextError> {
        let abi = non_empty(abi);
        let kernel_path = kernel_path.filter(|p| !p.as_os_str().is_empty());
        if abi.is_none() && kernel_path.is_none() {
            return Err(ContextError::NoKernel);
        }
        Ok(Self {
            action,
            abi,
            kernel_path,
            signed_source: signed_source.filter(|p| !p.as_os_str().is_empty()),
        })
    }

    /// Parse the hook environment protocol through `lookup`.
    ///
    /// Returns `Ok(None)` when [`ENV_ACTION_HOOK`] is not set, i.e. this is not
    /// a hook invocation. A missing `ACTION` defaults to `postinst`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the action is unknown or no kernel is named.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(ENV_ACTION_HOOK).is_none() {
            return Ok(None);
        }
        let action = match non_empty(lookup(ENV_ACTION)) {
            Some(raw) => raw.parse()?,
            None => HookAction::Install,
        };
        Self::new(
            action,
            lookup(ENV_KERNEL_ABI),
            non_empty(lookup(ENV_KERNEL_PATH)).map(PathBuf::from),
            non_empty(lookup(ENV_SIGNED_SOURCE)).map(PathBuf::from),
        )
        .map(Some)
    }

    /// Kernel paths this context refers to: the explicit path, or every
    /// conventional candidate for the ABI tag in prefix order.
    #[must_use]
    pub fn kernel_paths(&self, boot_dir: &Path, prefixes: &[String]) -> Vec<PathBuf> {
        match (&self.kernel_path, &self.abi) {
            (Some(path), _) => vec![path.clone()],
            (None, Some(abi)) => kernel_candidates(boot_dir, prefixes, abi),
            (None, None) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn absent_flag_means_no_hook() {
        let ctx = KernelSigningContext::from_lookup(lookup_from(&[(ENV_KERNEL_ABI, "6.1")])).unwrap();
        assert!(ctx.is_none());
    }

    #[test]
    fn empty_strings_are_treated_as_absent() {
        let ctx = KernelSigningContext::from_lookup(lookup_from(&[
            (ENV_ACTION_HOOK, "1"),
            (ENV_ACTION, "postrm"),
            (ENV_KERNEL_ABI, "6.1.0-13-amd64"),
            (ENV_KERNEL_PATH, ""),
            (ENV_SIGNED_SOURCE, ""),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(ctx.action, HookAction::Remove);
        assert_eq!(ctx.kernel_path, None);
        assert_eq!(ctx.signed_source, None);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = KernelSigningContext::from_lookup(lookup_from(&[
            (ENV_ACTION_HOOK, "1"),
            (ENV_ACTION, "preinst"),
            (ENV_KERNEL_ABI, "6.1"),
        ]))
        .unwrap_err();
        assert_eq!(err, ContextError::UnknownAction("preinst".to_owned()));
    }

    #[test]
    fn context_without_kernel_is_rejected() {
        let err = KernelSigningContext::new(HookAction::Install, Some(String::new()), None, None).unwrap_err();
        assert_eq!(err, ContextError::NoKernel);
    }

    #[test]
    fn explicit_path_wins_over_abi() {
        let ctx = KernelSigningContext::new(
            HookAction::Install,
            Some("6.1".to_owned()),
            Some(PathBuf::from("/srv/kernel")),
            None,
        )
        .unwrap();
        let prefixes = vec!["vmlinuz-".to_owned()];
        assert_eq!(ctx.kernel_paths(Path::new("/boot"), &prefixes), vec![PathBuf::from("/srv/kernel")]);
    }
}
