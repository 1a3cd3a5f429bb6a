//! Kernel and initramfs lifecycle: sign on install, unsign on removal, and the
//! bulk-trust sign-all mode.

use std::path::{Path, PathBuf};

use bootsig_core::artifact::{detached_signature_path, initrd_candidates, is_boot_artifact};
use bootsig_core::config::Config;
use bootsig_core::context::{HookAction, KernelSigningContext};
use bootsig_core::types::SigningIdentity;
use bootsig_services::signing::SigningService;
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::stages::signature;

/// What a kernel stage did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KernelReport {
    /// Artifacts that received a detached signature.
    pub signed: Vec<PathBuf>,
    /// Artifacts whose detached signature was deleted.
    pub unsigned: Vec<PathBuf>,
}

/// Signing material shared by every kernel operation.
#[derive(Clone, Copy)]
pub struct Signer<'a> {
    /// Signing backend.
    pub service: &'a dyn SigningService,
    /// Unlocked identity.
    pub identity: &'a SigningIdentity,
    /// File holding the verified passphrase.
    pub passphrase_file: &'a Path,
}

impl Signer<'_> {
    async fn detached(&self, artifact: &Path) -> Result<PathBuf, PipelineError> {
        signature::sign_artifact(self.service, self.identity, self.passphrase_file, artifact).await
    }
}

fn existing_initrds(config: &Config, ctx: &KernelSigningContext) -> Vec<PathBuf> {
    ctx.abi
        .as_deref()
        .map(|abi| initrd_candidates(&config.boot_dir, &config.initrd_prefixes, abi))
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.is_file())
        .collect()
}

/// Apply one hook action to the kernel (and initramfs) named by `ctx`.
///
/// # Errors
///
/// Returns [`PipelineError::KernelNotFound`] if an install names no existing
/// kernel, [`PipelineError::Verification`] if a pre-signed source does not
/// verify, or any signing failure.
pub async fn apply_hook(
    config: &Config,
    ctx: &KernelSigningContext,
    signer: Signer<'_>,
) -> Result<KernelReport, PipelineError> {
    match ctx.action {
        HookAction::Install => install(config, ctx, signer).await,
        HookAction::Remove => remove(config, ctx),
    }
}

async fn install(
    config: &Config,
    ctx: &KernelSigningContext,
    signer: Signer<'_>,
) -> Result<KernelReport, PipelineError> {
    let mut candidates = ctx.kernel_paths(&config.boot_dir, &config.kernel_prefixes);
    let kernel = match &ctx.signed_source {
        Some(source) => {
            let dest = candidates
                .first()
                .cloned()
                .ok_or_else(|| PipelineError::KernelNotFound(Vec::new()))?;
            adopt_presigned(source, &dest, signer).await?;
            dest
        }
        None => match candidates.iter().position(|p| p.is_file()) {
            Some(i) => candidates.swap_remove(i),
            None => return Err(PipelineError::KernelNotFound(candidates)),
        },
    };

    let mut report = KernelReport::default();
    signer.detached(&kernel).await?;
    report.signed.push(kernel);
    for initrd in existing_initrds(config, ctx) {
        signer.detached(&initrd).await?;
        report.signed.push(initrd);
    }
    info!("signed {} boot artifacts", report.signed.len());
    Ok(report)
}

/// Check that a hook install can complete before anything else is touched:
/// the kernel must be resolvable and a pre-signed source must verify.
///
/// # Errors
///
/// Returns [`PipelineError::KernelNotFound`] if no kernel can be located, or
/// [`PipelineError::Verification`] if the source does not verify.
pub async fn preflight(
    config: &Config,
    ctx: &KernelSigningContext,
    service: &dyn SigningService,
) -> Result<(), PipelineError> {
    if ctx.action != HookAction::Install {
        return Ok(());
    }
    let candidates = ctx.kernel_paths(&config.boot_dir, &config.kernel_prefixes);
    match &ctx.signed_source {
        Some(source) => {
            if candidates.is_empty() {
                return Err(PipelineError::KernelNotFound(candidates));
            }
            if !service
                .verify_detached(source, &detached_signature_path(source))
                .await?
            {
                return Err(PipelineError::Verification(source.clone()));
            }
        }
        None => {
            if !candidates.iter().any(|p| p.is_file()) {
                return Err(PipelineError::KernelNotFound(candidates));
            }
        }
    }
    Ok(())
}

/// Check `source` against its detached signature, place it at `dest`, and
/// give the copy an embedded signature of our own.
async fn adopt_presigned(source: &Path, dest: &Path, signer: Signer<'_>) -> Result<(), PipelineError> {
    let source_sig = detached_signature_path(source);
    if !signer.service.verify_detached(source, &source_sig).await? {
        return Err(PipelineError::Verification(source.to_path_buf()));
    }
    debug!("pre-signed source {} verified", source.display());
    if source != dest {
        std::fs::copy(source, dest)?;
    }
    signature::sign_embedded_in_place(signer.service, signer.identity, dest).await
}

fn remove(config: &Config, ctx: &KernelSigningContext) -> Result<KernelReport, PipelineError> {
    let mut report = KernelReport::default();
    let mut targets = ctx.kernel_paths(&config.boot_dir, &config.kernel_prefixes);
    if let Some(abi) = ctx.abi.as_deref() {
        targets.extend(initrd_candidates(&config.boot_dir, &config.initrd_prefixes, abi));
    }
    for target in targets {
        if signature::remove_signature(&target)? {
            report.unsigned.push(target);
        }
    }
    info!("removed {} detached signatures", report.unsigned.len());
    Ok(report)
}

/// Every kernel and initramfs directly under the boot directory, sorted.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the directory cannot be read.
pub fn boot_artifacts(config: &Config) -> Result<Vec<PathBuf>, PipelineError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(&config.boot_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file()
            && is_boot_artifact(&name, &config.kernel_prefixes, &config.initrd_prefixes)
        {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Trust and sign every kernel and initramfs currently in the boot directory.
///
/// Artifacts that already carry an embedded signature are re-signed with our
/// certificate first. Existing detached signatures are replaced, never duplicated.
///
/// # Errors
///
/// Returns the first signing failure.
pub async fn sign_all(config: &Config, signer: Signer<'_>) -> Result<KernelReport, PipelineError> {
    let mut report = KernelReport::default();
    for artifact in boot_artifacts(config)? {
        if signer.service.has_embedded_signature(&artifact).await? {
            signature::sign_embedded_in_place(signer.service, signer.identity, &artifact).await?;
        }
        signer.detached(&artifact).await?;
        report.signed.push(artifact);
    }
    info!("signed {} boot artifacts", report.signed.len());
    Ok(report)
}
