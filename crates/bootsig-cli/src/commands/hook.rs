//! `bootsig-hook` subcommands.

use std::path::PathBuf;

use bootsig_core::context::{HookAction, KernelSigningContext};
use bootsig_pipeline::privilege::require_root;
use bootsig_pipeline::runner::{Mode, Request};
use bootsig_pipeline::stages::audit::SignatureStatus;

use crate::args::{HookArgs, HookCommand};
use crate::commands::finish;
use crate::wiring;

/// Exit code of `verify` when any artifact is unsigned or badly signed.
pub const EXIT_UNVERIFIED: i32 = 1;

/// Build the request for a kernel lifecycle event.
///
/// # Errors
///
/// Returns an error if the event names no kernel.
pub fn kernel_request(
    action: HookAction,
    abi: String,
    kernel_path: Option<PathBuf>,
    signed_source: Option<PathBuf>,
) -> anyhow::Result<Request> {
    let ctx = KernelSigningContext::new(action, Some(abi), kernel_path, signed_source)?;
    Ok(Request {
        mode: Mode::Hook(ctx),
        passthrough: Vec::new(),
    })
}

/// Run one `bootsig-hook` subcommand and return the process exit code.
///
/// # Errors
///
/// Returns an error if the hook fails.
pub async fn run_hook(args: HookArgs) -> anyhow::Result<i32> {
    let config = wiring::load(args.config.as_deref())?;
    match args.command {
        HookCommand::Kernel {
            action,
            abi,
            kernel_path,
            signed_source,
        } => {
            require_root()?;
            let request = kernel_request(action, abi, kernel_path, signed_source)?;
            let outcome = wiring::system_pipeline(config).run(&request).await?;
            Ok(finish(&outcome))
        }
        HookCommand::PackageRemoved { args } => {
            require_root()?;
            Ok(wiring::system_pipeline(config).restore_stock(&args).await?)
        }
        HookCommand::Verify => {
            let entries = wiring::system_pipeline(config).audit().await?;
            for entry in &entries {
                println!("{:<14} {}", entry.status.to_string(), entry.path.display());
            }
            let clean = entries.iter().all(|e| e.status == SignatureStatus::Verified);
            Ok(if clean { 0 } else { EXIT_UNVERIFIED })
        }
    }
}
