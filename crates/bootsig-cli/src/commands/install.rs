//! `bootsig-install`.

use bootsig_core::context::KernelSigningContext;
use bootsig_pipeline::privilege::require_root;
use bootsig_pipeline::runner::{Mode, Request};

use crate::args::InstallArgs;
use crate::commands::finish;
use crate::wiring;

/// Choose the invocation mode. The hook environment protocol, read through
/// `lookup`, wins over `--sign-all`.
///
/// # Errors
///
/// Returns an error if the hook environment is present but malformed.
pub fn request_for<F>(args: &InstallArgs, lookup: F) -> anyhow::Result<Request>
where
    F: Fn(&str) -> Option<String>,
{
    let mode = match KernelSigningContext::from_lookup(lookup)? {
        Some(ctx) => Mode::Hook(ctx),
        None if args.wants_sign_all() => Mode::SignAll,
        None => Mode::Install,
    };
    Ok(Request {
        mode,
        passthrough: args.stock_args(),
    })
}

/// Run `bootsig-install` and return the process exit code.
///
/// # Errors
///
/// Returns an error if any pipeline step fails.
pub async fn run_install(args: InstallArgs) -> anyhow::Result<i32> {
    require_root()?;
    let request = request_for(&args, |key| std::env::var(key).ok())?;
    let pipeline = wiring::system_pipeline(wiring::load(args.config.as_deref())?);
    let outcome = pipeline.run(&request).await?;
    Ok(finish(&outcome))
}
