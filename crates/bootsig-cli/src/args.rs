//! Command-line definitions for both binaries.

use std::path::PathBuf;

use bootsig_core::context::HookAction;
use clap::{Parser, Subcommand};

/// Flag that selects bulk-trust mode.
pub const SIGN_ALL_FLAG: &str = "--sign-all";

const CONFIG_FLAG: &str = "--bootsig-config";

/// `bootsig-install`: stands in for the stock bootloader installer.
///
/// Anything not recognised here is handed to the stock installer unchanged.
#[derive(Debug, Parser)]
#[command(
    name = "bootsig-install",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct InstallArgs {
    /// Sign every kernel and initramfs currently in the boot directory.
    #[arg(long = "sign-all")]
    pub sign_all: bool,

    /// Configuration file.
    #[arg(long = "bootsig-config", env = "BOOTSIG_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Arguments for the stock installer.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub passthrough: Vec<String>,
}

impl InstallArgs {
    /// Parse `argv`, keeping every argument meant for the stock installer
    /// exactly as given, `--` separators included.
    ///
    /// # Errors
    ///
    /// Returns the [`clap::Error`] for malformed bootsig flags.
    pub fn parse_raw<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        let mut args = Self::try_parse_from(&argv)?;
        let mut passthrough = Vec::new();
        let mut rest = argv.iter().skip(1);
        while let Some(arg) = rest.next() {
            if arg == CONFIG_FLAG {
                let value = rest.next();
                if args.config.is_none() {
                    args.config = value.map(PathBuf::from);
                }
            } else if let Some(value) = arg.strip_prefix("--bootsig-config=") {
                if args.config.is_none() {
                    args.config = Some(PathBuf::from(value));
                }
            } else {
                passthrough.push(arg.clone());
            }
        }
        args.passthrough = passthrough;
        Ok(args)
    }

    /// Whether bulk-trust mode was requested, wherever the flag appeared.
    #[must_use]
    pub fn wants_sign_all(&self) -> bool {
        self.sign_all || self.passthrough.iter().any(|a| a == SIGN_ALL_FLAG)
    }

    /// Arguments for the stock installer with our own flag removed.
    #[must_use]
    pub fn stock_args(&self) -> Vec<String> {
        self.passthrough
            .iter()
            .filter(|a| *a != SIGN_ALL_FLAG)
            .cloned()
            .collect()
    }
}

/// `bootsig-hook`: entry point for package-manager lifecycle hooks.
#[derive(Debug, Parser)]
#[command(name = "bootsig-hook", about = "bootsig lifecycle hooks", version)]
pub struct HookArgs {
    /// Configuration file.
    #[arg(long = "bootsig-config", env = "BOOTSIG_CONFIG", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Hook to run.
    #[command(subcommand)]
    pub command: HookCommand,
}

/// Hooks.
#[derive(Debug, Subcommand)]
pub enum HookCommand {
    /// A kernel package was installed or removed.
    Kernel {
        /// `postinst` or `postrm`.
        #[arg(value_parser = parse_action)]
        action: HookAction,
        /// Kernel ABI tag, e.g. `6.1.0-13-amd64`.
        abi: String,
        /// Kernel image path; derived from the ABI tag when omitted.
        kernel_path: Option<PathBuf>,
        /// Pre-signed kernel whose detached signature must verify first.
        #[arg(long, value_name = "PATH")]
        signed_source: Option<PathBuf>,
    },
    /// bootsig itself was removed: reinstall the stock bootloader.
    PackageRemoved {
        /// Arguments for the stock installer.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Report which kernels and initramfs images carry a valid signature.
    Verify,
}

fn parse_action(raw: &str) -> Result<HookAction, String> {
    raw.parse().map_err(|e| format!("{e}"))
}
