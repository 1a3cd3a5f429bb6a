//! Runs one bootsig invocation from key discovery to boot-entry registration.

use std::path::PathBuf;
use std::sync::Arc;

use bootsig_core::config::Config;
use bootsig_core::context::KernelSigningContext;
use bootsig_core::types::NewBootEntry;
use bootsig_services::firmware::FirmwareBootService;
use bootsig_services::image::ImageBuildService;
use bootsig_services::installer::StockInstaller;
use bootsig_services::keyring::KeyringService;
use bootsig_services::prompt::PassphrasePrompt;
use bootsig_services::signing::SigningService;
use log::{debug, info, warn};

use crate::error::PipelineError;
use crate::lock::RunLock;
use crate::stages::audit::{self, AuditEntry};
use crate::stages::kernel::{self, KernelReport, Signer};
use crate::stages::keystore::{self, ExportedKey, KeyProbe};
use crate::stages::staging::StagingTree;
use crate::stages::{cleanup, image, registrar, signature};

/// The external collaborators a pipeline drives.
#[derive(Clone)]
pub struct Services {
    /// Detached-signature keyring.
    pub keyring: Arc<dyn KeyringService>,
    /// Signing and verification.
    pub signer: Arc<dyn SigningService>,
    /// Bootloader build tooling.
    pub images: Arc<dyn ImageBuildService>,
    /// Firmware boot entries.
    pub firmware: Arc<dyn FirmwareBootService>,
    /// Passphrase dialog.
    pub prompt: Arc<dyn PassphrasePrompt>,
    /// The unmodified installer.
    pub stock: Arc<dyn StockInstaller>,
}

/// What kind of invocation this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Install the signed bootloader.
    Install,
    /// Install, then trust and sign everything in the boot directory.
    SignAll,
    /// Install, then apply a kernel lifecycle event.
    Hook(KernelSigningContext),
}

/// One invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Invocation kind.
    pub mode: Mode,
    /// Arguments forwarded verbatim to the stock installer on fallback.
    pub passthrough: Vec<String>,
}

/// What a successful secure install did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Detached signatures written into the staging tree.
    pub staged_signatures: usize,
    /// Installed image.
    pub image: PathBuf,
    /// Hex SHA-256 of the installed image.
    pub image_sha256: String,
    /// Firmware entry created for the image.
    pub boot_entry: NewBootEntry,
    /// Stock artifacts removed.
    pub stripped: usize,
    /// Kernel-stage results.
    pub kernels: KernelReport,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The boot chain was rebuilt and signed.
    Secured(Report),
    /// No keys: the stock installer ran instead and exited with `exit_code`.
    FellBack {
        /// Stock installer exit code.
        exit_code: i32,
    },
    /// A hook fired on a machine without keys; nothing to do.
    NothingToDo,
}

impl Outcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FellBack { exit_code } => *exit_code,
            Self::Secured(_) | Self::NothingToDo => 0,
        }
    }
}

/// The signing-and-verification state machine.
pub struct Pipeline {
    config: Config,
    services: Services,
}

impl Pipeline {
    /// Create a pipeline over `services`.
    #[must_use]
    pub fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Run one invocation. Scoped files and the run lock are released on every
    /// return path and when the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on the first failing step; nothing after it runs.
    pub async fn run(&self, request: &Request) -> Result<Outcome, PipelineError> {
        self.config.validate()?;
        let _lock = RunLock::acquire(&self.config.lock_file)?;

        let identity = match keystore::probe(&self.config, self.services.keyring.as_ref()).await? {
            KeyProbe::Ready(identity) => identity,
            KeyProbe::Absent(reason) => return self.without_keys(request, reason).await,
        };
        info!("signing with {} key {}", identity.algorithm, identity.key_id);
        if let Mode::Hook(ctx) = &request.mode {
            kernel::preflight(&self.config, ctx, self.services.signer.as_ref()).await?;
        }

        let modules = image::required_modules(&self.config, &identity.algorithm)?;
        let public_key = ExportedKey::export(self.services.keyring.as_ref(), &identity.key_id).await?;
        let passphrase = keystore::acquire_passphrase(
            self.services.prompt.as_ref(),
            self.services.signer.as_ref(),
            &identity,
            self.config.passphrase_attempts,
        )
        .await?;

        let staging = StagingTree::assemble(self.services.images.as_ref(), &self.config).await?;
        let staged = signature::sign_files(
            self.services.signer.as_ref(),
            &identity,
            passphrase.path(),
            &staging.files()?,
        )
        .await?;
        info!("signed {} staged files", staged.len());

        let built = image::build(
            self.services.images.as_ref(),
            &self.config,
            &staging,
            public_key.path(),
            modules,
        )
        .await?;
        signature::sign_embedded_in_place(self.services.signer.as_ref(), &identity, built.path()).await?;
        let digest = image::image_digest(built.path())?;
        info!("image sha256 {digest}");

        let installed = self.config.image_path();
        image::install(built.path(), &installed)?;
        let boot_entry = registrar::register(self.services.firmware.as_ref(), &self.config).await?;
        let stripped = cleanup::strip_stock_artifacts(&self.config)?;

        let signer = Signer {
            service: self.services.signer.as_ref(),
            identity: &identity,
            passphrase_file: passphrase.path(),
        };
        let kernels = match &request.mode {
            Mode::Install => KernelReport::default(),
            Mode::SignAll => kernel::sign_all(&self.config, signer).await?,
            Mode::Hook(ctx) => kernel::apply_hook(&self.config, ctx, signer).await?,
        };

        Ok(Outcome::Secured(Report {
            staged_signatures: staged.len(),
            image: installed,
            image_sha256: digest,
            boot_entry,
            stripped,
            kernels,
        }))
    }

    async fn without_keys(&self, request: &Request, reason: String) -> Result<Outcome, PipelineError> {
        match request.mode {
            Mode::Install => {
                debug!("{reason}; running the stock installer");
                let exit_code = cleanup::fall_back(self.services.stock.as_ref(), &request.passthrough).await?;
                Ok(Outcome::FellBack { exit_code })
            }
            Mode::SignAll => Err(PipelineError::KeysRequired(reason)),
            Mode::Hook(_) => {
                info!("{reason}; boot artifacts stay unsigned");
                Ok(Outcome::NothingToDo)
            }
        }
    }

    /// Put the stock bootloader back after this tool is uninstalled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the lock is held or the stock installer cannot run.
    pub async fn restore_stock(&self, args: &[String]) -> Result<i32, PipelineError> {
        let _lock = RunLock::acquire(&self.config.lock_file)?;
        cleanup::restore_stock(
            &self.config,
            self.services.stock.as_ref(),
            self.services.firmware.as_ref(),
            args,
        )
        .await
    }

    /// Report the signature state of every boot artifact. Needs no keys.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the boot directory cannot be read.
    pub async fn audit(&self) -> Result<Vec<AuditEntry>, PipelineError> {
        let entries = audit::audit(&self.config, self.services.signer.as_ref()).await?;
        for entry in &entries {
            if entry.status != audit::SignatureStatus::Verified {
                warn!("{}: {}", entry.path.display(), entry.status);
            }
        }
        Ok(entries)
    }
}
