//! Interactive passphrase dialog.

use bootsig_core::types::Passphrase;
use zeroize::Zeroize;

use crate::error::ServiceError;
use crate::process::ToolRunner;
use crate::BoxFuture;

/// Asks the operator for the signing key passphrase.
pub trait PassphrasePrompt: Send + Sync {
    /// Ask for the passphrase. `attempt` starts at 1.
    ///
    /// Returns `Ok(None)` if the operator cancelled the dialog.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the dialog cannot be shown.
    fn ask_passphrase(&self, attempt: u32) -> BoxFuture<'_, Result<Option<Passphrase>, ServiceError>>;

    /// Ask whether to try again after the passphrase was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the dialog cannot be shown.
    fn confirm_retry(&self) -> BoxFuture<'_, Result<bool, ServiceError>>;
}

/// [`PassphrasePrompt`] drawn with `whiptail` on the controlling terminal.
#[derive(Debug, Clone)]
pub struct WhiptailPrompt {
    runner: ToolRunner,
    title: String,
}

impl WhiptailPrompt {
    /// Create a prompt whose dialogs carry `title`.
    #[must_use]
    pub fn new(runner: ToolRunner, title: impl Into<String>) -> Self {
        Self {
            runner,
            title: title.into(),
        }
    }
}

impl PassphrasePrompt for WhiptailPrompt {
    fn ask_passphrase(&self, attempt: u32) -> BoxFuture<'_, Result<Option<Passphrase>, ServiceError>> {
        Box::pin(async move {
            let text = if attempt <= 1 {
                "Enter the passphrase of the boot signing key:".to_owned()
            } else {
                format!("Passphrase rejected. Enter it again (attempt {attempt}):")
            };
            let output = self
                .runner
                .interactive(
                    "whiptail",
                    ["--title", self.title.as_str(), "--passwordbox", text.as_str(), "10", "70"],
                )
                .await?;
            if !output.status.success() {
                return Ok(None);
            }
            // whiptail reports the entered text on stderr.
            let mut raw = output.stderr;
            let secret = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_owned();
            raw.zeroize();
            Ok(Some(Passphrase::new(secret)))
        })
    }

    fn confirm_retry(&self) -> BoxFuture<'_, Result<bool, ServiceError>> {
        Box::pin(async move {
            let output = self
                .runner
                .interactive(
                    "whiptail",
                    [
                        "--title",
                        self.title.as_str(),
                        "--yesno",
                        "The passphrase could not unlock the signing key. Try again?",
                        "10",
                        "70",
                    ],
                )
                .await?;
            Ok(output.status.success())
        })
    }
}
