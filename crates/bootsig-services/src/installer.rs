//! The unmodified bootloader installer this tool stands in front of.

use std::path::PathBuf;

use log::debug;

use crate::error::ServiceError;
use crate::process::ToolRunner;
use crate::BoxFuture;

/// Runs the stock installer exactly as if it had been invoked directly.
pub trait StockInstaller: Send + Sync {
    /// Run the stock installer with `args`, streams attached to ours.
    ///
    /// Returns its exit code (`1` if it was killed by a signal).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if it cannot be started.
    fn run<'a>(&'a self, args: &'a [String]) -> BoxFuture<'a, Result<i32, ServiceError>>;
}

/// [`StockInstaller`] that executes a program on disk.
#[derive(Debug, Clone)]
pub struct CommandStockInstaller {
    program: PathBuf,
}

impl CommandStockInstaller {
    /// Wrap the installer at `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl StockInstaller for CommandStockInstaller {
    fn run<'a>(&'a self, args: &'a [String]) -> BoxFuture<'a, Result<i32, ServiceError>> {
        Box::pin(async move {
            debug!("handing over to {}", self.program.display());
            let status = ToolRunner::passthrough(&self.program, args).await?;
            Ok(status.code().unwrap_or(1))
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exit_code_is_propagated() {
        let installer = CommandStockInstaller::new("sh");
        let code = installer
            .run(&["-c".to_owned(), "exit 7".to_owned()])
            .await
            .unwrap();
        assert_eq!(code, 7);
    }
}
