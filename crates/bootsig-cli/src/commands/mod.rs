pub mod hook;
pub mod install;

use bootsig_pipeline::runner::Outcome;
use log::info;

/// Log a one-line summary of `outcome` and return its exit code.
#[must_use]
pub fn finish(outcome: &Outcome) -> i32 {
    if let Outcome::Secured(report) = outcome {
        info!(
            "secure boot chain installed: {} ({} staged signatures, {} kernel artifacts signed, {} signatures removed)",
            report.image.display(),
            report.staged_signatures,
            report.kernels.signed.len(),
            report.kernels.unsigned.len()
        );
    }
    outcome.exit_code()
}
