//! Interrupt and termination handling.

use std::future::Future;

use log::warn;

/// Exit code after SIGINT.
pub const EXIT_INTERRUPTED: i32 = 130;
/// Exit code after SIGTERM.
pub const EXIT_TERMINATED: i32 = 143;

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!("cannot watch SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending::<()>().await;
}

/// Drive `work` to completion unless SIGINT or SIGTERM arrives first.
///
/// On a signal `work` is dropped, which kills any running tool and releases
/// every temporary file and lock it holds, and the conventional exit code is
/// returned.
///
/// # Errors
///
/// Returns the error of `work`.
pub async fn until_signal<F>(work: F) -> anyhow::Result<i32>
where
    F: Future<Output = anyhow::Result<i32>>,
{
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; cleaning up");
            Ok(EXIT_INTERRUPTED)
        }
        () = terminated() => {
            warn!("terminated; cleaning up");
            Ok(EXIT_TERMINATED)
        }
    }
}
