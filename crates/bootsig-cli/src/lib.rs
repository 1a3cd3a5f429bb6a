//! bootsig command-line entry points: argument parsing, wiring of the real
//! tool adapters, and signal handling.
#![deny(warnings, clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

pub mod args;
/// Command implementations shared by both binaries.
pub mod commands;
pub mod signals;
pub mod wiring;

/// Initialise logging at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
}
