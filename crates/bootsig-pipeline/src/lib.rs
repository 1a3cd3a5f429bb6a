//! bootsig signing pipeline: key discovery, staging, signing, image build,
//! firmware registration and kernel lifecycle handling.
#![deny(warnings, clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

pub mod error;
/// Exclusive run lock.
pub mod lock;
pub mod privilege;
/// Orchestration of a whole invocation.
pub mod runner;
/// One module per pipeline stage.
pub mod stages;
