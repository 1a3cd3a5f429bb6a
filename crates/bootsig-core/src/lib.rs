//! Core domain types for the bootsig secure-boot signing toolchain.
#![deny(warnings, clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

pub mod artifact;
/// Operator configuration, read from `/etc/bootsig/bootsig.toml`.
pub mod config;
pub mod context;
pub mod types;
