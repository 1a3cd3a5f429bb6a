//! Adapters between the bootsig pipeline and the external tools it drives.
//!
//! Every external collaborator sits behind a trait returning structured
//! results. The `Gpg*`, `Grub*`, `Efibootmgr` and `Whiptail*` types shell out
//! to the real tools; [`memory`] holds in-process stand-ins for tests.
#![deny(warnings, clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod firmware;
pub mod image;
pub mod installer;
pub mod keyring;
pub mod memory;
pub mod process;
pub mod prompt;
pub mod signing;

/// Boxed future returned by dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
