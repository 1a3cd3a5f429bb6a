//! Pipeline stages, in the order a secure install runs them.

pub mod keystore;
pub mod staging;
pub mod signature;
pub mod image;
pub mod registrar;
pub mod cleanup;
pub mod kernel;
pub mod audit;
