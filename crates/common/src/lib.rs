//! Common payload types and errors shared across `structured-fpe` crates.

pub mod error;
pub mod protocol;

pub use error::FpeError;
