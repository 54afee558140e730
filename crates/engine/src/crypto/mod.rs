//! Format-preserving primitives: alphabet arithmetic and the FF1 cipher.
//!
//! This module is free of I/O and of any knowledge about datasets or key
//! versions. Everything here is synchronous, CPU-bound computation.

pub mod alphabet;
pub mod ff1;

pub use alphabet::{Alphabet, AlphabetError};
pub use ff1::{Ff1, Ff1Error, TweakBounds};
