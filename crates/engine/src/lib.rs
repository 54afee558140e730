//! `fpe-engine`: structured format-preserving encryption.
//!
//! Values drawn from a dataset's input alphabet are encrypted with FF1 into
//! values of the same length over the dataset's output alphabet. The first
//! output symbol carries the key version in its high bits, so any historical
//! ciphertext decrypts under the key that produced it.
//!
//! Layering, leaves first:
//!
//! 1. [`crypto`]: alphabet arithmetic and the FF1 cipher.
//! 2. [`dataset`]: validated dataset definitions.
//! 3. [`cache`]: the single-flight cache shared by datasets and keys.
//! 4. [`keys`]: cipher contexts per (dataset, key version).
//! 5. [`codec`]: [`StructuredCodec`] with encrypt, decrypt and search.
//! 6. [`usage`]: usage aggregation and reporting.
//!
//! Network access, key unwrapping and usage delivery are supplied by the
//! host through the traits in [`upstream`] and [`usage`].

pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dataset;
pub mod keys;
pub mod telemetry;
pub mod upstream;
pub mod usage;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CachePolicy, SingleFlightCache};
pub use codec::StructuredCodec;
pub use config::Config;
pub use dataset::DatasetDescriptor;
pub use keys::{CipherContext, KeyVersionToken};
pub use upstream::{KeyService, KeyUnwrapper};
pub use usage::{UsageEvent, UsageRecorder, UsageSink, UsageTracker};

pub use common::FpeError;
