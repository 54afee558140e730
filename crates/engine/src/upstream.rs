//! Seams to the engine's external collaborators.
//!
//! Transport, authentication and retry policy live behind these traits; the
//! engine only sees payloads and [`FpeError::Upstream`] failures.

use std::future::Future;

use zeroize::Zeroizing;

use common::protocol::{DatasetKeysPayload, DatasetPayload, KeyMaterialPayload};
use common::FpeError;

/// Fetches dataset definitions and key material.
pub trait KeyService: Send + Sync + 'static {
    /// Fetch the definition of `dataset`.
    fn fetch_dataset(
        &self,
        dataset: &str,
    ) -> impl Future<Output = Result<DatasetPayload, FpeError>> + Send;

    /// Fetch the key material for `version`, or for the active version when
    /// `version` is `None`.
    ///
    /// An unknown version should be reported as [`FpeError::InvalidKeyVersion`].
    fn fetch_key(
        &self,
        dataset: &str,
        version: Option<u32>,
    ) -> impl Future<Output = Result<KeyMaterialPayload, FpeError>> + Send;

    /// Fetch the definition of `dataset` together with every key version.
    fn fetch_dataset_and_keys(
        &self,
        dataset: &str,
    ) -> impl Future<Output = Result<DatasetKeysPayload, FpeError>> + Send;
}

/// Recovers raw data key bytes from wrapped key material.
pub trait KeyUnwrapper: Send + Sync + 'static {
    /// Unwrap `wrapped` (already base64-decoded) using the passphrase-protected
    /// private key `encrypted_private_key`.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`FpeError::InvalidKeyMaterial`].
    fn unwrap_data_key(
        &self,
        encrypted_private_key: &str,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, FpeError>;
}
