//! [`DataKey`] and [`CipherContext`]: unwrapped key bytes and the FF1 context
//! keyed from them.

use zeroize::Zeroizing;

use common::FpeError;

use crate::crypto::Ff1;
use crate::dataset::DatasetDescriptor;

/// Raw data key bytes, overwritten with zeroes on drop.
pub struct DataKey(Zeroizing<Vec<u8>>);

impl DataKey {
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// An immutable FF1 context bound to one key version of one dataset.
///
/// Shared behind an `Arc` by every concurrent caller.
#[derive(Debug)]
pub struct CipherContext {
    ff1: Ff1,
    version: u32,
}

impl CipherContext {
    /// Key an FF1 context over the dataset's input alphabet and default tweak.
    ///
    /// # Errors
    ///
    /// Returns [`FpeError::InvalidKeyMaterial`] for keys that are not 16, 24
    /// or 32 bytes, or the FF1 error for an unusable alphabet or tweak.
    pub fn new(dataset: &DatasetDescriptor, key: &DataKey, version: u32) -> Result<Self, FpeError> {
        let ff1 = Ff1::with_alphabet(
            key.expose(),
            dataset.tweak(),
            dataset.tweak_bounds(),
            dataset.input().clone(),
        )?;
        Ok(Self { ff1, version })
    }

    pub fn ff1(&self) -> &Ff1 {
        &self.ff1
    }

    /// Key version this context encrypts under.
    pub fn version(&self) -> u32 {
        self.version
    }
}
