//! Error taxonomy shared across crates.

use thiserror::Error;

/// Top-level error type surfaced by every public engine operation.
///
/// Variants map to stable machine-readable codes via [`FpeError::code`]:
/// - [`FpeError::InvalidAlphabet`] → `invalid_alphabet`
/// - [`FpeError::InvalidCharacter`] → `invalid_character`
/// - [`FpeError::InvalidLength`] → `invalid_length`
/// - [`FpeError::InvalidTweakLength`] → `invalid_tweak_length`
/// - [`FpeError::InvalidKeyMaterial`] → `invalid_key_material`
/// - [`FpeError::InvalidKeyVersion`] → `invalid_key_version`
/// - [`FpeError::InvalidDataset`] → `invalid_dataset`
/// - [`FpeError::Upstream`] → `upstream_failure`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FpeError {
    /// An alphabet is empty or otherwise unusable.
    #[error("invalid alphabet: {0}")]
    InvalidAlphabet(String),

    /// A symbol is not part of the alphabet it was checked against.
    #[error("invalid character found in the input: {0:?}")]
    InvalidCharacter(char),

    /// A text length falls outside the allowed bounds.
    #[error("invalid input length {len}: expected between {min} and {max}")]
    InvalidLength { len: usize, min: usize, max: usize },

    /// The effective tweak length falls outside the configured bounds.
    #[error("invalid tweak length {len}: expected between {min} and {max}")]
    InvalidTweakLength { len: usize, min: usize, max: usize },

    /// Key bytes could not be unwrapped or have an unusable size.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// A key version embedded in (or requested for) a ciphertext cannot be resolved.
    #[error("invalid key version for dataset {dataset}: {detail}")]
    InvalidKeyVersion { dataset: String, detail: String },

    /// A dataset definition violates one of the descriptor invariants.
    #[error("invalid dataset {dataset}: {reason}")]
    InvalidDataset { dataset: String, reason: String },

    /// A collaborator (key service, unwrapper, usage sink) failed.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl FpeError {
    /// Returns the machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            FpeError::InvalidAlphabet(_) => "invalid_alphabet",
            FpeError::InvalidCharacter(_) => "invalid_character",
            FpeError::InvalidLength { .. } => "invalid_length",
            FpeError::InvalidTweakLength { .. } => "invalid_tweak_length",
            FpeError::InvalidKeyMaterial(_) => "invalid_key_material",
            FpeError::InvalidKeyVersion { .. } => "invalid_key_version",
            FpeError::InvalidDataset { .. } => "invalid_dataset",
            FpeError::Upstream(_) => "upstream_failure",
        }
    }

    /// Shorthand for an [`FpeError::InvalidDataset`] naming the dataset.
    pub fn invalid_dataset(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        FpeError::InvalidDataset {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`FpeError::InvalidKeyVersion`] naming the dataset.
    pub fn invalid_key_version(dataset: impl Into<String>, detail: impl Into<String>) -> Self {
        FpeError::InvalidKeyVersion {
            dataset: dataset.into(),
            detail: detail.into(),
        }
    }
}
