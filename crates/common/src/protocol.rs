//! Payload types exchanged with the engine's collaborators.
//!
//! These types mirror the JSON documents returned by the key/config service and
//! the usage report posted back to it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Dataset definition
// ---------------------------------------------------------------------------

/// Raw dataset definition as delivered by the key/config service.
///
/// This is the untrusted wire form; the engine normalizes and validates it
/// into a descriptor before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPayload {
    /// Dataset name.
    pub name: String,
    /// Minimum number of encryptable (non-passthrough) characters.
    pub min_input_length: usize,
    /// Maximum number of encryptable (non-passthrough) characters.
    pub max_input_length: usize,
    /// Alphabet of plaintext symbols.
    pub input_character_set: String,
    /// Alphabet of ciphertext symbols.
    pub output_character_set: String,
    /// Legacy passthrough set, used when no passthrough rule is present.
    #[serde(default)]
    pub passthrough: String,
    /// Number of low bits of the first output digit left for data; the key
    /// version lives above them.
    pub msb_encoding_bits: u32,
    /// Base64-encoded default tweak.
    #[serde(default)]
    pub tweak: String,
    /// Lower tweak length bound.
    #[serde(default)]
    pub tweak_min_len: Option<usize>,
    /// Upper tweak length bound (0 = unbounded).
    #[serde(default)]
    pub tweak_max_len: Option<usize>,
    /// Partial-encryption and passthrough rules, in arbitrary order.
    #[serde(default)]
    pub passthrough_rules: Vec<RulePayload>,
}

/// The kind of a dataset rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Keep the first N encryptable characters verbatim.
    Prefix,
    /// Keep the last N encryptable characters verbatim.
    Suffix,
    /// Carry a set of characters unchanged to the same position.
    Passthrough,
}

/// One `{type, value, priority}` rule from a dataset definition.
///
/// `value` is a length for prefix/suffix rules and a character set string for
/// passthrough rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePayload {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub value: serde_json::Value,
    pub priority: i64,
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Key material for a single key version of a dataset.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMaterialPayload {
    /// Passphrase-protected RSA private key (PEM).
    pub encrypted_private_key: String,
    /// Base64 RSA-OAEP-wrapped data key.
    pub wrapped_data_key: String,
    /// The key version this material belongs to.
    pub key_number: u32,
}

impl std::fmt::Debug for KeyMaterialPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterialPayload")
            .field("encrypted_private_key", &"[REDACTED]")
            .field("wrapped_data_key", &"[REDACTED]")
            .field("key_number", &self.key_number)
            .finish()
    }
}

/// A dataset definition together with every historical key version, as
/// returned by the bulk endpoint used for search encryption.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetKeysPayload {
    /// The dataset definition.
    pub ffs: DatasetPayload,
    /// Passphrase-protected RSA private key (PEM) shared by all key versions.
    pub encrypted_private_key: String,
    /// The currently active key version.
    pub current_key_number: u32,
    /// Base64 wrapped data keys indexed by key version, `0..=current_key_number`.
    pub keys: Vec<String>,
}

impl std::fmt::Debug for DatasetKeysPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetKeysPayload")
            .field("ffs", &self.ffs.name)
            .field("current_key_number", &self.current_key_number)
            .field("keys", &self.keys.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Usage report
// ---------------------------------------------------------------------------

/// Operation a usage record counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAction {
    Encrypt,
    Decrypt,
}

/// Dataset family a usage record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Structured,
    Unstructured,
}

/// One aggregated usage counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(rename = "datasets")]
    pub dataset: String,
    #[serde(rename = "dataset_groups")]
    pub dataset_group: String,
    pub api_key: String,
    pub count: u64,
    pub key_number: u32,
    pub action: UsageAction,
    pub dataset_type: DatasetType,
    pub product: String,
    pub product_version: String,
    pub api_version: String,
    /// Seconds since the Unix epoch of the first aggregated call.
    pub first_call_timestamp: u64,
    /// Seconds since the Unix epoch of the last aggregated call.
    pub last_call_timestamp: u64,
}

/// Body of a usage report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub usage: Vec<UsageRecord>,
}

impl UsageReport {
    /// Returns `true` if the report carries no records.
    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }
}
