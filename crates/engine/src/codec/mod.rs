//! Structured encryption: dataset rules around FF1, with the key version
//! carried in the ciphertext.
//!
//! # Responsibilities
//!
//! - Resolve the dataset and the cipher context (active version to encrypt,
//!   embedded version to decrypt) through the caches.
//! - Split values into clear and encrypted parts per the dataset rules.
//! - Re-encode between the input and output alphabets and embed the key
//!   version in the high bits of the first output digit.
//! - Record one usage event per successful operation.
//!
//! # Module invariants
//!
//! - Plaintexts, ciphertexts and key bytes never appear in log fields.
//! - Validation and crypto failures are returned as-is, never retried.

mod layout;

use std::sync::Arc;

use tracing::{debug, warn};

use common::protocol::{DatasetType, UsageAction};
use common::FpeError;

use crate::cache::CachePolicy;
use crate::dataset::{DatasetDescriptor, DatasetResolver};
use crate::keys::{CipherContext, KeyResolver, KeyVersionToken};
use crate::upstream::{KeyService, KeyUnwrapper};
use crate::usage::{UsageEvent, UsageRecorder};

use layout::Layout;

/// Encrypts and decrypts values of structured datasets.
///
/// Cheap to clone; clones share caches, collaborators and the usage recorder.
pub struct StructuredCodec<S, U, R> {
    identity: Arc<str>,
    service: Arc<S>,
    datasets: DatasetResolver<S>,
    keys: KeyResolver<S, U>,
    usage: Arc<R>,
}

impl<S, U, R> Clone for StructuredCodec<S, U, R> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            service: Arc::clone(&self.service),
            datasets: self.datasets.clone(),
            keys: self.keys.clone(),
            usage: Arc::clone(&self.usage),
        }
    }
}

impl<S, U, R> StructuredCodec<S, U, R>
where
    S: KeyService,
    U: KeyUnwrapper,
    R: UsageRecorder,
{
    /// Build a codec acting as `identity` (the id usage is attributed to).
    ///
    /// `policy` applies to both the dataset and the cipher-context cache.
    pub fn new(
        identity: impl Into<String>,
        service: Arc<S>,
        unwrapper: Arc<U>,
        usage: Arc<R>,
        policy: CachePolicy,
    ) -> Self {
        let identity: String = identity.into();
        Self {
            identity: Arc::from(identity),
            datasets: DatasetResolver::new(Arc::clone(&service), policy),
            keys: KeyResolver::new(Arc::clone(&service), unwrapper, policy),
            service,
            usage,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Encrypt `plaintext` under the dataset's active key version.
    ///
    /// # Errors
    ///
    /// [`FpeError::InvalidCharacter`] for a symbol outside the input alphabet,
    /// [`FpeError::InvalidLength`] when the encryptable part is out of
    /// bounds, [`FpeError::InvalidKeyVersion`] when the active version cannot
    /// be embedded, and upstream or key material failures.
    pub async fn encrypt(&self, dataset: &str, plaintext: &str) -> Result<String, FpeError> {
        let descriptor = self.datasets.resolve(dataset).await?;
        let ctx = self
            .keys
            .resolve(&descriptor, KeyVersionToken::Active)
            .await?;
        let ciphertext = encrypt_with(&descriptor, &ctx, plaintext)?;
        debug!(dataset, key_version = ctx.version(), "encrypted");
        self.record(dataset, UsageAction::Encrypt, ctx.version());
        Ok(ciphertext)
    }

    /// Decrypt `ciphertext` with the key version embedded in it.
    ///
    /// # Errors
    ///
    /// As [`StructuredCodec::encrypt`] over the output alphabet, plus
    /// [`FpeError::InvalidKeyVersion`] when the embedded version is unknown,
    /// including an upstream failure to fetch it, or the ciphertext cannot
    /// have been produced by this dataset.
    pub async fn decrypt(&self, dataset: &str, ciphertext: &str) -> Result<String, FpeError> {
        let descriptor = self.datasets.resolve(dataset).await?;
        let prepared = Prepared::from_ciphertext(&descriptor, ciphertext)?;
        let version = prepared.version;
        let ctx = self
            .keys
            .resolve(&descriptor, KeyVersionToken::Version(version))
            .await
            .map_err(|e| match e {
                FpeError::Upstream(detail) => FpeError::invalid_key_version(
                    dataset,
                    format!("embedded key version {version} could not be resolved: {detail}"),
                ),
                other => other,
            })?;
        let plaintext = prepared.decrypt(&descriptor, &ctx)?;
        debug!(dataset, key_version = version, "decrypted");
        self.record(dataset, UsageAction::Decrypt, version);
        Ok(plaintext)
    }

    /// Encrypt `plaintext` under every key version of the dataset, indexed by
    /// version. The [`StructuredCodec::encrypt`] result is among them.
    ///
    /// Fetches the dataset and all of its keys in one upstream call and seeds
    /// both caches with the result.
    ///
    /// # Errors
    ///
    /// As [`StructuredCodec::encrypt`], plus [`FpeError::InvalidDataset`] for
    /// an invalid bundled definition or one naming another dataset.
    pub async fn encrypt_for_search(
        &self,
        dataset: &str,
        plaintext: &str,
    ) -> Result<Vec<String>, FpeError> {
        let bundle = self.service.fetch_dataset_and_keys(dataset).await?;
        if bundle.ffs.name != dataset {
            warn!(
                dataset,
                bundled = %bundle.ffs.name,
                "key bundle names a different dataset"
            );
            return Err(FpeError::invalid_dataset(
                dataset,
                format!("key bundle describes dataset {}", bundle.ffs.name),
            ));
        }
        let descriptor = Arc::new(DatasetDescriptor::from_payload(&bundle.ffs)?);
        self.datasets.insert(Arc::clone(&descriptor));

        let contexts = self.keys.seed_all(&descriptor, &bundle).await?;
        let mut out = Vec::with_capacity(contexts.len());
        for ctx in &contexts {
            out.push(encrypt_with(&descriptor, ctx, plaintext)?);
        }
        for ctx in &contexts {
            self.record(dataset, UsageAction::Encrypt, ctx.version());
        }
        debug!(dataset, versions = out.len(), "encrypted for search");
        Ok(out)
    }

    /// Drop every cached dataset and cipher context.
    pub fn clear_caches(&self) {
        self.datasets.clear();
        self.keys.clear();
    }

    fn record(&self, dataset: &str, action: UsageAction, key_version: u32) {
        self.usage.record(UsageEvent {
            identity: self.identity.to_string(),
            dataset: dataset.to_owned(),
            dataset_group: String::new(),
            action,
            dataset_type: DatasetType::Structured,
            key_version,
            count: 1,
        });
    }
}

fn check_length(dataset: &DatasetDescriptor, len: usize) -> Result<(), FpeError> {
    if len < dataset.min_input_length() || len > dataset.max_input_length() {
        return Err(FpeError::InvalidLength {
            len,
            min: dataset.min_input_length(),
            max: dataset.max_input_length(),
        });
    }
    Ok(())
}

fn encrypt_with(
    dataset: &DatasetDescriptor,
    ctx: &CipherContext,
    plaintext: &str,
) -> Result<String, FpeError> {
    let layout = Layout::split(dataset, plaintext);
    let trimmed = layout.trimmed();
    if let Some(&c) = trimmed.iter().find(|c| !dataset.input().contains(**c)) {
        return Err(FpeError::InvalidCharacter(c));
    }
    check_length(dataset, trimmed.len())?;

    let text: String = trimmed.iter().collect();
    let encrypted = ctx.ff1().encrypt(&text)?;
    let value = dataset.input().to_integer(&encrypted)?;
    let mut out = dataset.output().to_digits_padded(&value, trimmed.len());
    embed_version(dataset, &mut out, ctx.version())?;
    Ok(layout.assemble(&out))
}

/// `out[0] := output[index(out[0]) + (version << msb_encoding_bits)]`
fn embed_version(
    dataset: &DatasetDescriptor,
    out: &mut [char],
    version: u32,
) -> Result<(), FpeError> {
    let output = dataset.output();
    let Some(first) = out.first_mut() else {
        return Ok(());
    };
    let digit = output
        .digit(*first)
        .ok_or(FpeError::InvalidCharacter(*first))?;
    let combined = u64::from(digit) + (u64::from(version) << dataset.msb_encoding_bits());
    *first = u32::try_from(combined)
        .ok()
        .and_then(|i| output.symbol(i))
        .ok_or_else(|| {
            FpeError::invalid_key_version(
                dataset.name(),
                format!(
                    "key version {version} does not fit in an output alphabet of {} symbols",
                    output.radix()
                ),
            )
        })?;
    Ok(())
}

/// A ciphertext split and stripped of its key version, ready for FF1.
struct Prepared {
    layout: Layout,
    digits: Vec<char>,
    version: u32,
}

impl Prepared {
    fn from_ciphertext(dataset: &DatasetDescriptor, ciphertext: &str) -> Result<Self, FpeError> {
        let output = dataset.output();
        let layout = Layout::split(dataset, ciphertext);
        let mut digits = layout.trimmed();
        if let Some(&c) = digits.iter().find(|c| !output.contains(**c)) {
            return Err(FpeError::InvalidCharacter(c));
        }
        check_length(dataset, digits.len())?;
        let Some(first) = digits.first().and_then(|c| output.digit(*c)) else {
            return Err(FpeError::InvalidLength {
                len: 0,
                min: dataset.min_input_length().max(1),
                max: dataset.max_input_length(),
            });
        };

        let bits = dataset.msb_encoding_bits();
        let version = first >> bits;
        let digit = first & ((1u32 << bits) - 1);
        let bound = dataset.max_first_digit(digits.len());
        if digit > bound {
            return Err(FpeError::invalid_key_version(
                dataset.name(),
                format!("leading digit {digit} exceeds the largest possible value {bound}"),
            ));
        }
        // digit <= first < radix
        if let Some(symbol) = output.symbol(digit) {
            digits[0] = symbol;
        }

        Ok(Self {
            layout,
            digits,
            version,
        })
    }

    fn decrypt(self, dataset: &DatasetDescriptor, ctx: &CipherContext) -> Result<String, FpeError> {
        let n = self.digits.len();
        let value = dataset.output().digits_to_integer(&self.digits)?;
        let encrypted = dataset.input().to_digits_padded(&value, n);
        if encrypted.len() > n {
            return Err(FpeError::invalid_key_version(
                dataset.name(),
                format!("ciphertext does not re-encode into {n} input symbols"),
            ));
        }
        let text: String = encrypted.into_iter().collect();
        let plain: Vec<char> = ctx.ff1().decrypt(&text)?.chars().collect();
        Ok(self.layout.assemble(&plain))
    }
}
