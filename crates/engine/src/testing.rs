//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use zeroize::Zeroizing;

use common::protocol::{DatasetKeysPayload, DatasetPayload, KeyMaterialPayload, UsageReport};
use common::FpeError;

use crate::upstream::{KeyService, KeyUnwrapper};
use crate::usage::UsageSink;

pub(crate) const PRIVATE_KEY: &str = "-----BEGIN TEST KEY-----";
const WRAP_MASK: u8 = 0x5A;

/// Decimal SSN-style dataset: 62-symbol output, `-` passthrough, 4 data bits.
pub(crate) fn dataset_payload(name: &str) -> DatasetPayload {
    DatasetPayload {
        name: name.into(),
        min_input_length: 6,
        max_input_length: 255,
        input_character_set: "0123456789".into(),
        output_character_set: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz"
            .into(),
        passthrough: "-".into(),
        msb_encoding_bits: 4,
        tweak: String::new(),
        tweak_min_len: None,
        tweak_max_len: None,
        passthrough_rules: Vec::new(),
    }
}

fn raw_key(version: u32) -> Vec<u8> {
    (0u8..32).map(|i| i ^ (version as u8).wrapping_mul(37)).collect()
}

fn wrap(raw: &[u8]) -> String {
    BASE64.encode(raw.iter().map(|b| b ^ WRAP_MASK).collect::<Vec<u8>>())
}

#[derive(Default)]
pub(crate) struct FakeKeyService {
    datasets: Mutex<HashMap<String, DatasetPayload>>,
    versions: Mutex<HashMap<String, u32>>,
    latency: Option<Duration>,
    missing_version_is_upstream: AtomicBool,
    dataset_fetches: AtomicUsize,
    key_fetches: AtomicUsize,
    bundle_fetches: AtomicUsize,
}

impl FakeKeyService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub(crate) fn add_dataset(&self, payload: DatasetPayload) {
        let name = payload.name.clone();
        self.add_dataset_as(&name, payload);
    }

    /// Serve `payload` when `name` is requested, whatever its own name says.
    pub(crate) fn add_dataset_as(&self, name: &str, payload: DatasetPayload) {
        self.datasets.lock().unwrap().insert(name.into(), payload);
    }

    /// Answer unknown key versions with a plain not-found upstream error.
    pub(crate) fn report_missing_versions_as_upstream(&self) {
        self.missing_version_is_upstream.store(true, Ordering::SeqCst);
    }

    /// Register versions `0..count`; the last one is active.
    pub(crate) fn add_keys(&self, dataset: &str, count: u32) {
        self.versions.lock().unwrap().insert(dataset.into(), count);
    }

    pub(crate) fn bundle(&self, dataset: &str) -> Option<DatasetKeysPayload> {
        let count = *self.versions.lock().unwrap().get(dataset)?;
        let ffs = self
            .datasets
            .lock()
            .unwrap()
            .get(dataset)
            .cloned()
            .unwrap_or_else(|| dataset_payload(dataset));
        Some(DatasetKeysPayload {
            ffs,
            encrypted_private_key: PRIVATE_KEY.into(),
            current_key_number: count.checked_sub(1)?,
            keys: (0..count).map(|v| wrap(&raw_key(v))).collect(),
        })
    }

    pub(crate) fn dataset_fetches(&self) -> usize {
        self.dataset_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn key_fetches(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn bundle_fetches(&self) -> usize {
        self.bundle_fetches.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }
}

impl KeyService for FakeKeyService {
    async fn fetch_dataset(&self, dataset: &str) -> Result<DatasetPayload, FpeError> {
        self.dataset_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.datasets
            .lock()
            .unwrap()
            .get(dataset)
            .cloned()
            .ok_or_else(|| FpeError::Upstream(format!("dataset {dataset} not found (404)")))
    }

    async fn fetch_key(
        &self,
        dataset: &str,
        version: Option<u32>,
    ) -> Result<KeyMaterialPayload, FpeError> {
        self.key_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let count = self
            .versions
            .lock()
            .unwrap()
            .get(dataset)
            .copied()
            .ok_or_else(|| FpeError::Upstream(format!("no keys for {dataset} (404)")))?;
        let version = match version {
            Some(v) if v < count => v,
            Some(v) if self.missing_version_is_upstream.load(Ordering::SeqCst) => {
                return Err(FpeError::Upstream(format!(
                    "key version {v} of {dataset} not found (404)"
                )))
            }
            Some(v) => {
                return Err(FpeError::invalid_key_version(
                    dataset,
                    format!("key version {v} does not exist"),
                ))
            }
            None => count - 1,
        };
        Ok(KeyMaterialPayload {
            encrypted_private_key: PRIVATE_KEY.into(),
            wrapped_data_key: wrap(&raw_key(version)),
            key_number: version,
        })
    }

    async fn fetch_dataset_and_keys(&self, dataset: &str) -> Result<DatasetKeysPayload, FpeError> {
        self.bundle_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.bundle(dataset)
            .ok_or_else(|| FpeError::Upstream(format!("no keys for {dataset} (404)")))
    }
}

/// Reverses the XOR mask applied by [`FakeKeyService`].
pub(crate) struct FakeUnwrapper;

impl KeyUnwrapper for FakeUnwrapper {
    fn unwrap_data_key(
        &self,
        encrypted_private_key: &str,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, FpeError> {
        if encrypted_private_key != PRIVATE_KEY {
            return Err(FpeError::InvalidKeyMaterial(
                "private key could not be decrypted".into(),
            ));
        }
        Ok(Zeroizing::new(wrapped.iter().map(|b| b ^ WRAP_MASK).collect()))
    }
}

/// Keeps every report it receives, or rejects them all.
#[derive(Default)]
pub(crate) struct RecordingSink {
    reports: Mutex<Vec<UsageReport>>,
    fail: bool,
}

impl RecordingSink {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn reports(&self) -> Vec<UsageReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl UsageSink for RecordingSink {
    async fn send(&self, report: UsageReport) -> Result<(), FpeError> {
        if self.fail {
            return Err(FpeError::Upstream("usage endpoint returned 503".into()));
        }
        self.reports.lock().unwrap().push(report);
        Ok(())
    }
}
