//! Dataset definitions: normalization and cached resolution by name.
//!
//! # Responsibilities
//!
//! - Turn a raw [`DatasetPayload`](common::protocol::DatasetPayload) into a
//!   validated [`DatasetDescriptor`].
//! - Resolve descriptors by dataset name through a [`SingleFlightCache`], so
//!   concurrent first calls for one dataset share a single upstream fetch.
//!
//! # Module invariants
//!
//! - **No key material.** Nothing here touches data keys or cipher contexts.

pub mod descriptor;

pub use descriptor::{DatasetDescriptor, RuleStep};

use std::sync::Arc;

use tracing::{debug, info};

use common::FpeError;

use crate::cache::{CachePolicy, SingleFlightCache};
use crate::upstream::KeyService;

/// Cached dataset lookup backed by a [`KeyService`].
pub struct DatasetResolver<S> {
    service: Arc<S>,
    cache: SingleFlightCache<String, Arc<DatasetDescriptor>>,
}

impl<S> Clone for DatasetResolver<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            cache: self.cache.clone(),
        }
    }
}

impl<S: KeyService> DatasetResolver<S> {
    pub fn new(service: Arc<S>, policy: CachePolicy) -> Self {
        Self {
            service,
            cache: SingleFlightCache::new("dataset", policy),
        }
    }

    /// Return the descriptor for `dataset`, fetching and validating it on a
    /// cache miss.
    ///
    /// # Errors
    ///
    /// Propagates upstream failures and [`FpeError::InvalidDataset`] for
    /// definitions that fail validation. Neither is cached.
    pub async fn resolve(&self, dataset: &str) -> Result<Arc<DatasetDescriptor>, FpeError> {
        let service = Arc::clone(&self.service);
        let name = dataset.to_owned();
        self.cache
            .get_or_fetch(dataset.to_owned(), || async move {
                let payload = service.fetch_dataset(&name).await?;
                let descriptor = DatasetDescriptor::from_payload(&payload)?;
                info!(dataset = %name, steps = ?descriptor.steps(), "dataset loaded");
                Ok(Arc::new(descriptor))
            })
            .await
    }

    /// Seed the cache with a descriptor obtained out of band.
    pub fn insert(&self, descriptor: Arc<DatasetDescriptor>) {
        debug!(dataset = descriptor.name(), "dataset cached");
        self.cache.insert(descriptor.name().to_owned(), descriptor);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
