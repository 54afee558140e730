//! Cipher-context resolution per (dataset, key version).
//!
//! # Lifecycle
//!
//! 1. A lookup for `(dataset, token)` misses the context cache.
//! 2. Key material is fetched from the [`KeyService`], the base64 wrapped key
//!    is decoded and handed to the [`KeyUnwrapper`].
//! 3. The raw key keys one [`Ff1`] context over the dataset's input alphabet.
//!    The raw bytes are zeroized as soon as the context is built.
//! 4. The context is cached; an [`KeyVersionToken::Active`] resolution is
//!    cached under its concrete version as well.
//!
//! # Security invariants
//!
//! - Raw key bytes are never logged or printed; [`DataKey`] redacts `Debug`.

pub mod context;

pub use context::{CipherContext, DataKey};

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info};

use common::protocol::DatasetKeysPayload;
use common::FpeError;

use crate::cache::{CachePolicy, SingleFlightCache};
use crate::dataset::DatasetDescriptor;
use crate::upstream::{KeyService, KeyUnwrapper};

/// Which key version a lookup asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyVersionToken {
    /// Whatever version the key service currently marks active.
    Active,
    /// One specific historical version.
    Version(u32),
}

impl KeyVersionToken {
    fn requested(self) -> Option<u32> {
        match self {
            KeyVersionToken::Active => None,
            KeyVersionToken::Version(v) => Some(v),
        }
    }
}

type ContextKey = (String, KeyVersionToken);

/// Cached cipher-context lookup.
pub struct KeyResolver<S, U> {
    service: Arc<S>,
    unwrapper: Arc<U>,
    contexts: SingleFlightCache<ContextKey, Arc<CipherContext>>,
}

impl<S, U> Clone for KeyResolver<S, U> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            unwrapper: Arc::clone(&self.unwrapper),
            contexts: self.contexts.clone(),
        }
    }
}

impl<S: KeyService, U: KeyUnwrapper> KeyResolver<S, U> {
    pub fn new(service: Arc<S>, unwrapper: Arc<U>, policy: CachePolicy) -> Self {
        Self {
            service,
            unwrapper,
            contexts: SingleFlightCache::new("cipher_context", policy),
        }
    }

    /// Resolve the context for `token` of `dataset`.
    ///
    /// # Errors
    ///
    /// Propagates key service failures, [`FpeError::InvalidKeyMaterial`] when
    /// the material cannot be decoded or unwrapped, or does not belong to the
    /// requested version, and FF1 construction errors.
    pub async fn resolve(
        &self,
        dataset: &Arc<DatasetDescriptor>,
        token: KeyVersionToken,
    ) -> Result<Arc<CipherContext>, FpeError> {
        let name = dataset.name();
        let service = Arc::clone(&self.service);
        let unwrapper = Arc::clone(&self.unwrapper);
        let descriptor = Arc::clone(dataset);
        let ctx = self
            .contexts
            .get_or_fetch((name.to_owned(), token), || async move {
                let name = descriptor.name();
                let material = service.fetch_key(name, token.requested()).await?;
                if let KeyVersionToken::Version(v) = token {
                    if material.key_number != v {
                        return Err(FpeError::InvalidKeyMaterial(format!(
                            "requested key version {v} of {name}, received {}",
                            material.key_number
                        )));
                    }
                }
                let ctx = build(
                    unwrapper.as_ref(),
                    &descriptor,
                    &material.encrypted_private_key,
                    &material.wrapped_data_key,
                    material.key_number,
                )?;
                info!(dataset = name, key_version = ctx.version(), "cipher context built");
                Ok(Arc::new(ctx))
            })
            .await?;

        if token == KeyVersionToken::Active {
            let concrete = (name.to_owned(), KeyVersionToken::Version(ctx.version()));
            if self.contexts.get(&concrete).is_none() {
                self.contexts.insert(concrete, Arc::clone(&ctx));
            }
        }
        Ok(ctx)
    }

    /// Build (or reuse) one context per key version in `bundle`, indexed by
    /// version. The current version is also cached as active.
    ///
    /// # Errors
    ///
    /// Returns [`FpeError::InvalidKeyMaterial`] if the bundle's current version
    /// has no key, plus any error from building a context.
    pub async fn seed_all(
        &self,
        dataset: &Arc<DatasetDescriptor>,
        bundle: &DatasetKeysPayload,
    ) -> Result<Vec<Arc<CipherContext>>, FpeError> {
        let name = dataset.name();
        let current = bundle.current_key_number;
        let current_wrapped = bundle
            .keys
            .get(current as usize)
            .ok_or_else(|| {
                FpeError::InvalidKeyMaterial(format!(
                    "current key version {current} of {name} missing from a bundle of {} keys",
                    bundle.keys.len()
                ))
            })?;

        let active = Arc::new(build(
            self.unwrapper.as_ref(),
            dataset,
            &bundle.encrypted_private_key,
            current_wrapped,
            current,
        )?);
        self.contexts
            .insert((name.to_owned(), KeyVersionToken::Active), Arc::clone(&active));
        self.contexts.insert(
            (name.to_owned(), KeyVersionToken::Version(current)),
            Arc::clone(&active),
        );

        let mut contexts = Vec::with_capacity(bundle.keys.len());
        for (version, wrapped) in (0u32..).zip(&bundle.keys) {
            if version == current {
                contexts.push(Arc::clone(&active));
                continue;
            }
            let key = (name.to_owned(), KeyVersionToken::Version(version));
            let unwrapper = Arc::clone(&self.unwrapper);
            let descriptor = Arc::clone(dataset);
            let private_key = bundle.encrypted_private_key.clone();
            let wrapped = wrapped.clone();
            let ctx = self
                .contexts
                .get_or_fetch(key, || async move {
                    build(
                        unwrapper.as_ref(),
                        &descriptor,
                        &private_key,
                        &wrapped,
                        version,
                    )
                    .map(Arc::new)
                })
                .await?;
            contexts.push(ctx);
        }
        debug!(dataset = name, versions = contexts.len(), "search contexts ready");
        Ok(contexts)
    }

    pub fn clear(&self) {
        self.contexts.clear();
    }

    /// Number of cached contexts (an active context counts twice).
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

fn build<U: KeyUnwrapper>(
    unwrapper: &U,
    dataset: &DatasetDescriptor,
    encrypted_private_key: &str,
    wrapped_b64: &str,
    version: u32,
) -> Result<CipherContext, FpeError> {
    let wrapped = BASE64.decode(wrapped_b64.as_bytes()).map_err(|e| {
        FpeError::InvalidKeyMaterial(format!("wrapped data key is not valid base64: {e}"))
    })?;
    let key = DataKey::new(unwrapper.unwrap_data_key(encrypted_private_key, &wrapped)?);
    CipherContext::new(dataset, &key, version)
}
