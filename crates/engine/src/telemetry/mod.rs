//! Logging bootstrap.
//!
//! The engine only emits `tracing` events; installing a subscriber is the host
//! application's call. [`init`] is the default: structured JSON logs on stdout.
//!
//! # Telemetry invariants
//!
//! - **No key material** in any log field. Plaintexts and ciphertexts are not
//!   logged either; events carry the dataset name and key version only.
//! - `RUST_LOG`, when set, overrides the configured level.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install a JSON [`tracing_subscriber`] filtered at `log_level`.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing subscriber: {e}"))
}
