//! [`UsageTracker`]: aggregates usage events until they are drained.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use common::protocol::{DatasetType, UsageAction, UsageRecord, UsageReport};
use common::FpeError;

use super::{UsageEvent, UsageRecorder, UsageSink};

/// Product identification stamped on every usage record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub product: String,
    pub product_version: String,
    pub api_version: String,
}

impl Default for ProductInfo {
    fn default() -> Self {
        Self {
            product: env!("CARGO_PKG_NAME").into(),
            product_version: env!("CARGO_PKG_VERSION").into(),
            api_version: "V3".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UsageKey {
    identity: String,
    dataset: String,
    dataset_group: String,
    action: UsageAction,
    dataset_type: DatasetType,
    key_version: u32,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    first_call: u64,
    last_call: u64,
}

/// Thread-safe usage aggregator.
#[derive(Debug)]
pub struct UsageTracker {
    product: ProductInfo,
    pending: Mutex<HashMap<UsageKey, Counter>>,
}

impl UsageTracker {
    pub fn new(product: ProductInfo) -> Self {
        Self {
            product,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct pending records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every pending record, leaving the tracker empty.
    pub fn drain(&self) -> UsageReport {
        let pending = std::mem::take(&mut *self.lock());
        let usage = pending
            .into_iter()
            .map(|(key, counter)| UsageRecord {
                dataset: key.dataset,
                dataset_group: key.dataset_group,
                api_key: key.identity,
                count: counter.count,
                key_number: key.key_version,
                action: key.action,
                dataset_type: key.dataset_type,
                product: self.product.product.clone(),
                product_version: self.product.product_version.clone(),
                api_version: self.product.api_version.clone(),
                first_call_timestamp: counter.first_call,
                last_call_timestamp: counter.last_call,
            })
            .collect();
        UsageReport { usage }
    }

    /// Drain and send everything pending. Returns the number of records sent.
    ///
    /// # Errors
    ///
    /// Propagates the sink's error; the drained records are not restored.
    pub async fn flush<K: UsageSink>(&self, sink: &K) -> Result<usize, FpeError> {
        let report = self.drain();
        if report.is_empty() {
            return Ok(0);
        }
        let sent = report.usage.len();
        sink.send(report).await?;
        Ok(sent)
    }

    // Every critical section leaves the map consistent; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashMap<UsageKey, Counter>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl UsageRecorder for UsageTracker {
    fn record(&self, event: UsageEvent) {
        let now = unix_seconds();
        let key = UsageKey {
            identity: event.identity,
            dataset: event.dataset,
            dataset_group: event.dataset_group,
            action: event.action,
            dataset_type: event.dataset_type,
            key_version: event.key_version,
        };
        self.lock()
            .entry(key)
            .and_modify(|c| {
                c.count += event.count;
                c.last_call = now;
            })
            .or_insert(Counter {
                count: event.count,
                first_call: now,
                last_call: now,
            });
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn event(action: UsageAction, key_version: u32) -> UsageEvent {
        UsageEvent {
            identity: "papi".into(),
            dataset: "ssn".into(),
            dataset_group: String::new(),
            action,
            dataset_type: DatasetType::Structured,
            key_version,
            count: 1,
        }
    }

    #[test]
    fn same_key_aggregates() {
        let t = UsageTracker::new(ProductInfo::default());
        t.record(event(UsageAction::Encrypt, 0));
        t.record(event(UsageAction::Encrypt, 0));
        t.record(event(UsageAction::Encrypt, 0));
        assert_eq!(t.len(), 1);

        let report = t.drain();
        assert_eq!(report.usage.len(), 1);
        let rec = &report.usage[0];
        assert_eq!(rec.count, 3);
        assert_eq!(rec.dataset, "ssn");
        assert_eq!(rec.api_key, "papi");
        assert!(rec.first_call_timestamp <= rec.last_call_timestamp);
        assert!(t.is_empty());
    }

    #[test]
    fn action_and_version_split_records() {
        let t = UsageTracker::new(ProductInfo::default());
        t.record(event(UsageAction::Encrypt, 0));
        t.record(event(UsageAction::Decrypt, 0));
        t.record(event(UsageAction::Decrypt, 1));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn product_info_is_stamped() {
        let t = UsageTracker::new(ProductInfo {
            product: "acme".into(),
            product_version: "9.9".into(),
            api_version: "V3".into(),
        });
        t.record(event(UsageAction::Encrypt, 2));
        let rec = t.drain().usage.remove(0);
        assert_eq!(rec.product, "acme");
        assert_eq!(rec.product_version, "9.9");
        assert_eq!(rec.key_number, 2);
    }

    #[tokio::test]
    async fn flush_sends_and_empties() {
        let t = UsageTracker::new(ProductInfo::default());
        let sink = RecordingSink::default();
        assert_eq!(t.flush(&sink).await.unwrap(), 0);
        assert!(sink.reports().is_empty());

        t.record(event(UsageAction::Encrypt, 0));
        t.record(event(UsageAction::Decrypt, 0));
        assert_eq!(t.flush(&sink).await.unwrap(), 2);
        assert_eq!(sink.reports().len(), 1);
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn flush_failure_drops_batch() {
        let t = UsageTracker::new(ProductInfo::default());
        t.record(event(UsageAction::Encrypt, 0));
        let err = t.flush(&RecordingSink::failing()).await.unwrap_err();
        assert_eq!(err.code(), "upstream_failure");
        assert!(t.is_empty());
    }
}
