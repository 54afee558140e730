//! Usage accounting: per-call events, in-process aggregation, and periodic
//! reporting.
//!
//! # Lifecycle
//!
//! 1. Every successful encrypt or decrypt hands a [`UsageEvent`] to a
//!    [`UsageRecorder`].
//! 2. [`UsageTracker`] folds events sharing identity, dataset, action, type
//!    and key version into one counter.
//! 3. [`spawn_reporter`] wakes on an interval and drains the tracker into a
//!    [`UsageSink`] once enough records are pending or the flush deadline
//!    has passed.
//! 4. On shutdown the host calls [`UsageTracker::flush`] for the remainder.
//!
//! A failed send is logged and its batch dropped; usage reporting never
//! fails an encrypt or decrypt call.

pub mod tracker;

pub use tracker::{ProductInfo, UsageTracker};

use std::{future::Future, sync::Arc};

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use common::protocol::{DatasetType, UsageAction, UsageReport};
use common::FpeError;

use crate::config::EventReportingConfig;

/// One successful operation (or `count` of them) against a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    /// Caller identity, typically an API key id.
    pub identity: String,
    pub dataset: String,
    pub dataset_group: String,
    pub action: UsageAction,
    pub dataset_type: DatasetType,
    pub key_version: u32,
    pub count: u64,
}

/// Receives usage events. Must not block.
pub trait UsageRecorder: Send + Sync + 'static {
    fn record(&self, event: UsageEvent);
}

impl<R: UsageRecorder + ?Sized> UsageRecorder for Arc<R> {
    fn record(&self, event: UsageEvent) {
        (**self).record(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl UsageRecorder for NoopRecorder {
    fn record(&self, _event: UsageEvent) {}
}

/// Destination for drained usage reports.
pub trait UsageSink: Send + Sync + 'static {
    fn send(&self, report: UsageReport) -> impl Future<Output = Result<(), FpeError>> + Send;
}

/// Spawn a background task that periodically drains `tracker` into `sink`.
///
/// The task wakes every `cfg.wake_interval()` and flushes when at least
/// `cfg.minimum_count` records are pending or `cfg.flush_interval()` has
/// elapsed since the last flush. Abort the returned handle to stop it.
pub fn spawn_reporter<K: UsageSink>(
    tracker: Arc<UsageTracker>,
    sink: Arc<K>,
    cfg: EventReportingConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(cfg.wake_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; nothing has been recorded yet.
        ticker.tick().await;
        let mut deadline = Instant::now() + cfg.flush_interval();
        loop {
            ticker.tick().await;
            let pending = tracker.len();
            if pending < cfg.minimum_count && Instant::now() < deadline {
                continue;
            }
            deadline = Instant::now() + cfg.flush_interval();
            if pending == 0 {
                continue;
            }
            match tracker.flush(sink.as_ref()).await {
                Ok(sent) => debug!(records = sent, "usage flushed"),
                Err(e) => warn!(error = %e, "usage flush failed; batch dropped"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use std::time::Duration;

    fn event(dataset: &str) -> UsageEvent {
        UsageEvent {
            identity: "papi".into(),
            dataset: dataset.into(),
            dataset_group: String::new(),
            action: UsageAction::Encrypt,
            dataset_type: DatasetType::Structured,
            key_version: 0,
            count: 1,
        }
    }

    fn fast_cfg(minimum_count: usize, flush_secs: u64) -> EventReportingConfig {
        EventReportingConfig {
            wake_interval_secs: 1,
            minimum_count,
            flush_interval_secs: flush_secs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_flushes_at_minimum_count() {
        let tracker = Arc::new(UsageTracker::new(ProductInfo::default()));
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_reporter(Arc::clone(&tracker), Arc::clone(&sink), fast_cfg(2, 3600));

        tracker.record(event("a"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(sink.reports().is_empty());

        tracker.record(event("b"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].usage.len(), 2);
        assert_eq!(tracker.len(), 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_flushes_on_deadline() {
        let tracker = Arc::new(UsageTracker::new(ProductInfo::default()));
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_reporter(Arc::clone(&tracker), Arc::clone(&sink), fast_cfg(100, 5));

        tracker.record(event("a"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sink.reports().is_empty());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sink.reports().len(), 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_drops_batch_and_keeps_running() {
        let tracker = Arc::new(UsageTracker::new(ProductInfo::default()));
        let sink = Arc::new(RecordingSink::failing());
        let handle = spawn_reporter(Arc::clone(&tracker), Arc::clone(&sink), fast_cfg(1, 3600));

        tracker.record(event("a"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(tracker.len(), 0);
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[test]
    fn arc_recorder_forwards() {
        let tracker = Arc::new(UsageTracker::new(ProductInfo::default()));
        let recorder: Arc<dyn UsageRecorder> = tracker.clone();
        recorder.record(event("a"));
        assert_eq!(tracker.len(), 1);
        NoopRecorder.record(event("a"));
    }
}
