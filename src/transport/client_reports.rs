use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::envelope::DataCategory;
use crate::protocol::{ClientReport, DiscardReason, DiscardedEvent};

pub const CLIENT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Pending {
    discarded: BTreeMap<(DiscardReason, DataCategory), u64>,
    last_sent: Instant,
}

/// Discard counters, drained into a client report at most every 30 s.
#[derive(Debug)]
pub struct ClientReports {
    enabled: bool,
    pending: Mutex<Pending>,
}

impl ClientReports {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        ClientReports {
            enabled,
            pending: Mutex::new(Pending {
                discarded: BTreeMap::new(),
                last_sent: Instant::now(),
            }),
        }
    }

    pub fn record(&self, reason: DiscardReason, category: DataCategory, quantity: u64) {
        if !self.enabled || quantity == 0 {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending.discarded.entry((reason, category)).or_insert(0) += quantity;
    }

    /// Counter for one `(reason, category)` pair.
    #[must_use]
    pub fn count(&self, reason: DiscardReason, category: DataCategory) -> u64 {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .discarded
            .get(&(reason, category))
            .copied()
            .unwrap_or(0)
    }

    /// Drains the counters into a report when the interval elapsed, or
    /// always when `force` is set. `None` when nothing was discarded.
    #[must_use]
    pub fn take(&self, force: bool) -> Option<ClientReport> {
        if !self.enabled {
            return None;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !force && pending.last_sent.elapsed() < CLIENT_REPORT_INTERVAL {
            return None;
        }
        if pending.discarded.is_empty() {
            return None;
        }
        let discarded_events = std::mem::take(&mut pending.discarded)
            .into_iter()
            .map(|((reason, category), quantity)| DiscardedEvent {
                reason,
                category,
                quantity,
            })
            .collect();
        pending.last_sent = Instant::now();
        Some(ClientReport {
            timestamp: Utc::now(),
            discarded_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_aggregate_per_reason_and_category() {
        let reports = ClientReports::new(true);
        reports.record(DiscardReason::QueueOverflow, DataCategory::Error, 1);
        reports.record(DiscardReason::QueueOverflow, DataCategory::Error, 2);
        reports.record(DiscardReason::SampleRate, DataCategory::Span, 5);
        assert_eq!(
            reports.count(DiscardReason::QueueOverflow, DataCategory::Error),
            3
        );

        let Some(report) = reports.take(true) else {
            panic!("expected a report");
        };
        assert_eq!(report.discarded_events.len(), 2);
        assert!(reports.take(true).is_none());
    }

    #[test]
    fn report_waits_for_interval() {
        let reports = ClientReports::new(true);
        reports.record(DiscardReason::BeforeSend, DataCategory::Error, 1);
        assert!(reports.take(false).is_none());
        assert!(reports.take(true).is_some());
    }

    #[test]
    fn disabled_reports_record_nothing() {
        let reports = ClientReports::new(false);
        reports.record(DiscardReason::BeforeSend, DataCategory::Error, 1);
        assert_eq!(reports.count(DiscardReason::BeforeSend, DataCategory::Error), 0);
        assert!(reports.take(true).is_none());
    }
}
