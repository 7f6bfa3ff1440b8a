use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::DataCategory;
use crate::utils::ts_seconds_float;

/// Why an item never reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    QueueOverflow,
    BeforeSend,
    EventProcessor,
    SampleRate,
    Backpressure,
    NetworkError,
    RatelimitBackoff,
    BufferOverflow,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscardReason::QueueOverflow => "queue_overflow",
            DiscardReason::BeforeSend => "before_send",
            DiscardReason::EventProcessor => "event_processor",
            DiscardReason::SampleRate => "sample_rate",
            DiscardReason::Backpressure => "backpressure",
            DiscardReason::NetworkError => "network_error",
            DiscardReason::RatelimitBackoff => "ratelimit_backoff",
            DiscardReason::BufferOverflow => "buffer_overflow",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedEvent {
    pub reason: DiscardReason,
    pub category: DataCategory,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientReport {
    #[serde(with = "ts_seconds_float")]
    pub timestamp: DateTime<Utc>,
    pub discarded_events: Vec<DiscardedEvent>,
}
