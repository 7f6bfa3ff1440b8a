//! Counters, gauges and distributions, batched and sent as `trace_metric`
//! envelope items.

pub mod constants;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Callbacks, Config};
use crate::envelope::{DataCategory, ItemType};
use crate::hub::Hub;
use crate::protocol::{SpanId, TraceId};
use crate::telemetry::attribute::default_attributes;
use crate::telemetry::{Attribute, Attributes, TelemetryEventBuffer, TelemetryItem};
use crate::transport::Transport;
use crate::utils::to_float_seconds;
use crate::worker::BackgroundWorker;

use constants::{MAX_ITEMS, MAX_ITEMS_BEFORE_DROP};

pub type MetricBuffer = TelemetryEventBuffer<MetricEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Distribution,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Distribution => "distribution",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: Option<String>,
    pub attributes: Attributes,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
}

impl MetricEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        MetricEvent {
            timestamp: Utc::now(),
            name: name.into(),
            metric_type,
            value,
            unit: None,
            attributes: Attributes::new(),
            trace_id: None,
            span_id: None,
        }
    }

    #[must_use]
    pub fn count(name: impl Into<String>, value: f64) -> Self {
        MetricEvent::new(name, MetricType::Counter, value)
    }

    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        MetricEvent::new(name, MetricType::Gauge, value)
    }

    #[must_use]
    pub fn distribution(name: impl Into<String>, value: f64) -> Self {
        MetricEvent::new(name, MetricType::Distribution, value)
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl TelemetryItem for MetricEvent {
    fn item_type() -> ItemType {
        ItemType::TraceMetric
    }

    fn data_category() -> DataCategory {
        DataCategory::TraceMetric
    }

    fn to_payload(&self, config: &Config) -> Value {
        let mut attributes = default_attributes(config);
        attributes.extend(self.attributes.clone());

        let mut payload = serde_json::json!({
            "timestamp": to_float_seconds(self.timestamp),
            "name": self.name,
            "type": self.metric_type,
            "value": self.value,
            "attributes": attributes,
        });
        if let Some(unit) = &self.unit {
            payload["unit"] = Value::String(unit.clone());
        }
        if let Some(trace_id) = self.trace_id {
            payload["trace_id"] = Value::String(trace_id.to_string());
        }
        if let Some(span_id) = self.span_id {
            payload["span_id"] = Value::String(span_id.to_string());
        }
        payload
    }
}

#[must_use]
pub fn new_buffer(
    transport: Arc<Transport>,
    worker: Arc<BackgroundWorker>,
    config: Arc<Config>,
    callbacks: &Callbacks,
) -> MetricBuffer {
    TelemetryEventBuffer::new(
        "METRICS",
        transport,
        config,
        callbacks.before_send_metric.clone(),
        MAX_ITEMS,
        MAX_ITEMS_BEFORE_DROP,
    )
    .with_worker(worker)
}

/// Records a metric on the current hub.
pub fn capture(metric: MetricEvent) {
    Hub::current().capture_metric(metric);
}

pub fn count(name: impl Into<String>, value: f64) {
    capture(MetricEvent::count(name, value));
}

pub fn gauge(name: impl Into<String>, value: f64, unit: Option<&str>) {
    let mut metric = MetricEvent::gauge(name, value);
    metric.unit = unit.map(str::to_string);
    capture(metric);
}

pub fn distribution(name: impl Into<String>, value: f64, unit: Option<&str>) {
    let mut metric = MetricEvent::distribution(name, value);
    metric.unit = unit.map(str::to_string);
    capture(metric);
}
