//! Structured logs, batched and sent as `log` envelope items.

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

use constants::{
    MAX_ITEMS, MAX_ITEMS_BEFORE_DROP, PARAMETER_ATTRIBUTE_PREFIX, PARENT_SPAN_ATTRIBUTE,
    TEMPLATE_ATTRIBUTE,
};

pub type LogBuffer = TelemetryEventBuffer<LogEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// OpenTelemetry severity number of the level's first slot.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub body: String,
    pub template: Option<String>,
    pub parameters: Vec<Value>,
    pub attributes: Attributes,
    pub trace_id: Option<TraceId>,
    pub parent_span_id: Option<SpanId>,
}

impl LogEvent {
    #[must_use]
    pub fn new(severity: Severity, body: impl Into<String>) -> Self {
        LogEvent {
            timestamp: Utc::now(),
            severity,
            body: body.into(),
            template: None,
            parameters: Vec::new(),
            attributes: Attributes::new(),
            trace_id: None,
            parent_span_id: None,
        }
    }

    /// Each `{}` in `template` takes the next parameter. The template and
    /// its parameters are also sent as attributes.
    #[must_use]
    pub fn with_template(
        severity: Severity,
        template: impl Into<String>,
        parameters: Vec<Value>,
    ) -> Self {
        let template = template.into();
        LogEvent {
            body: render_template(&template, &parameters),
            template: Some(template),
            parameters,
            ..LogEvent::new(severity, String::new())
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

fn render_template(template: &str, parameters: &[Value]) -> String {
    let mut body = String::with_capacity(template.len());
    let mut parameters = parameters.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        body.push_str(&rest[..pos]);
        match parameters.next() {
            Some(Value::String(s)) => body.push_str(s),
            Some(other) => body.push_str(&other.to_string()),
            None => body.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    body.push_str(rest);
    body
}

impl TelemetryItem for LogEvent {
    fn item_type() -> ItemType {
        ItemType::Log
    }

    fn data_category() -> DataCategory {
        DataCategory::LogItem
    }

    fn to_payload(&self, config: &Config) -> Value {
        let mut attributes = default_attributes(config);
        if let Some(span_id) = self.parent_span_id {
            attributes.insert(PARENT_SPAN_ATTRIBUTE.to_string(), span_id.to_string().into());
        }
        if let Some(template) = &self.template {
            attributes.insert(TEMPLATE_ATTRIBUTE.to_string(), template.as_str().into());
            for (i, parameter) in self.parameters.iter().enumerate() {
                attributes.insert(format!("{PARAMETER_ATTRIBUTE_PREFIX}{i}"), parameter.into());
            }
        }
        attributes.extend(self.attributes.clone());

        let mut payload = serde_json::json!({
            "timestamp": to_float_seconds(self.timestamp),
            "level": self.severity,
            "severity_number": self.severity.number(),
            "body": self.body,
            "attributes": attributes,
        });
        if let Some(trace_id) = self.trace_id {
            payload["trace_id"] = Value::String(trace_id.to_string());
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
) -> LogBuffer {
    TelemetryEventBuffer::new(
        "LOGS",
        transport,
        config,
        callbacks.before_send_log.clone(),
        MAX_ITEMS,
        MAX_ITEMS_BEFORE_DROP,
    )
    .with_worker(worker)
}

/// Records a log on the current hub.
pub fn log(severity: Severity, body: impl Into<String>) {
    Hub::current().capture_log(LogEvent::new(severity, body));
}

pub fn log_template(severity: Severity, template: impl Into<String>, parameters: Vec<Value>) {
    Hub::current().capture_log(LogEvent::with_template(severity, template, parameters));
}

pub fn trace(body: impl Into<String>) {
    log(Severity::Trace, body);
}

pub fn debug(body: impl Into<String>) {
    log(Severity::Debug, body);
}

pub fn info(body: impl Into<String>) {
    log(Severity::Info, body);
}

pub fn warn(body: impl Into<String>) {
    log(Severity::Warn, body);
}

pub fn error(body: impl Into<String>) {
    log(Severity::Error, body);
}

pub fn fatal(body: impl Into<String>) {
    log(Severity::Fatal, body);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn severity_numbers() {
        let numbers: Vec<u8> = [
            Severity::Trace,
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ]
        .into_iter()
        .map(Severity::number)
        .collect();
        assert_eq!(numbers, vec![1, 5, 9, 13, 17, 21]);
    }

    #[test]
    fn template_is_rendered_in_order() {
        let log = LogEvent::with_template(
            Severity::Info,
            "user {} bought {} items {}",
            vec![Value::from("jane"), Value::from(3)],
        );
        assert_eq!(log.body, "user jane bought 3 items {}");
    }

    #[test]
    fn payload_carries_template_and_trace() {
        let config = Config {
            release: Some("1.0".to_string()),
            ..Config::default()
        };
        let trace_id = TraceId::random();
        let span_id = SpanId::random();
        let mut log = LogEvent::with_template(Severity::Warn, "disk at {}%", vec![Value::from(91)])
            .with_attribute("host", "db-1");
        log.trace_id = Some(trace_id);
        log.parent_span_id = Some(span_id);

        let payload = log.to_payload(&config);
        assert_eq!(payload["level"], "warn");
        assert_eq!(payload["severity_number"], 13);
        assert_eq!(payload["body"], "disk at 91%");
        assert_eq!(payload["trace_id"], trace_id.to_string());
        let attributes = &payload["attributes"];
        assert_eq!(attributes["sentry.message.template"]["value"], "disk at {}%");
        assert_eq!(attributes["sentry.message.parameter.0"]["type"], "integer");
        assert_eq!(
            attributes["sentry.trace.parent_span_id"]["value"],
            span_id.to_string()
        );
        assert_eq!(attributes["sentry.release"]["value"], "1.0");
        assert_eq!(attributes["host"]["value"], "db-1");
    }
}
