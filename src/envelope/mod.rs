//! Envelope wire format: a JSON header line followed by `(item header,
//! payload)` line pairs.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::protocol::{CheckIn, ClientReport, ClientSdkInfo, Event, EventType, SessionAggregates};

/// Items above this size have their breadcrumbs removed, then are dropped.
pub const MAX_SERIALIZED_PAYLOAD_SIZE: usize = 1024 * 1000;

pub const LOG_CONTENT_TYPE: &str = "application/vnd.sentry.items.log+json";
pub const TRACE_METRIC_CONTENT_TYPE: &str = "application/vnd.sentry.items.trace-metric+json";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("failed to serialize envelope item: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
}

/// Rate limiting and client report bucket of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Default,
    Error,
    Transaction,
    Span,
    Session,
    Monitor,
    Attachment,
    Internal,
    LogItem,
    TraceMetric,
}

impl DataCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Default => "default",
            DataCategory::Error => "error",
            DataCategory::Transaction => "transaction",
            DataCategory::Span => "span",
            DataCategory::Session => "session",
            DataCategory::Monitor => "monitor",
            DataCategory::Attachment => "attachment",
            DataCategory::Internal => "internal",
            DataCategory::LogItem => "log_item",
            DataCategory::TraceMetric => "trace_metric",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(DataCategory::Default),
            "error" => Ok(DataCategory::Error),
            "transaction" => Ok(DataCategory::Transaction),
            "span" => Ok(DataCategory::Span),
            "session" => Ok(DataCategory::Session),
            "monitor" => Ok(DataCategory::Monitor),
            "attachment" => Ok(DataCategory::Attachment),
            "internal" => Ok(DataCategory::Internal),
            "log_item" => Ok(DataCategory::LogItem),
            "trace_metric" => Ok(DataCategory::TraceMetric),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemType {
    Event,
    Transaction,
    Session,
    Sessions,
    CheckIn,
    ClientReport,
    Log,
    TraceMetric,
    Attachment,
    Other(String),
}

impl ItemType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ItemType::Event => "event",
            ItemType::Transaction => "transaction",
            ItemType::Session => "session",
            ItemType::Sessions => "sessions",
            ItemType::CheckIn => "check_in",
            ItemType::ClientReport => "client_report",
            ItemType::Log => "log",
            ItemType::TraceMetric => "trace_metric",
            ItemType::Attachment => "attachment",
            ItemType::Other(s) => s,
        }
    }

    #[must_use]
    pub fn data_category(&self) -> DataCategory {
        match self {
            ItemType::Event => DataCategory::Error,
            ItemType::Transaction => DataCategory::Transaction,
            ItemType::Session | ItemType::Sessions => DataCategory::Session,
            ItemType::CheckIn => DataCategory::Monitor,
            ItemType::ClientReport => DataCategory::Internal,
            ItemType::Log => DataCategory::LogItem,
            ItemType::TraceMetric => DataCategory::TraceMetric,
            ItemType::Attachment => DataCategory::Attachment,
            ItemType::Other(_) => DataCategory::Default,
        }
    }
}

impl From<&str> for ItemType {
    fn from(s: &str) -> Self {
        match s {
            "event" => ItemType::Event,
            "transaction" => ItemType::Transaction,
            "session" => ItemType::Session,
            "sessions" => ItemType::Sessions,
            "check_in" => ItemType::CheckIn,
            "client_report" => ItemType::ClientReport,
            "log" => ItemType::Log,
            "trace_metric" => ItemType::TraceMetric,
            "attachment" => ItemType::Attachment,
            other => ItemType::Other(other.to_string()),
        }
    }
}

impl Serialize for ItemType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ItemType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ItemType::from(s.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub ty: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// One item: its header plus the already serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeItem {
    pub header: ItemHeader,
    pub payload: Vec<u8>,
}

#[derive(Serialize)]
struct ItemsPayload<'a> {
    items: &'a [Value],
}

impl EnvelopeItem {
    fn json<T: Serialize + ?Sized>(ty: ItemType, payload: &T) -> Result<Self, EnvelopeError> {
        Ok(EnvelopeItem {
            header: ItemHeader {
                ty,
                content_type: None,
                item_count: None,
                length: None,
            },
            payload: serde_json::to_vec(payload)?,
        })
    }

    pub fn event(event: &Event) -> Result<Self, EnvelopeError> {
        let ty = match event.ty {
            EventType::Error => ItemType::Event,
            EventType::Transaction => ItemType::Transaction,
        };
        Self::json(ty, event)
    }

    pub fn check_in(check_in: &CheckIn) -> Result<Self, EnvelopeError> {
        Self::json(ItemType::CheckIn, check_in)
    }

    pub fn client_report(report: &ClientReport) -> Result<Self, EnvelopeError> {
        Self::json(ItemType::ClientReport, report)
    }

    pub fn sessions(aggregates: &SessionAggregates) -> Result<Self, EnvelopeError> {
        Self::json(ItemType::Sessions, aggregates)
    }

    /// Batched telemetry item (`log` or `trace_metric`).
    pub fn batch(ty: ItemType, items: &[Value]) -> Result<Self, EnvelopeError> {
        let content_type = match ty {
            ItemType::Log => Some(LOG_CONTENT_TYPE.to_string()),
            ItemType::TraceMetric => Some(TRACE_METRIC_CONTENT_TYPE.to_string()),
            _ => None,
        };
        let mut item = Self::json(ty, &ItemsPayload { items })?;
        item.header.content_type = content_type;
        item.header.item_count = Some(items.len());
        Ok(item)
    }

    #[must_use]
    pub fn ty(&self) -> &ItemType {
        &self.header.ty
    }

    #[must_use]
    pub fn data_category(&self) -> DataCategory {
        self.header.ty.data_category()
    }

    /// Number of discardable units this item represents.
    #[must_use]
    pub fn quantity(&self) -> u64 {
        self.header.item_count.unwrap_or(1) as u64
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn payload_json(&self) -> Result<Value, EnvelopeError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn to_event(&self) -> Result<Event, EnvelopeError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Number of spans carried by a transaction item, root included.
    #[must_use]
    pub fn span_count(&self) -> u64 {
        if self.header.ty != ItemType::Transaction {
            return 0;
        }
        self.payload_json()
            .ok()
            .and_then(|v| v.get("spans").and_then(Value::as_array).map(Vec::len))
            .map_or(1, |n| n as u64 + 1)
    }

    /// Removes breadcrumbs from an event payload to get it under the size
    /// limit. Returns whether anything was removed.
    pub(crate) fn strip_breadcrumbs(&mut self) -> bool {
        if !matches!(self.header.ty, ItemType::Event | ItemType::Transaction) {
            return false;
        }
        let Ok(mut value) = self.payload_json() else {
            return false;
        };
        let removed = value
            .as_object_mut()
            .and_then(|obj| obj.remove("breadcrumbs"))
            .is_some();
        if removed {
            if let Ok(payload) = serde_json::to_vec(&value) {
                self.payload = payload;
            }
        }
        removed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvelopeHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<ClientSdkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    /// Dynamic sampling context of the trace the items belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub headers: EnvelopeHeaders,
    pub items: Vec<EnvelopeItem>,
}

impl Envelope {
    #[must_use]
    pub fn new(headers: EnvelopeHeaders) -> Self {
        Envelope {
            headers,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_event_id(event_id: Uuid) -> Self {
        Envelope::new(EnvelopeHeaders {
            event_id: Some(event_id.simple().to_string()),
            ..EnvelopeHeaders::default()
        })
    }

    pub fn add_item(&mut self, item: EnvelopeItem) {
        self.items.push(item);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn item_types(&self) -> Vec<&ItemType> {
        self.items.iter().map(EnvelopeItem::ty).collect()
    }

    /// First event or transaction payload, decoded.
    #[must_use]
    pub fn event(&self) -> Option<Event> {
        self.items
            .iter()
            .find(|item| matches!(item.header.ty, ItemType::Event | ItemType::Transaction))
            .and_then(|item| item.to_event().ok())
    }

    /// Stamps `sent_at` and writes the wire form.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, EnvelopeError> {
        self.headers.sent_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        self.serialize()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut out = serde_json::to_vec(&self.headers)?;
        out.push(b'\n');
        for item in &self.items {
            let mut header = item.header.clone();
            header.length = Some(item.payload.len());
            out.extend(serde_json::to_vec(&header)?);
            out.push(b'\n');
            out.extend(&item.payload);
            out.push(b'\n');
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let (header_line, mut rest) = split_line(bytes);
        let headers: EnvelopeHeaders = serde_json::from_slice(header_line)?;
        let mut items = Vec::new();

        while !rest.is_empty() {
            let (item_header, after_header) = split_line(rest);
            if item_header.iter().all(u8::is_ascii_whitespace) {
                rest = after_header;
                continue;
            }
            let header: ItemHeader = serde_json::from_slice(item_header)?;
            let (payload, after_payload) = match header.length {
                Some(len) => {
                    if after_header.len() < len {
                        return Err(EnvelopeError::Malformed("item shorter than its length"));
                    }
                    let (payload, tail) = after_header.split_at(len);
                    (payload, tail.strip_prefix(b"\n").unwrap_or(tail))
                }
                None => split_line(after_header),
            };
            items.push(EnvelopeItem {
                header,
                payload: payload.to_vec(),
            });
            rest = after_payload;
        }

        Ok(Envelope { headers, items })
    }
}

fn split_line(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|b| *b == b'\n') {
        Some(idx) => (&bytes[..idx], &bytes[idx + 1..]),
        None => (bytes, &[]),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::{Level, TransactionSource};

    #[test]
    fn serialized_layout() {
        let event = Event::from_message("hello", Level::Info);
        let mut envelope = Envelope::with_event_id(event.event_id);
        envelope.add_item(EnvelopeItem::event(&event).unwrap());
        let bytes = envelope.serialize().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let header: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["event_id"], event.event_id.simple().to_string());
        let item_header: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(item_header["type"], "event");
        assert_eq!(item_header["length"], lines[2].len());
    }

    #[test]
    fn parse_back_keeps_items() {
        let transaction = Event::new_transaction("GET /users", TransactionSource::Route);
        let mut envelope = Envelope::with_event_id(transaction.event_id);
        envelope.add_item(EnvelopeItem::event(&transaction).unwrap());
        envelope.add_item(
            EnvelopeItem::batch(ItemType::Log, &[Value::from(1), Value::from(2)]).unwrap(),
        );
        let parsed = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(
            parsed.item_types(),
            vec![&ItemType::Transaction, &ItemType::Log]
        );
        assert!(parsed.headers.sent_at.is_some());
        assert_eq!(parsed.event().unwrap().transaction.as_deref(), Some("GET /users"));
        let logs = &parsed.items[1];
        assert_eq!(logs.header.content_type.as_deref(), Some(LOG_CONTENT_TYPE));
        assert_eq!(logs.header.item_count, Some(2));
        assert_eq!(logs.quantity(), 2);
        assert_eq!(logs.payload_json().unwrap()["items"][1], 2);
    }

    #[test]
    fn parse_items_without_length() {
        let raw = b"{}\n{\"type\":\"event\"}\n{\"event_id\":\"9ec79c33ec9942ab8353589fcb2e04dc\",\"timestamp\":1.0,\"platform\":\"native\"}\n";
        let parsed = Envelope::from_bytes(raw).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert!(parsed.event().is_some());
    }

    #[test]
    fn truncated_item_is_malformed() {
        let raw = b"{}\n{\"type\":\"event\",\"length\":50}\n{}\n";
        assert!(matches!(
            Envelope::from_bytes(raw),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn categories() {
        assert_eq!(ItemType::CheckIn.data_category(), DataCategory::Monitor);
        assert_eq!(ItemType::Sessions.data_category(), DataCategory::Session);
        assert_eq!(ItemType::TraceMetric.data_category().as_str(), "trace_metric");
        assert_eq!("log_item".parse(), Ok(DataCategory::LogItem));
        assert!("bogus".parse::<DataCategory>().is_err());
    }

    #[test]
    fn breadcrumbs_can_be_stripped() {
        let mut event = Event::from_message("big", Level::Error);
        event
            .breadcrumbs
            .values
            .push(crate::protocol::Breadcrumb::new("x".repeat(100)));
        let mut item = EnvelopeItem::event(&event).unwrap();
        let before = item.size();
        assert!(item.strip_breadcrumbs());
        assert!(item.size() < before);
        assert!(item.to_event().unwrap().breadcrumbs.is_empty());
    }
}
