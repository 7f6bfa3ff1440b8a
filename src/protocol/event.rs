use std::collections::BTreeMap;
use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Breadcrumb, ClientSdkInfo, Level, SpanData, TraceContext, Values};
use crate::utils::{self, ts_seconds_float};

pub const UNLABELED_TRANSACTION: &str = "<unlabeled transaction>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Error,
    Transaction,
}

impl EventType {
    #[allow(clippy::trivially_copy_pass_by_ref)]
    fn is_error(&self) -> bool {
        *self == EventType::Error
    }
}

/// How a transaction got its name. Only `url` is considered low quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    #[default]
    Custom,
    Url,
    Route,
    View,
    Component,
    Task,
}

impl TransactionSource {
    #[must_use]
    pub fn is_low_quality(self) -> bool {
        self == TransactionSource::Url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub source: TransactionSource,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Message {
            message: utils::truncate(&message.into(), utils::MAX_MESSAGE_SIZE_IN_BYTES),
            params: Vec::new(),
            formatted: None,
        }
    }

    /// Substitutes `%s` / `{}` placeholders with the params in order.
    #[must_use]
    pub fn with_params(message: impl Into<String>, params: Vec<Value>) -> Self {
        let message = message.into();
        let formatted = format_template(&message, &params);
        Message {
            message: utils::truncate(&message, utils::MAX_MESSAGE_SIZE_IN_BYTES),
            params,
            formatted: Some(utils::truncate(&formatted, utils::MAX_MESSAGE_SIZE_IN_BYTES)),
        }
    }
}

pub(crate) fn format_template(template: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut params = params.iter();
    let mut rest = template;
    loop {
        let next = match (rest.find("%s"), rest.find("{}")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let Some(idx) = next else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..idx]);
        match params.next() {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[idx..idx + 2]),
        }
        rest = &rest[idx + 2..];
    }
    out
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanism {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
}

impl Default for Mechanism {
    fn default() -> Self {
        Mechanism {
            ty: "generic".to_string(),
            handled: Some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Exception {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<Mechanism>,
}

impl Exception {
    /// Builds the exception list for an error and its `source()` chain,
    /// innermost cause first.
    pub fn chain_from_error<E>(error: &E) -> Vec<Exception>
    where
        E: StdError + ?Sized,
    {
        let full_name = std::any::type_name::<E>();
        let mut chain = vec![Exception {
            ty: utils::short_type_name(full_name).to_string(),
            value: Some(utils::truncate(
                &error.to_string(),
                utils::MAX_MESSAGE_SIZE_IN_BYTES,
            )),
            module: utils::type_module(full_name).map(str::to_string),
            stacktrace: None,
            mechanism: Some(Mechanism::default()),
        }];

        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(Exception {
                ty: utils::type_from_debug(&format!("{cause:?}")),
                value: Some(utils::truncate(
                    &cause.to_string(),
                    utils::MAX_MESSAGE_SIZE_IN_BYTES,
                )),
                module: None,
                stacktrace: None,
                mechanism: None,
            });
            source = cause.source();
        }

        chain.reverse();
        chain
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// An error event or, with `ty == Transaction`, a transaction event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "uuid::serde::simple")]
    pub event_id: Uuid,
    #[serde(rename = "type", default, skip_serializing_if = "EventType::is_error")]
    pub ty: EventType,
    #[serde(with = "ts_seconds_float")]
    pub timestamp: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_seconds_float::option"
    )]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_info: Option<TransactionInfo>,
    #[serde(rename = "logentry", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub exception: Values<Exception>,
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub breadcrumbs: Values<Breadcrumb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<String>,
    #[serde(default)]
    pub sdk: ClientSdkInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<SpanData>,
    /// Sent as the envelope `trace` header, not as part of the payload.
    #[serde(skip)]
    pub dynamic_sampling_context: Option<BTreeMap<String, String>>,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            event_id: Uuid::new_v4(),
            ty: EventType::Error,
            timestamp: Utc::now(),
            start_timestamp: None,
            level: None,
            platform: "native".to_string(),
            logger: None,
            release: None,
            environment: None,
            server_name: None,
            dist: None,
            transaction: None,
            transaction_info: None,
            message: None,
            exception: Values::default(),
            breadcrumbs: Values::default(),
            request: None,
            tags: BTreeMap::new(),
            extra: BTreeMap::new(),
            user: BTreeMap::new(),
            contexts: BTreeMap::new(),
            fingerprint: Vec::new(),
            sdk: ClientSdkInfo::default(),
            spans: Vec::new(),
            dynamic_sampling_context: None,
        }
    }
}

impl Event {
    #[must_use]
    pub fn new() -> Self {
        Event::default()
    }

    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        Event {
            level: Some(Level::Error),
            exception: Exception::chain_from_error(error).into(),
            ..Event::default()
        }
    }

    #[must_use]
    pub fn from_message(message: impl Into<String>, level: Level) -> Self {
        Event {
            level: Some(level),
            message: Some(Message::new(message)),
            ..Event::default()
        }
    }

    #[must_use]
    pub fn new_transaction(name: &str, source: TransactionSource) -> Self {
        let name = if name.is_empty() {
            UNLABELED_TRANSACTION
        } else {
            name
        };
        Event {
            ty: EventType::Transaction,
            transaction: Some(name.to_string()),
            transaction_info: Some(TransactionInfo { source }),
            ..Event::default()
        }
    }

    #[must_use]
    pub fn is_transaction(&self) -> bool {
        self.ty == EventType::Transaction
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.ty == EventType::Error
    }

    #[must_use]
    pub fn trace_context(&self) -> Option<TraceContext> {
        self.contexts
            .get("trace")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set_trace_context(&mut self, context: &TraceContext) {
        self.contexts
            .insert("trace".to_string(), context.to_value());
    }

    /// Short, human readable label used in log lines.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(exception) = self.exception.values.last() {
            return match &exception.value {
                Some(value) => format!("{}: {}", exception.ty, value),
                None => exception.ty.clone(),
            };
        }
        if let Some(message) = &self.message {
            return message.formatted.clone().unwrap_or(message.message.clone());
        }
        self.transaction.clone().unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("divided by 0")]
    struct ZeroDivisionError;

    #[derive(Debug, thiserror::Error)]
    #[error("calculation failed")]
    struct CalculationError {
        #[source]
        cause: ZeroDivisionError,
    }

    #[test]
    fn error_chain_is_innermost_first() {
        let error = CalculationError {
            cause: ZeroDivisionError,
        };
        let chain = Exception::chain_from_error(&error);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].ty, "ZeroDivisionError");
        assert_eq!(chain[0].value.as_deref(), Some("divided by 0"));
        assert_eq!(chain[1].ty, "CalculationError");
        assert!(chain[1].module.as_deref().unwrap().ends_with("tests"));
    }

    #[test]
    fn error_events_omit_type_and_rename_message() {
        let event = Event::from_message("hello", Level::Warning);
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("type").is_none());
        assert_eq!(value["logentry"]["message"], "hello");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["event_id"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn transaction_events_are_typed() {
        let event = Event::new_transaction("", TransactionSource::Route);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "transaction");
        assert_eq!(value["transaction"], UNLABELED_TRANSACTION);
        assert_eq!(value["transaction_info"]["source"], "route");
    }

    #[test]
    fn templates_are_formatted() {
        let message = Message::with_params(
            "user %s bought {} items",
            vec![Value::from("alice"), Value::from(3)],
        );
        assert_eq!(
            message.formatted.as_deref(),
            Some("user alice bought 3 items")
        );
        assert_eq!(format_template("missing %s", &[]), "missing %s");
    }
}
