use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;
use uuid::Uuid;

use crate::utils::ts_seconds_float;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid {0} id")]
pub struct IdParseError(&'static str);

macro_rules! hex_id {
    ($name:ident, $len:expr, $label:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            #[must_use]
            pub fn random() -> Self {
                let bytes = Uuid::new_v4().into_bytes();
                let mut id = [0u8; $len];
                id.copy_from_slice(&bytes[..$len]);
                $name(id)
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut id = [0u8; $len];
                hex::decode_to_slice(s, &mut id).map_err(|_| IdParseError($label))?;
                Ok($name(id))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_id!(TraceId, 16, "trace");
hex_id!(SpanId, 8, "span");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    InternalError,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl SpanStatus {
    #[must_use]
    pub fn from_http_status(code: u16) -> SpanStatus {
        match code {
            200..=299 => SpanStatus::Ok,
            400 => SpanStatus::InvalidArgument,
            401 => SpanStatus::Unauthenticated,
            403 => SpanStatus::PermissionDenied,
            404 => SpanStatus::NotFound,
            409 => SpanStatus::AlreadyExists,
            429 => SpanStatus::ResourceExhausted,
            499 => SpanStatus::Cancelled,
            500 => SpanStatus::InternalError,
            501 => SpanStatus::Unimplemented,
            503 => SpanStatus::Unavailable,
            504 => SpanStatus::DeadlineExceeded,
            400..=499 => SpanStatus::InvalidArgument,
            500..=599 => SpanStatus::InternalError,
            _ => SpanStatus::Unknown,
        }
    }
}

/// Wire form of a finished (or in-flight) span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(with = "ts_seconds_float")]
    pub start_timestamp: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_seconds_float::option"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
    #[serde(skip)]
    pub sampled: Option<bool>,
}

impl SpanData {
    #[must_use]
    pub fn new(trace_id: TraceId, parent_span_id: Option<SpanId>) -> Self {
        SpanData {
            trace_id,
            span_id: SpanId::random(),
            parent_span_id,
            op: None,
            description: None,
            status: None,
            origin: Some("manual".to_string()),
            start_timestamp: Utc::now(),
            timestamp: None,
            tags: BTreeMap::new(),
            data: BTreeMap::new(),
            sampled: None,
        }
    }

    /// `sentry-trace` header value for this span.
    #[must_use]
    pub fn to_sentry_trace(&self) -> String {
        crate::traces::propagation::sentry_trace::format(self.trace_id, self.span_id, self.sampled)
    }

    #[must_use]
    pub fn trace_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            op: self.op.clone(),
            description: self.description.clone(),
            status: self.status,
            origin: self.origin.clone(),
            data: self.data.clone(),
        }
    }
}

/// The `trace` entry of an event's contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl TraceContext {
    #[must_use]
    pub fn to_value(&self) -> Value {
        crate::utils::to_value_lossy(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_as_lowercase_hex() {
        let trace_id: TraceId = "771a43a4192642f0b136d5159a501700".parse().unwrap();
        assert_eq!(trace_id.to_string(), "771a43a4192642f0b136d5159a501700");
        let span_id: SpanId = "7c51afd529da4a2a".parse().unwrap();
        assert_eq!(
            serde_json::to_string(&span_id).unwrap(),
            "\"7c51afd529da4a2a\""
        );
        assert!("7c51afd5".parse::<SpanId>().is_err());
        assert!("zz1a43a4192642f0b136d5159a501700".parse::<TraceId>().is_err());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(TraceId::random(), TraceId::random());
        assert_eq!(SpanId::random().to_string().len(), 16);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(SpanStatus::from_http_status(204), SpanStatus::Ok);
        assert_eq!(SpanStatus::from_http_status(404), SpanStatus::NotFound);
        assert_eq!(SpanStatus::from_http_status(418), SpanStatus::InvalidArgument);
        assert_eq!(SpanStatus::from_http_status(502), SpanStatus::InternalError);
        assert_eq!(SpanStatus::from_http_status(301), SpanStatus::Unknown);
    }
}
