use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

pub const MAX_MESSAGE_SIZE_IN_BYTES: usize = 8 * 1024;

/// Seconds since the epoch with microsecond precision.
#[must_use]
pub fn to_float_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

#[must_use]
pub fn from_float_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
}

/// Serializes a `DateTime<Utc>` as fractional unix seconds.
pub mod ts_seconds_float {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::to_float_seconds(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        super::from_float_seconds(secs).ok_or_else(|| de::Error::custom("timestamp out of range"))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de};

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&super::super::to_float_seconds(*ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<f64>::deserialize(deserializer)? {
                Some(secs) => super::super::from_float_seconds(secs)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom("timestamp out of range")),
                None => Ok(None),
            }
        }
    }
}

/// Converts anything serializable into a JSON value; failures are replaced by
/// a placeholder string so one bad field never sinks the whole payload.
pub fn to_value_lossy<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            debug!("Replacing value that failed to serialize: {e}");
            Value::String(format!("[unserializable value: {e}]"))
        }
    }
}

/// Truncates on a char boundary at or below `max` bytes.
#[must_use]
pub fn truncate(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// `my_crate::errors::ParseError<T>` -> `ParseError`
#[must_use]
pub fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Module path of a fully qualified type name, if any.
#[must_use]
pub fn type_module(full: &str) -> Option<&str> {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit_once("::").map(|(module, _)| module)
}

/// Best-effort type name from a `Debug` rendering, e.g. `Io(Custom { .. })` -> `Io`.
#[must_use]
pub fn type_from_debug(debug: &str) -> String {
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(debug.len());
    let name = short_type_name(&debug[..end]);
    if name.is_empty() {
        "Error".to_string()
    } else {
        name.to_string()
    }
}
