use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;

/// Typed attribute value, serialized as `{"type": ..., "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Attribute {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

pub type Attributes = BTreeMap<String, Attribute>;

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Attribute::String(value)
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Integer(value)
    }
}

impl From<i32> for Attribute {
    fn from(value: i32) -> Self {
        Attribute::Integer(i64::from(value))
    }
}

impl From<u32> for Attribute {
    fn from(value: u32) -> Self {
        Attribute::Integer(i64::from(value))
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::Double(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Boolean(value)
    }
}

impl From<&Value> for Attribute {
    /// Arrays, objects and null have no attribute type and become their
    /// JSON text.
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Attribute::Boolean(*b),
            Value::String(s) => Attribute::String(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Attribute::Integer(i),
                None => n
                    .as_f64()
                    .map_or_else(|| Attribute::String(n.to_string()), Attribute::Double),
            },
            other => Attribute::String(other.to_string()),
        }
    }
}

/// Attributes every log and metric carries.
#[must_use]
pub fn default_attributes(config: &Config) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("sentry.sdk.name".to_string(), crate::SDK_NAME.into());
    attributes.insert("sentry.sdk.version".to_string(), crate::SDK_VERSION.into());
    attributes.insert(
        "sentry.environment".to_string(),
        config.environment().into(),
    );
    if let Some(release) = &config.release {
        attributes.insert("sentry.release".to_string(), release.as_str().into());
    }
    if let Some(server_name) = &config.server_name {
        attributes.insert("server.address".to_string(), server_name.as_str().into());
    }
    attributes
}
