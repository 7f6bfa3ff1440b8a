use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Level;
use crate::utils::{self, ts_seconds_float};

fn default_type() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    #[serde(with = "ts_seconds_float")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default = "default_type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub level: Level,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Default for Breadcrumb {
    fn default() -> Self {
        Breadcrumb {
            timestamp: Utc::now(),
            ty: default_type(),
            category: None,
            message: None,
            level: Level::Info,
            data: BTreeMap::new(),
        }
    }
}

impl Breadcrumb {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Breadcrumb {
            message: Some(utils::truncate(
                &message.into(),
                utils::MAX_MESSAGE_SIZE_IN_BYTES,
            )),
            ..Breadcrumb::default()
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Values that cannot be represented as JSON are stored as a placeholder.
    #[must_use]
    pub fn with_data<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        self.data
            .insert(key.to_string(), utils::to_value_lossy(value));
        self
    }

    /// Enforces size limits on free-text fields.
    pub(crate) fn normalize(&mut self) {
        if let Some(message) = &self.message {
            if message.len() > utils::MAX_MESSAGE_SIZE_IN_BYTES {
                self.message = Some(utils::truncate(message, utils::MAX_MESSAGE_SIZE_IN_BYTES));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn long_messages_are_truncated() {
        let mut crumb = Breadcrumb::default();
        crumb.message = Some("x".repeat(utils::MAX_MESSAGE_SIZE_IN_BYTES + 10));
        crumb.normalize();
        assert_eq!(
            crumb.message.unwrap().len(),
            utils::MAX_MESSAGE_SIZE_IN_BYTES
        );
    }

    #[test]
    fn serializes_type_and_level() {
        let crumb = Breadcrumb::new("GET /")
            .with_category("http")
            .with_level(Level::Warning)
            .with_data("status_code", &404);
        let value = serde_json::to_value(&crumb).unwrap();
        assert_eq!(value["type"], "default");
        assert_eq!(value["category"], "http");
        assert_eq!(value["level"], "warning");
        assert_eq!(value["data"]["status_code"], 404);
    }
}
