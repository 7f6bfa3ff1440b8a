use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    InProgress,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MonitorSchedule {
    Crontab { value: String },
    Interval { value: u64, unit: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub schedule: MonitorSchedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin_margin: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// A cron monitor check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    #[serde(with = "uuid::serde::simple")]
    pub check_in_id: Uuid,
    pub monitor_slug: String,
    pub status: CheckInStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_config: Option<MonitorConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, Value>,
}

impl CheckIn {
    #[must_use]
    pub fn new(monitor_slug: impl Into<String>, status: CheckInStatus) -> Self {
        CheckIn {
            check_in_id: Uuid::new_v4(),
            monitor_slug: monitor_slug.into(),
            status,
            duration: None,
            release: None,
            environment: None,
            monitor_config: None,
            contexts: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_tagged() {
        let mut check_in = CheckIn::new("nightly-job", CheckInStatus::InProgress);
        check_in.monitor_config = Some(MonitorConfig {
            schedule: MonitorSchedule::Crontab {
                value: "0 3 * * *".to_string(),
            },
            checkin_margin: Some(5),
            max_runtime: None,
            timezone: None,
        });
        let value = serde_json::to_value(&check_in).unwrap();
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["monitor_config"]["schedule"]["type"], "crontab");
        assert_eq!(value["monitor_config"]["schedule"]["value"], "0 3 * * *");
        assert!(value.get("duration").is_none());
    }
}
