use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ok,
    Exited,
    Errored,
    Crashed,
    Abnormal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttributes {
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// Counters for sessions started within one minute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionAggregateItem {
    /// RFC 3339 timestamp truncated to the minute.
    pub started: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exited: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errored: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub crashed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub abnormal: u64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Payload of a `sessions` envelope item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAggregates {
    pub attrs: SessionAttributes,
    pub aggregates: Vec<SessionAggregateItem>,
}
