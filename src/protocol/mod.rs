//! Payload types sent to the collector.

pub mod breadcrumb;
pub mod check_in;
pub mod client_report;
pub mod event;
pub mod session;
pub mod span;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use breadcrumb::Breadcrumb;
pub use check_in::{CheckIn, CheckInStatus, MonitorConfig, MonitorSchedule};
pub use client_report::{ClientReport, DiscardReason, DiscardedEvent};
pub use event::{
    Event, EventType, Exception, Frame, Mechanism, Message, Request, Stacktrace,
    TransactionInfo, TransactionSource,
};
pub use session::{SessionAggregateItem, SessionAggregates, SessionAttributes, SessionStatus};
pub use span::{SpanData, SpanId, SpanStatus, TraceContext, TraceId};

/// Severity of an event or breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" | "log" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "fatal" | "critical" => Ok(Level::Fatal),
            _ => Err(format!("unknown level `{s}`")),
        }
    }
}

/// `{"values": [...]}` wrapper used by the exception and breadcrumb interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Values<T> {
    pub values: Vec<T>,
}

impl<T> Default for Values<T> {
    fn default() -> Self {
        Values { values: Vec::new() }
    }
}

impl<T> Values<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T> From<Vec<T>> for Values<T> {
    fn from(values: Vec<T>) -> Self {
        Values { values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSdkInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientSdkInfo {
    fn default() -> Self {
        ClientSdkInfo {
            name: crate::SDK_NAME.to_string(),
            version: crate::SDK_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn level_wire_names() {
        assert_eq!(serde_json::to_string(&Level::Warning).unwrap(), "\"warning\"");
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert!("loud".parse::<Level>().is_err());
    }
}
