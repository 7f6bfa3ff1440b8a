pub mod callbacks;
pub mod dsn;
pub mod log_level;

use std::path::Path;

use figment::providers::{Format, Yaml};
use figment::{Figment, providers::Env};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

pub use callbacks::Callbacks;
pub use dsn::Dsn;

use crate::config::{dsn::deserialize_optional_dsn, log_level::LogLevel};

pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),
}

#[derive(Debug, PartialEq, Deserialize, Clone)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_optional_dsn")]
    pub dsn: Option<Dsn>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub environment: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub release: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub server_name: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub dist: Option<String>,
    pub log_level: LogLevel,
    pub debug: bool,
    // Sampling
    pub sample_rate: f64,
    pub traces_sample_rate: Option<f64>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub enabled_environments: Vec<String>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub excluded_exceptions: Vec<String>,
    pub max_breadcrumbs: usize,
    pub max_spans: usize,
    // Delivery
    pub background_worker_threads: usize,
    pub background_worker_max_queue: usize,
    pub send_client_reports: bool,
    pub enable_backpressure_handling: bool,
    pub transport_compression: bool,
    pub https_proxy: Option<String>,
    /// seconds
    pub connect_timeout: u64,
    /// seconds
    pub timeout: u64,
    /// milliseconds
    pub shutdown_timeout: u64,
    // Telemetry
    pub enable_logs: bool,
    pub enable_metrics: bool,
    pub session_tracking: bool,
    pub send_default_pii: bool,
    // Trace propagation
    pub propagate_traces: bool,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub trace_propagation_targets: Vec<String>,
    pub strict_trace_continuation: bool,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub org_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dsn: None,
            environment: None,
            release: None,
            server_name: None,
            dist: None,
            log_level: LogLevel::default(),
            debug: false,
            sample_rate: 1.0,
            traces_sample_rate: None,
            enabled_environments: Vec::new(),
            excluded_exceptions: Vec::new(),
            max_breadcrumbs: crate::scope::breadcrumbs::DEFAULT_MAX_BREADCRUMBS,
            max_spans: crate::traces::transaction::DEFAULT_MAX_SPANS,
            background_worker_threads: default_worker_threads(),
            background_worker_max_queue: crate::worker::DEFAULT_MAX_QUEUE,
            send_client_reports: true,
            enable_backpressure_handling: false,
            transport_compression: true,
            https_proxy: None,
            connect_timeout: 1,
            timeout: 2,
            shutdown_timeout: 1000,
            enable_logs: false,
            enable_metrics: true,
            session_tracking: false,
            send_default_pii: false,
            propagate_traces: true,
            trace_propagation_targets: vec![".*".to_string()],
            strict_trace_continuation: false,
            org_id: None,
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

impl Config {
    /// A config that sends to `dsn` with everything else left at its default.
    #[must_use]
    pub fn with_dsn(dsn: Dsn) -> Self {
        Config {
            dsn: Some(dsn),
            ..Config::default()
        }
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
    }

    #[must_use]
    pub fn enabled_in_current_env(&self) -> bool {
        self.enabled_environments.is_empty()
            || self
                .enabled_environments
                .iter()
                .any(|env| env == self.environment())
    }

    #[must_use]
    pub fn valid_dsn(&self) -> bool {
        self.dsn.is_some()
    }

    #[must_use]
    pub fn sending_allowed(&self) -> bool {
        self.valid_dsn() && self.enabled_in_current_env()
    }

    /// Configured org id, or the one encoded in the DSN host.
    #[must_use]
    pub fn effective_org_id(&self) -> Option<String> {
        self.org_id.clone().or_else(|| {
            self.dsn
                .as_ref()
                .and_then(Dsn::org_id)
                .map(str::to_string)
        })
    }

    /// Tracing is on when a rate or a sampler is configured.
    #[must_use]
    pub fn tracing_enabled(&self, callbacks: &Callbacks) -> bool {
        self.traces_sample_rate.is_some() || callbacks.traces_sampler.is_some()
    }

    /// Clamps invalid values back to something usable, logging each fix.
    fn sanitize(&mut self) {
        if !is_valid_sample_rate(self.sample_rate) {
            error!(
                "CONFIG | sample_rate must be within [0.0, 1.0], got {}, using 1.0",
                self.sample_rate
            );
            self.sample_rate = 1.0;
        }
        if let Some(rate) = self.traces_sample_rate {
            if !is_valid_sample_rate(rate) {
                error!(
                    "CONFIG | traces_sample_rate must be within [0.0, 1.0], got {rate}, tracing disabled"
                );
                self.traces_sample_rate = None;
            }
        }
        if self.max_spans == 0 {
            self.max_spans = crate::traces::transaction::DEFAULT_MAX_SPANS;
        }
    }
}

#[must_use]
pub fn is_valid_sample_rate(rate: f64) -> bool {
    rate.is_finite() && (0.0..=1.0).contains(&rate)
}

#[allow(clippy::module_name_repetitions)]
pub fn get_config(config_directory: &Path) -> Result<Config, ConfigError> {
    let path = config_directory.join("sentry.yaml");

    let figment = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("SENTRY_"))
        .merge(Env::raw().only(&["HTTPS_PROXY"]));

    let mut config: Config = match figment.extract() {
        Ok(config) => config,
        Err(err) => {
            error!("CONFIG | Failed to parse config: {err}");
            return Err(ConfigError::ParseError(err.to_string()));
        }
    };

    config.sanitize();
    Ok(config)
}

fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => Err(serde::de::Error::custom("expected a string or an integer")),
    }
}

/// Accepts either a list or a comma separated string.
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Array(values) => Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Value::Null => Ok(Vec::new()),
        _ => Err(serde::de::Error::custom(
            "expected a list or a comma separated string",
        )),
    }
}
