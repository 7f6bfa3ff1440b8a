//! Incoming and outgoing trace headers.

pub mod baggage;
pub mod carrier;
pub mod error;
pub mod sentry_trace;

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::Config;
use crate::protocol::{SpanId, TraceContext, TraceId};
use crate::traces::sample_rand;

pub use baggage::{BAGGAGE_HEADER, Baggage};
pub use carrier::{Extractor, Injector};
pub use sentry_trace::{SENTRY_TRACE_HEADER, SentryTrace};

/// Whether a trace from an organization `incoming_org_id` may be continued.
#[must_use]
pub fn should_continue_trace(config: &Config, incoming_org_id: Option<&str>) -> bool {
    let local_org_id = config.effective_org_id();
    match (local_org_id.as_deref(), incoming_org_id) {
        (Some(local), Some(incoming)) => {
            if local == incoming {
                true
            } else {
                debug!(
                    "TRACES | Not continuing trace from org {incoming}, local org is {local}"
                );
                false
            }
        }
        (None, None) => true,
        _ => {
            if config.strict_trace_continuation {
                debug!("TRACES | Not continuing trace, org ids differ in strict mode");
                false
            } else {
                true
            }
        }
    }
}

/// Trace identity of a scope when no span is active.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub parent_sampled: Option<bool>,
    pub sample_rand: f64,
    pub incoming_trace: bool,
    baggage: Option<Baggage>,
}

impl Default for PropagationContext {
    fn default() -> Self {
        PropagationContext::new()
    }
}

impl PropagationContext {
    /// A fresh trace started by this process.
    #[must_use]
    pub fn new() -> Self {
        let trace_id = TraceId::random();
        PropagationContext {
            trace_id,
            span_id: SpanId::random(),
            parent_span_id: None,
            parent_sampled: None,
            sample_rand: sample_rand::generate_from_trace_id(trace_id),
            incoming_trace: false,
            baggage: None,
        }
    }

    /// Continues the trace described by `sentry-trace` / `baggage` header
    /// values. Falls back to a fresh trace when the headers are missing,
    /// malformed or come from another organization.
    #[must_use]
    pub fn from_headers(sentry_trace: Option<&str>, baggage: Option<&str>, config: &Config) -> Self {
        let Some(header) = sentry_trace else {
            return PropagationContext::new();
        };
        let parsed = match sentry_trace::parse(header) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("TRACES | {e}");
                return PropagationContext::new();
            }
        };

        let baggage = match baggage {
            Some(raw) if !raw.trim().is_empty() => Baggage::from_incoming_header(raw),
            _ => Baggage::frozen_empty(),
        };

        if !should_continue_trace(config, baggage.get("org_id")) {
            return PropagationContext::new();
        }

        let sample_rand = baggage
            .get("sample_rand")
            .and_then(sample_rand::parse)
            .unwrap_or_else(|| {
                let sample_rate = baggage.get("sample_rate").and_then(|r| r.parse().ok());
                sample_rand::generate_from_sampling_decision(
                    parsed.parent_sampled,
                    sample_rate,
                    parsed.trace_id,
                )
            });

        PropagationContext {
            trace_id: parsed.trace_id,
            span_id: SpanId::random(),
            parent_span_id: parsed.parent_span_id,
            parent_sampled: parsed.parent_sampled,
            sample_rand,
            incoming_trace: true,
            baggage: Some(baggage),
        }
    }

    /// Reads the trace headers from any carrier.
    #[must_use]
    pub fn extract<E: Extractor + ?Sized>(carrier: &E, config: &Config) -> Self {
        PropagationContext::from_headers(
            carrier.get(SENTRY_TRACE_HEADER),
            carrier.get(BAGGAGE_HEADER),
            config,
        )
    }

    #[must_use]
    pub fn trace_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            op: None,
            description: None,
            status: None,
            origin: None,
            data: BTreeMap::new(),
        }
    }

    /// `sentry-trace` value; no sampling decision is attached.
    #[must_use]
    pub fn traceparent(&self) -> String {
        sentry_trace::format(self.trace_id, self.span_id, None)
    }

    /// The incoming baggage or, for traces started here, the head baggage.
    pub fn baggage(&mut self, config: &Config) -> &Baggage {
        let populate = self.baggage.as_ref().is_none_or(Baggage::is_mutable);
        if populate {
            let mut baggage = self.baggage.take().unwrap_or_default();
            self.populate_head_baggage(&mut baggage, config);
            self.baggage = Some(baggage);
        }
        self.baggage.get_or_insert_with(Baggage::frozen_empty)
    }

    #[must_use]
    pub fn incoming_baggage(&self) -> Option<&Baggage> {
        self.baggage.as_ref()
    }

    pub fn dynamic_sampling_context(&mut self, config: &Config) -> BTreeMap<String, String> {
        self.baggage(config).dynamic_sampling_context()
    }

    fn populate_head_baggage(&self, baggage: &mut Baggage, config: &Config) {
        baggage.set("trace_id", self.trace_id.to_string());
        baggage.set("sample_rand", sample_rand::format(self.sample_rand));
        baggage.set("environment", config.environment());
        if let Some(release) = &config.release {
            baggage.set("release", release.clone());
        }
        if let Some(dsn) = &config.dsn {
            baggage.set("public_key", dsn.public_key());
        }
        if let Some(org_id) = config.effective_org_id() {
            baggage.set("org_id", org_id);
        }
        baggage.freeze();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TRACE_ID: &str = "771a43a4192642f0b136d5159a501700";

    fn config() -> Config {
        Config {
            release: Some("1.0.0".to_string()),
            ..Config::with_dsn("https://public@o42.ingest.example.com/1".parse().unwrap())
        }
    }

    #[test]
    fn new_context_populates_head_baggage() {
        let mut context = PropagationContext::new();
        assert!(!context.incoming_trace);
        let config = config();
        let baggage = context.baggage(&config).clone();
        assert!(!baggage.is_mutable());
        assert_eq!(baggage.get("trace_id"), Some(context.trace_id.to_string().as_str()));
        assert_eq!(baggage.get("environment"), Some("production"));
        assert_eq!(baggage.get("release"), Some("1.0.0"));
        assert_eq!(baggage.get("public_key"), Some("public"));
        assert_eq!(baggage.get("org_id"), Some("42"));
        assert_eq!(
            baggage.get("sample_rand"),
            Some(sample_rand::format(context.sample_rand).as_str())
        );
    }

    #[test]
    fn continue_incoming_trace() {
        let config = config();
        let context = PropagationContext::from_headers(
            Some(&format!("{TRACE_ID}-7c51afd529da4a2a-1")),
            Some("sentry-trace_id=771a43a4192642f0b136d5159a501700,sentry-sample_rand=0.250000,sentry-org_id=42"),
            &config,
        );
        assert!(context.incoming_trace);
        assert_eq!(context.trace_id.to_string(), TRACE_ID);
        assert_eq!(context.parent_span_id.unwrap().to_string(), "7c51afd529da4a2a");
        assert_eq!(context.parent_sampled, Some(true));
        assert!((context.sample_rand - 0.25).abs() < f64::EPSILON);
        assert_eq!(context.traceparent().len(), 49);
    }

    #[test]
    fn incoming_trace_without_baggage_is_frozen_empty() {
        let mut context =
            PropagationContext::from_headers(Some(TRACE_ID), None, &config());
        assert!(context.incoming_trace);
        assert!(context.dynamic_sampling_context(&config()).is_empty());
    }

    #[test]
    fn sample_rand_is_derived_from_parent_decision() {
        let config = config();
        let sampled = PropagationContext::from_headers(
            Some(&format!("{TRACE_ID}-7c51afd529da4a2a-1")),
            Some("sentry-sample_rate=0.1"),
            &config,
        );
        assert!(sampled.sample_rand < 0.1);

        let unsampled = PropagationContext::from_headers(
            Some(&format!("{TRACE_ID}-7c51afd529da4a2a-0")),
            Some("sentry-sample_rate=0.1"),
            &config,
        );
        assert!(unsampled.sample_rand >= 0.1);
    }

    #[test]
    fn foreign_org_starts_new_trace() {
        let context = PropagationContext::from_headers(
            Some(TRACE_ID),
            Some("sentry-org_id=7"),
            &config(),
        );
        assert!(!context.incoming_trace);
        assert_ne!(context.trace_id.to_string(), TRACE_ID);
    }

    #[test]
    fn strict_continuation_requires_both_org_ids() {
        let strict = Config {
            strict_trace_continuation: true,
            ..config()
        };
        assert!(!should_continue_trace(&strict, None));
        assert!(should_continue_trace(&strict, Some("42")));
        assert!(should_continue_trace(&config(), None));
        assert!(should_continue_trace(&Config::default(), Some("42")));
        let strict_without_org = Config {
            strict_trace_continuation: true,
            ..Config::default()
        };
        assert!(!should_continue_trace(&strict_without_org, Some("42")));
        assert!(should_continue_trace(&strict_without_org, None));
    }

    #[test]
    fn extract_from_carrier() {
        let mut headers = HashMap::new();
        headers.insert("Sentry-Trace".to_string(), format!("{TRACE_ID}-7c51afd529da4a2a"));
        let context = PropagationContext::extract(&headers, &config());
        assert_eq!(context.trace_id.to_string(), TRACE_ID);
        assert_eq!(context.parent_sampled, None);
    }

    #[test]
    fn malformed_header_starts_new_trace() {
        let context = PropagationContext::from_headers(Some("garbage"), None, &config());
        assert!(!context.incoming_trace);
    }
}
