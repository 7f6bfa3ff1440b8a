use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::envelope::DataCategory;
use crate::hub::Hub;
use crate::protocol::{
    DiscardReason, Event, SpanData, SpanId, SpanStatus, TraceContext, TraceId, TransactionSource,
};
use crate::traces::propagation::{Baggage, PropagationContext, sentry_trace};
use crate::traces::sample_rand;
use crate::traces::sampling::SamplingDecision;
use crate::traces::span::Span;
use crate::utils;

pub const DEFAULT_MAX_SPANS: usize = 1000;

/// Everything needed to start a transaction, before sampling.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub name: String,
    pub op: String,
    pub source: TransactionSource,
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
    pub parent_sampled: Option<bool>,
    /// Forces the sampling decision.
    pub sampled: Option<bool>,
    pub sample_rand: f64,
    pub baggage: Option<Baggage>,
}

impl TransactionContext {
    /// Starts a new trace.
    #[must_use]
    pub fn new(name: &str, op: &str) -> Self {
        let trace_id = TraceId::random();
        TransactionContext {
            name: name.to_string(),
            op: op.to_string(),
            source: TransactionSource::Custom,
            trace_id,
            parent_span_id: None,
            parent_sampled: None,
            sampled: None,
            sample_rand: sample_rand::generate_from_trace_id(trace_id),
            baggage: None,
        }
    }

    /// Joins the trace of a propagation context, typically one built from
    /// incoming headers.
    #[must_use]
    pub fn continue_from(name: &str, op: &str, context: &PropagationContext) -> Self {
        TransactionContext {
            name: name.to_string(),
            op: op.to_string(),
            source: TransactionSource::Custom,
            trace_id: context.trace_id,
            parent_span_id: context.parent_span_id,
            parent_sampled: context.parent_sampled,
            sampled: None,
            sample_rand: context.sample_rand,
            baggage: context.incoming_baggage().cloned(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: TransactionSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = Some(sampled);
        self
    }
}

/// Bounded list of the child spans of one transaction.
#[derive(Debug)]
pub(crate) struct SpanRecorder {
    max_spans: usize,
    spans: Vec<Arc<Mutex<SpanData>>>,
}

impl SpanRecorder {
    fn new(max_spans: usize) -> Self {
        SpanRecorder {
            max_spans,
            spans: Vec::new(),
        }
    }

    /// Returns `false` once the recorder is full; the span then still works
    /// but is not sent.
    pub(crate) fn add(&mut self, span: Arc<Mutex<SpanData>>) -> bool {
        if self.spans.len() >= self.max_spans {
            debug!("TRACES | Span recorder is full ({}), not recording span", self.max_spans);
            return false;
        }
        self.spans.push(span);
        true
    }

    fn len(&self) -> usize {
        self.spans.len()
    }

    fn finished_spans(&self) -> Vec<SpanData> {
        self.spans
            .iter()
            .filter_map(|span| {
                let span = span.lock().unwrap_or_else(PoisonError::into_inner);
                span.timestamp.is_some().then(|| span.clone())
            })
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct TransactionInner {
    pub(crate) root: SpanData,
    name: String,
    source: TransactionSource,
    sampled: bool,
    sample_rate: Option<f64>,
    sample_rand: f64,
    baggage: Option<Baggage>,
    pub(crate) recorder: SpanRecorder,
    contexts: BTreeMap<String, Value>,
    finished: bool,
    hub: Weak<Hub>,
    config: Arc<Config>,
}

impl TransactionInner {
    fn baggage(&mut self) -> &Baggage {
        let populate = self.baggage.as_ref().is_none_or(Baggage::is_mutable);
        if populate {
            let mut baggage = self.baggage.take().unwrap_or_default();
            self.populate_head_baggage(&mut baggage);
            self.baggage = Some(baggage);
        }
        self.baggage.get_or_insert_with(Baggage::frozen_empty)
    }

    fn populate_head_baggage(&self, baggage: &mut Baggage) {
        let config = &self.config;
        baggage.set("trace_id", self.root.trace_id.to_string());
        baggage.set("sample_rand", sample_rand::format(self.sample_rand));
        if let Some(rate) = self.sample_rate {
            baggage.set("sample_rate", rate.to_string());
        }
        baggage.set("sampled", self.sampled.to_string());
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
        if !self.source.is_low_quality() {
            baggage.set("transaction", self.name.clone());
        }
        baggage.freeze();
    }
}

/// The root span of a trace segment. Cloning gives another handle to the
/// same transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<Mutex<TransactionInner>>,
}

impl Transaction {
    pub(crate) fn start(
        context: TransactionContext,
        decision: SamplingDecision,
        hub: Weak<Hub>,
        config: Arc<Config>,
    ) -> Self {
        let mut root = SpanData::new(context.trace_id, context.parent_span_id);
        root.op = Some(context.op);
        root.sampled = Some(decision.sampled);
        let max_spans = config.max_spans;

        Transaction {
            inner: Arc::new(Mutex::new(TransactionInner {
                root,
                name: context.name,
                source: context.source,
                sampled: decision.sampled,
                sample_rate: decision.sample_rate,
                sample_rand: context.sample_rand,
                baggage: context.baggage,
                recorder: SpanRecorder::new(max_spans),
                contexts: BTreeMap::new(),
                finished: false,
                hub,
                config,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransactionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    #[must_use]
    pub fn source(&self) -> TransactionSource {
        self.lock().source
    }

    pub fn set_name(&self, name: &str, source: TransactionSource) {
        let mut inner = self.lock();
        inner.name = name.to_string();
        inner.source = source;
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.lock().root.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.lock().root.span_id
    }

    #[must_use]
    pub fn sampled(&self) -> bool {
        self.lock().sampled
    }

    #[must_use]
    pub fn sample_rate(&self) -> Option<f64> {
        self.lock().sample_rate
    }

    #[must_use]
    pub fn sample_rand(&self) -> f64 {
        self.lock().sample_rand
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Child spans recorded so far, finished or not.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.lock().recorder.len()
    }

    pub fn set_tag(&self, key: &str, value: impl Into<String>) {
        self.lock().root.tags.insert(key.to_string(), value.into());
    }

    pub fn set_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.lock()
            .root
            .data
            .insert(key.to_string(), utils::to_value_lossy(value));
    }

    pub fn set_status(&self, status: SpanStatus) {
        self.lock().root.status = Some(status);
    }

    pub fn set_http_status(&self, code: u16) {
        let mut inner = self.lock();
        inner
            .root
            .data
            .insert("http.response.status_code".to_string(), Value::from(code));
        inner.root.status = Some(SpanStatus::from_http_status(code));
    }

    pub fn set_context<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.lock()
            .contexts
            .insert(key.to_string(), utils::to_value_lossy(value));
    }

    #[must_use]
    pub fn trace_context(&self) -> TraceContext {
        self.lock().root.trace_context()
    }

    #[must_use]
    pub fn to_sentry_trace(&self) -> String {
        let inner = self.lock();
        sentry_trace::format(inner.root.trace_id, inner.root.span_id, Some(inner.sampled))
    }

    /// Incoming baggage, or the head baggage when this process started the
    /// trace.
    #[must_use]
    pub fn baggage(&self) -> Baggage {
        self.lock().baggage().clone()
    }

    #[must_use]
    pub fn dynamic_sampling_context(&self) -> BTreeMap<String, String> {
        self.lock().baggage().dynamic_sampling_context()
    }

    #[must_use]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        let (trace_id, span_id, sampled) = {
            let inner = self.lock();
            (inner.root.trace_id, inner.root.span_id, inner.sampled)
        };
        Span::start(Arc::clone(&self.inner), trace_id, span_id, sampled, op, description)
    }

    /// Finishes the transaction and hands it to the hub it was started on.
    /// Only the first call has an effect.
    pub fn finish(&self) {
        let (hub, outcome) = {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            inner.root.timestamp = Some(Utc::now());
            let hub = inner.hub.upgrade();

            let outcome = if inner.sampled {
                Ok(build_event(&mut inner))
            } else {
                Err(inner.recorder.len() as u64 + 1)
            };
            (hub, outcome)
        };

        let hub = hub.unwrap_or_else(Hub::current);
        match outcome {
            Ok(event) => {
                hub.capture_event(event);
            }
            Err(span_count) => {
                let Some(client) = hub.client() else {
                    return;
                };
                let reason = if client.downsample_factor() > 0 {
                    DiscardReason::Backpressure
                } else {
                    DiscardReason::SampleRate
                };
                debug!("TRACES | Discarding unsampled transaction ({reason})");
                client.record_lost_event(reason, DataCategory::Transaction, 1);
                client.record_lost_event(reason, DataCategory::Span, span_count);
            }
        }
    }
}

fn build_event(inner: &mut TransactionInner) -> Event {
    let mut event = Event::new_transaction(&inner.name, inner.source);
    event.start_timestamp = Some(inner.root.start_timestamp);
    if let Some(timestamp) = inner.root.timestamp {
        event.timestamp = timestamp;
    }
    event.tags.clone_from(&inner.root.tags);
    event.contexts.clone_from(&inner.contexts);
    event.set_trace_context(&inner.root.trace_context());
    event.spans = inner.recorder.finished_spans();
    event.dynamic_sampling_context = Some(inner.baggage().dynamic_sampling_context());
    event
}
