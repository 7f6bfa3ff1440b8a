use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::{SpanData, SpanId, SpanStatus, TraceContext, TraceId};
use crate::traces::propagation::Baggage;
use crate::traces::transaction::{Transaction, TransactionInner};
use crate::utils;

/// A child span. Belongs to exactly one transaction, which sends it when
/// the transaction finishes.
#[derive(Debug, Clone)]
pub struct Span {
    data: Arc<Mutex<SpanData>>,
    transaction: Arc<Mutex<TransactionInner>>,
}

impl Span {
    pub(crate) fn start(
        transaction: Arc<Mutex<TransactionInner>>,
        trace_id: TraceId,
        parent_span_id: SpanId,
        sampled: bool,
        op: &str,
        description: &str,
    ) -> Self {
        let mut data = SpanData::new(trace_id, Some(parent_span_id));
        data.op = Some(op.to_string());
        if !description.is_empty() {
            data.description = Some(description.to_string());
        }
        data.sampled = Some(sampled);
        let data = Arc::new(Mutex::new(data));

        transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recorder
            .add(Arc::clone(&data));

        Span { data, transaction }
    }

    fn lock(&self) -> MutexGuard<'_, SpanData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.lock().trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.lock().span_id
    }

    #[must_use]
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.lock().parent_span_id
    }

    #[must_use]
    pub fn sampled(&self) -> bool {
        self.lock().sampled.unwrap_or(false)
    }

    pub fn set_description(&self, description: &str) {
        self.lock().description = Some(description.to_string());
    }

    pub fn set_tag(&self, key: &str, value: impl Into<String>) {
        self.lock().tags.insert(key.to_string(), value.into());
    }

    pub fn set_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.lock()
            .data
            .insert(key.to_string(), utils::to_value_lossy(value));
    }

    pub fn set_status(&self, status: SpanStatus) {
        self.lock().status = Some(status);
    }

    pub fn set_http_status(&self, code: u16) {
        let mut data = self.lock();
        data.data
            .insert("http.response.status_code".to_string(), Value::from(code));
        data.status = Some(SpanStatus::from_http_status(code));
    }

    /// Sets the end timestamp; later calls keep the first one.
    pub fn finish(&self) {
        let mut data = self.lock();
        if data.timestamp.is_none() {
            data.timestamp = Some(Utc::now());
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().timestamp.is_some()
    }

    #[must_use]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        let (trace_id, span_id, sampled) = {
            let data = self.lock();
            (data.trace_id, data.span_id, data.sampled.unwrap_or(false))
        };
        Span::start(
            Arc::clone(&self.transaction),
            trace_id,
            span_id,
            sampled,
            op,
            description,
        )
    }

    #[must_use]
    pub fn transaction(&self) -> Transaction {
        Transaction {
            inner: Arc::clone(&self.transaction),
        }
    }

    #[must_use]
    pub fn trace_context(&self) -> TraceContext {
        self.lock().trace_context()
    }

    #[must_use]
    pub fn to_sentry_trace(&self) -> String {
        self.lock().to_sentry_trace()
    }

    #[must_use]
    pub fn data(&self) -> SpanData {
        self.lock().clone()
    }
}

/// Whatever span is currently active on a scope.
#[derive(Debug, Clone)]
pub enum TransactionOrSpan {
    Transaction(Transaction),
    Span(Span),
}

impl From<Transaction> for TransactionOrSpan {
    fn from(transaction: Transaction) -> Self {
        TransactionOrSpan::Transaction(transaction)
    }
}

impl From<Span> for TransactionOrSpan {
    fn from(span: Span) -> Self {
        TransactionOrSpan::Span(span)
    }
}

impl TransactionOrSpan {
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        match self {
            TransactionOrSpan::Transaction(t) => t.trace_id(),
            TransactionOrSpan::Span(s) => s.trace_id(),
        }
    }

    #[must_use]
    pub fn span_id(&self) -> SpanId {
        match self {
            TransactionOrSpan::Transaction(t) => t.span_id(),
            TransactionOrSpan::Span(s) => s.span_id(),
        }
    }

    #[must_use]
    pub fn parent_span_id(&self) -> Option<SpanId> {
        match self {
            TransactionOrSpan::Transaction(t) => t.trace_context().parent_span_id,
            TransactionOrSpan::Span(s) => s.parent_span_id(),
        }
    }

    #[must_use]
    pub fn sampled(&self) -> bool {
        match self {
            TransactionOrSpan::Transaction(t) => t.sampled(),
            TransactionOrSpan::Span(s) => s.sampled(),
        }
    }

    #[must_use]
    pub fn transaction(&self) -> Transaction {
        match self {
            TransactionOrSpan::Transaction(t) => t.clone(),
            TransactionOrSpan::Span(s) => s.transaction(),
        }
    }

    #[must_use]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        match self {
            TransactionOrSpan::Transaction(t) => t.start_child(op, description),
            TransactionOrSpan::Span(s) => s.start_child(op, description),
        }
    }

    pub fn set_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match self {
            TransactionOrSpan::Transaction(t) => t.set_data(key, value),
            TransactionOrSpan::Span(s) => s.set_data(key, value),
        }
    }

    pub fn set_status(&self, status: SpanStatus) {
        match self {
            TransactionOrSpan::Transaction(t) => t.set_status(status),
            TransactionOrSpan::Span(s) => s.set_status(status),
        }
    }

    pub fn finish(&self) {
        match self {
            TransactionOrSpan::Transaction(t) => t.finish(),
            TransactionOrSpan::Span(s) => s.finish(),
        }
    }

    #[must_use]
    pub fn trace_context(&self) -> TraceContext {
        match self {
            TransactionOrSpan::Transaction(t) => t.trace_context(),
            TransactionOrSpan::Span(s) => s.trace_context(),
        }
    }

    #[must_use]
    pub fn to_sentry_trace(&self) -> String {
        match self {
            TransactionOrSpan::Transaction(t) => t.to_sentry_trace(),
            TransactionOrSpan::Span(s) => s.to_sentry_trace(),
        }
    }

    /// Spans propagate the baggage of their transaction.
    #[must_use]
    pub fn baggage(&self) -> Baggage {
        self.transaction().baggage()
    }

    #[must_use]
    pub fn dynamic_sampling_context(&self) -> BTreeMap<String, String> {
        self.transaction().dynamic_sampling_context()
    }
}
