//! Contextual data applied to every event captured while the scope is
//! active.

pub mod breadcrumbs;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::protocol::{Breadcrumb, Event, Level, TraceContext, TransactionInfo, TransactionSource};
use crate::sessions::Session;
use crate::traces::TransactionOrSpan;
use crate::traces::propagation::{Extractor, PropagationContext};
use crate::utils;

pub use breadcrumbs::{BreadcrumbBuffer, DEFAULT_MAX_BREADCRUMBS};

pub type EventProcessor = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;

/// Per-call additions merged over the scope for a single capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureOptions {
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, Value>,
    pub user: BTreeMap<String, Value>,
    pub contexts: BTreeMap<String, Value>,
    pub level: Option<Level>,
    pub fingerprint: Option<Vec<String>>,
}

impl CaptureOptions {
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_extra<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        self.extra.insert(key.to_string(), utils::to_value_lossy(value));
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }
}

#[derive(Clone)]
pub struct Scope {
    level: Option<Level>,
    fingerprint: Vec<String>,
    transaction_name: Option<String>,
    transaction_source: Option<TransactionSource>,
    tags: BTreeMap<String, String>,
    extra: BTreeMap<String, Value>,
    user: BTreeMap<String, Value>,
    contexts: BTreeMap<String, Value>,
    breadcrumbs: BreadcrumbBuffer,
    event_processors: Vec<EventProcessor>,
    span: Option<TransactionOrSpan>,
    session: Option<Arc<Mutex<Session>>>,
    propagation_context: PropagationContext,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("level", &self.level)
            .field("transaction_name", &self.transaction_name)
            .field("tags", &self.tags)
            .field("breadcrumbs", &self.breadcrumbs.len())
            .field("event_processors", &self.event_processors.len())
            .field("span", &self.span.as_ref().map(TransactionOrSpan::span_id))
            .field("propagation_context", &self.propagation_context)
            .finish_non_exhaustive()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new(DEFAULT_MAX_BREADCRUMBS)
    }
}

impl Scope {
    #[must_use]
    pub fn new(max_breadcrumbs: usize) -> Self {
        Scope {
            level: None,
            fingerprint: Vec::new(),
            transaction_name: None,
            transaction_source: None,
            tags: BTreeMap::new(),
            extra: BTreeMap::new(),
            user: BTreeMap::new(),
            contexts: BTreeMap::new(),
            breadcrumbs: BreadcrumbBuffer::new(max_breadcrumbs),
            event_processors: Vec::new(),
            span: None,
            session: None,
            propagation_context: PropagationContext::new(),
        }
    }

    /// Resets everything, including the trace.
    pub fn clear(&mut self) {
        *self = Scope::new(self.breadcrumbs.capacity());
    }

    pub fn set_level(&mut self, level: Option<Level>) {
        self.level = level;
    }

    #[must_use]
    pub fn level(&self) -> Option<Level> {
        self.level
    }

    pub fn set_fingerprint(&mut self, fingerprint: Vec<String>) {
        self.fingerprint = fingerprint;
    }

    pub fn set_transaction_name(&mut self, name: &str, source: TransactionSource) {
        self.transaction_name = Some(name.to_string());
        self.transaction_source = Some(source);
    }

    #[must_use]
    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction_name.as_deref()
    }

    #[must_use]
    pub fn transaction_source(&self) -> Option<TransactionSource> {
        self.transaction_source
    }

    pub fn set_tag(&mut self, key: &str, value: impl Into<String>) {
        self.tags.insert(key.to_string(), value.into());
    }

    pub fn set_tags(&mut self, tags: BTreeMap<String, String>) {
        self.tags.extend(tags);
    }

    pub fn remove_tag(&mut self, key: &str) {
        self.tags.remove(key);
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn set_extra<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.extra.insert(key.to_string(), utils::to_value_lossy(value));
    }

    #[must_use]
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub fn set_user(&mut self, user: BTreeMap<String, Value>) {
        self.user = user;
    }

    #[must_use]
    pub fn user(&self) -> &BTreeMap<String, Value> {
        &self.user
    }

    pub fn set_context<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.contexts
            .insert(key.to_string(), utils::to_value_lossy(value));
    }

    pub fn remove_context(&mut self, key: &str) {
        self.contexts.remove(key);
    }

    #[must_use]
    pub fn contexts(&self) -> &BTreeMap<String, Value> {
        &self.contexts
    }

    pub fn add_breadcrumb(&mut self, mut breadcrumb: Breadcrumb) {
        breadcrumb.normalize();
        self.breadcrumbs.record(breadcrumb);
    }

    pub fn set_max_breadcrumbs(&mut self, max: usize) {
        self.breadcrumbs.set_capacity(max);
    }

    pub fn clear_breadcrumbs(&mut self) {
        self.breadcrumbs.clear();
    }

    #[must_use]
    pub fn breadcrumbs(&self) -> &BreadcrumbBuffer {
        &self.breadcrumbs
    }

    pub fn add_event_processor<F>(&mut self, processor: F)
    where
        F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
    {
        self.event_processors.push(Arc::new(processor));
    }

    pub fn set_span(&mut self, span: Option<TransactionOrSpan>) {
        self.span = span;
    }

    #[must_use]
    pub fn span(&self) -> Option<&TransactionOrSpan> {
        self.span.as_ref()
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session.map(|s| Arc::new(Mutex::new(s)));
    }

    /// Removes and returns the current session.
    pub fn take_session(&mut self) -> Option<Session> {
        let session = self.session.take()?;
        let session = session.lock().unwrap_or_else(PoisonError::into_inner);
        Some(session.clone())
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.session
            .as_ref()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    pub(crate) fn update_session_from_error(&self) {
        if let Some(session) = &self.session {
            session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update_from_error();
        }
    }

    #[must_use]
    pub fn propagation_context(&self) -> &PropagationContext {
        &self.propagation_context
    }

    pub fn set_propagation_context(&mut self, context: PropagationContext) {
        self.propagation_context = context;
    }

    /// Replaces the trace with the one described by incoming headers.
    pub fn generate_propagation_context<E: Extractor + ?Sized>(&mut self, carrier: &E, config: &Config) {
        self.propagation_context = PropagationContext::extract(carrier, config);
    }

    /// Per-call data wins over what the scope holds.
    pub fn update_from_options(&mut self, options: CaptureOptions) {
        self.tags.extend(options.tags);
        self.extra.extend(options.extra);
        self.user.extend(options.user);
        self.contexts.extend(options.contexts);
        if options.level.is_some() {
            self.level = options.level;
        }
        if let Some(fingerprint) = options.fingerprint {
            self.fingerprint = fingerprint;
        }
    }

    #[must_use]
    pub fn trace_context(&self) -> TraceContext {
        match &self.span {
            Some(span) => span.trace_context(),
            None => self.propagation_context.trace_context(),
        }
    }

    #[must_use]
    pub fn traceparent(&self) -> String {
        match &self.span {
            Some(span) => span.to_sentry_trace(),
            None => self.propagation_context.traceparent(),
        }
    }

    pub fn baggage(&mut self, config: &Config) -> String {
        match &self.span {
            Some(span) => span.baggage().serialize(true),
            None => self.propagation_context.baggage(config).serialize(true),
        }
    }

    pub fn dynamic_sampling_context(&mut self, config: &Config) -> BTreeMap<String, String> {
        match &self.span {
            Some(span) => span.dynamic_sampling_context(),
            None => self.propagation_context.dynamic_sampling_context(config),
        }
    }

    /// Fills in what the event does not carry itself, then runs the event
    /// processors. `None` when a processor dropped the event.
    pub fn apply_to_event(&mut self, mut event: Event, config: &Config) -> Option<Event> {
        merge_missing(&mut event.tags, &self.tags);
        merge_missing(&mut event.extra, &self.extra);
        merge_missing(&mut event.user, &self.user);
        merge_missing(&mut event.contexts, &self.contexts);

        if self.level.is_some() && !event.is_transaction() {
            event.level = self.level;
        }
        if event.fingerprint.is_empty() {
            event.fingerprint.clone_from(&self.fingerprint);
        }
        if event.transaction.is_none() {
            if let Some(name) = &self.transaction_name {
                event.transaction = Some(name.clone());
                event.transaction_info = self
                    .transaction_source
                    .map(|source| TransactionInfo { source });
            }
        }
        if event.breadcrumbs.is_empty() && !event.is_transaction() {
            event.breadcrumbs = self.breadcrumbs.to_vec().into();
        }

        if !event.contexts.contains_key("trace") {
            event.set_trace_context(&self.trace_context());
        }
        if event.dynamic_sampling_context.is_none() {
            event.dynamic_sampling_context = Some(self.dynamic_sampling_context(config));
        }

        let mut event = Some(event);
        for processor in &self.event_processors {
            event = processor(event?);
        }
        event
    }
}

fn merge_missing<V: Clone>(target: &mut BTreeMap<String, V>, source: &BTreeMap<String, V>) {
    for (key, value) in source {
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::with_dsn("https://public@sentry.example.com/1".parse().unwrap())
    }

    #[test]
    fn event_values_win_over_scope() {
        let mut scope = Scope::default();
        scope.set_tag("foo", "scope");
        scope.set_tag("bar", "scope");
        scope.set_extra("answer", &42);
        scope.add_breadcrumb(Breadcrumb::new("clicked"));

        let mut event = Event::from_message("hi", Level::Info);
        event.tags.insert("foo".to_string(), "event".to_string());
        let event = scope.apply_to_event(event, &config()).unwrap();

        assert_eq!(event.tags["foo"], "event");
        assert_eq!(event.tags["bar"], "scope");
        assert_eq!(event.extra["answer"], 42);
        assert_eq!(event.breadcrumbs.values.len(), 1);
        assert_eq!(
            event.trace_context().unwrap().trace_id,
            scope.propagation_context().trace_id
        );
        assert!(event.dynamic_sampling_context.unwrap().contains_key("trace_id"));
    }

    #[test]
    fn duplicated_scope_is_isolated() {
        let mut parent = Scope::default();
        parent.set_tag("shared", "yes");
        let mut child = parent.clone();
        child.set_tag("child", "only");
        child.add_breadcrumb(Breadcrumb::new("child crumb"));

        assert!(!parent.tags().contains_key("child"));
        assert!(parent.breadcrumbs().is_empty());
        assert_eq!(child.tags()["shared"], "yes");
    }

    #[test]
    fn processors_can_drop_events() {
        let mut scope = Scope::default();
        scope.add_event_processor(|mut event| {
            event.tags.insert("processed".to_string(), "1".to_string());
            Some(event)
        });
        let event = scope.apply_to_event(Event::new(), &config()).unwrap();
        assert_eq!(event.tags["processed"], "1");

        scope.add_event_processor(|_| None);
        assert!(scope.apply_to_event(Event::new(), &config()).is_none());
    }

    #[test]
    fn options_override_scope() {
        let mut scope = Scope::default();
        scope.set_tag("foo", "scope");
        scope.update_from_options(
            CaptureOptions::default()
                .with_tag("foo", "call")
                .with_level(Level::Warning),
        );
        let event = scope
            .apply_to_event(Event::from_message("x", Level::Info), &config())
            .unwrap();
        assert_eq!(event.tags["foo"], "call");
        assert_eq!(event.level, Some(Level::Warning));
    }

    #[test]
    fn clear_starts_new_trace() {
        let mut scope = Scope::new(5);
        scope.set_tag("a", "b");
        let trace_id = scope.propagation_context().trace_id;
        scope.clear();
        assert!(scope.tags().is_empty());
        assert_ne!(scope.propagation_context().trace_id, trace_id);
        assert_eq!(scope.breadcrumbs().capacity(), 5);
    }
}
