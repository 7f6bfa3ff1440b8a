//! The hub: a stack of client/scope layers for one unit of work.
//!
//! Every thread has its own current hub, created on first use from the top
//! layer of the main hub. Only the top layer is active; pushing copies it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::client::Client;
use crate::logs::LogEvent;
use crate::metrics::MetricEvent;
use crate::protocol::{Breadcrumb, CheckIn, Event, Level};
use crate::scope::{CaptureOptions, Scope};
use crate::sessions::Session;
use crate::traces::propagation::{BAGGAGE_HEADER, Extractor, PropagationContext, SENTRY_TRACE_HEADER};
use crate::traces::sampling;
use crate::traces::{Span, Transaction, TransactionContext, TransactionOrSpan};

lazy_static! {
    static ref MAIN_HUB: Arc<Hub> = Arc::new(Hub::new(None, Scope::default()));
}

thread_local! {
    static THREAD_HUB: RefCell<Option<Arc<Hub>>> = const { RefCell::new(None) };
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone, Default)]
struct Layer {
    client: Option<Arc<Client>>,
    scope: Scope,
}

pub struct Hub {
    stack: Mutex<Vec<Layer>>,
    last_event_id: Mutex<Option<Uuid>>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("depth", &self.stack().len())
            .field("last_event_id", &self.last_event_id())
            .finish_non_exhaustive()
    }
}

/// Pops the layer pushed by [`Hub::push_scope`] when dropped, also while
/// unwinding.
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    hub: &'a Hub,
    depth: usize,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.hub.pop_to(self.depth);
    }
}

/// Set while a capture runs on this thread, so that anything captured from
/// inside the pipeline (a filter, a processor) is refused.
struct CaptureGuard;

impl CaptureGuard {
    fn enter() -> Option<CaptureGuard> {
        if CAPTURING.with(Cell::get) {
            return None;
        }
        CAPTURING.with(|c| c.set(true));
        Some(CaptureGuard)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(false));
    }
}

/// Finishes a child span and puts its parent back on the scope.
struct RestoreSpan<'a> {
    hub: &'a Hub,
    child: &'a Span,
    parent: Option<TransactionOrSpan>,
}

impl Drop for RestoreSpan<'_> {
    fn drop(&mut self) {
        self.child.finish();
        let parent = self.parent.take();
        self.hub.scope_locked(|scope| scope.set_span(parent));
    }
}

struct RestoreHub(Option<Arc<Hub>>);

impl Drop for RestoreHub {
    fn drop(&mut self) {
        let previous = self.0.take();
        THREAD_HUB.with(|cell| *cell.borrow_mut() = previous);
    }
}

impl Hub {
    #[must_use]
    pub fn new(client: Option<Arc<Client>>, mut scope: Scope) -> Self {
        if let Some(client) = &client {
            scope.set_max_breadcrumbs(client.config().max_breadcrumbs);
        }
        Hub {
            stack: Mutex::new(vec![Layer { client, scope }]),
            last_event_id: Mutex::new(None),
        }
    }

    /// A hub holding a copy of `other`'s top layer.
    #[must_use]
    pub fn new_from_top(other: &Hub) -> Self {
        let top = other.with_top(|layer| layer.clone());
        Hub::new(top.client, top.scope)
    }

    /// The process wide hub that thread hubs are cloned from.
    #[must_use]
    pub fn main() -> Arc<Hub> {
        Arc::clone(&MAIN_HUB)
    }

    /// This thread's hub.
    #[must_use]
    pub fn current() -> Arc<Hub> {
        THREAD_HUB.with(|cell| {
            let mut slot = cell.borrow_mut();
            let hub = slot.get_or_insert_with(|| Arc::new(Hub::new_from_top(&MAIN_HUB)));
            Arc::clone(hub)
        })
    }

    /// Makes `hub` this thread's current hub while `f` runs.
    pub fn run<F, R>(hub: Arc<Hub>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let previous = THREAD_HUB.with(|cell| cell.replace(Some(hub)));
        let _restore = RestoreHub(previous);
        f()
    }

    fn stack(&self) -> MutexGuard<'_, Vec<Layer>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_top<R>(&self, f: impl FnOnce(&mut Layer) -> R) -> R {
        let mut stack = self.stack();
        if stack.is_empty() {
            stack.push(Layer::default());
        }
        let top = stack.len() - 1;
        f(&mut stack[top])
    }

    #[must_use]
    pub fn client(&self) -> Option<Arc<Client>> {
        self.with_top(|layer| layer.client.clone())
    }

    /// Binds `client` to the top layer and sizes that scope's breadcrumb
    /// buffer from the client's `max_breadcrumbs`.
    pub fn bind_client(&self, client: Option<Arc<Client>>) {
        self.with_top(|layer| {
            if let Some(client) = &client {
                layer.scope.set_max_breadcrumbs(client.config().max_breadcrumbs);
            }
            layer.client = client;
        });
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client().is_some_and(|client| client.is_enabled())
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack().len()
    }

    /// Pushes a copy of the top layer.
    #[must_use = "the scope is popped as soon as the guard is dropped"]
    pub fn push_scope(&self) -> ScopeGuard<'_> {
        let mut stack = self.stack();
        let top = stack.last().cloned().unwrap_or_default();
        stack.push(top);
        ScopeGuard {
            hub: self,
            depth: stack.len(),
        }
    }

    fn pop_to(&self, depth: usize) {
        let mut stack = self.stack();
        if stack.len() < depth {
            debug!("HUB | Scope at depth {depth} was already popped");
            return;
        }
        stack.truncate(depth.saturating_sub(1).max(1));
    }

    /// Runs `f` on a temporary copy of the scope that `configure` may
    /// change first. The copy is popped however `f` exits.
    pub fn with_scope<C, F, R>(&self, configure: C, f: F) -> R
    where
        C: FnOnce(&mut Scope),
        F: FnOnce() -> R,
    {
        let _guard = self.push_scope();
        self.configure_scope(configure);
        f()
    }

    /// Runs `f` on a copy of the top scope and stores the copy back when `f`
    /// returns. No lock is held while `f` runs, so it may capture or add
    /// breadcrumbs through this hub. Scope changes made that way are
    /// replaced by `f`'s copy. Changes are dropped when `f` leaves the
    /// scope stack at a different depth.
    pub fn configure_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Scope) -> R,
    {
        let (depth, mut scope) = {
            let stack = self.stack();
            let scope = stack.last().map(|layer| layer.scope.clone()).unwrap_or_default();
            (stack.len(), scope)
        };
        let result = f(&mut scope);
        let mut stack = self.stack();
        let len = stack.len();
        match stack.last_mut() {
            Some(top) if len == depth => top.scope = scope,
            _ => debug!("HUB | Scope stack changed while configuring, dropping changes"),
        }
        result
    }

    /// Runs `f` on the top scope with the stack locked. `f` must not call
    /// back into this hub.
    pub(crate) fn scope_locked<R>(&self, f: impl FnOnce(&mut Scope) -> R) -> R {
        self.with_top(|layer| f(&mut layer.scope))
    }

    pub fn capture_event(&self, event: Event) -> Option<Uuid> {
        self.capture_event_with(event, CaptureOptions::default())
    }

    /// Captures `event` with `options` merged over the current scope for
    /// this call only.
    pub fn capture_event_with(&self, event: Event, options: CaptureOptions) -> Option<Uuid> {
        let Some(_guard) = CaptureGuard::enter() else {
            debug!("HUB | Refusing capture from inside the capture pipeline");
            return None;
        };
        let (client, mut scope) = self.with_top(|layer| (layer.client.clone(), layer.scope.clone()));
        let client = client?;
        scope.update_from_options(options);

        let is_error = event.is_error();
        let has_exception = !event.exception.is_empty();
        let event_id = client.capture_event(event, Some(&mut scope))?;

        if is_error {
            *self
                .last_event_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(event_id);
            if has_exception {
                scope.update_session_from_error();
            }
        }
        Some(event_id)
    }

    pub fn capture_error<E: StdError + ?Sized>(&self, error: &E) -> Option<Uuid> {
        self.capture_error_with(error, CaptureOptions::default())
    }

    pub fn capture_error_with<E: StdError + ?Sized>(
        &self,
        error: &E,
        options: CaptureOptions,
    ) -> Option<Uuid> {
        let client = self.client()?;
        let event = client.event_from_error(error)?;
        self.capture_event_with(event, options)
    }

    pub fn capture_message(&self, message: &str, level: Level) -> Option<Uuid> {
        self.capture_event(Event::from_message(message, level))
    }

    pub fn capture_check_in(&self, check_in: CheckIn) -> Option<Uuid> {
        let Some(_guard) = CaptureGuard::enter() else {
            return None;
        };
        let (client, scope) = self.with_top(|layer| (layer.client.clone(), layer.scope.clone()));
        client?.capture_check_in(check_in, Some(&scope))
    }

    /// Records a breadcrumb on the current scope after `before_breadcrumb`.
    pub fn add_breadcrumb(&self, breadcrumb: Breadcrumb) {
        let Some(client) = self.client() else {
            return;
        };
        if !client.config().enabled_in_current_env() {
            return;
        }
        let breadcrumb = match &client.callbacks().before_breadcrumb {
            Some(filter) => match filter(breadcrumb) {
                Some(breadcrumb) => breadcrumb,
                None => {
                    debug!("HUB | Breadcrumb dropped by before_breadcrumb");
                    return;
                }
            },
            None => breadcrumb,
        };
        self.scope_locked(|scope| scope.add_breadcrumb(breadcrumb));
    }

    /// Id of the last error captured through this hub.
    #[must_use]
    pub fn last_event_id(&self) -> Option<Uuid> {
        *self
            .last_event_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_transaction(self: &Arc<Self>, context: TransactionContext) -> Transaction {
        self.start_transaction_with(context, &BTreeMap::new())
    }

    /// Starts a transaction; `custom` is handed to the traces sampler.
    pub fn start_transaction_with(
        self: &Arc<Self>,
        context: TransactionContext,
        custom: &BTreeMap<String, Value>,
    ) -> Transaction {
        let client = self.client();
        let (config, decision) = match &client {
            Some(client) => (
                client.config_arc(),
                sampling::decide(
                    client.config(),
                    client.callbacks(),
                    &context,
                    custom,
                    client.downsample_factor(),
                ),
            ),
            None => (
                Arc::default(),
                sampling::SamplingDecision {
                    sampled: false,
                    sample_rate: None,
                },
            ),
        };
        debug!(
            "TRACES | Starting transaction {} (sampled: {})",
            context.name, decision.sampled
        );
        Transaction::start(context, decision, Arc::downgrade(self), config)
    }

    /// Continues the trace described by incoming headers: the scope's
    /// propagation context is replaced and a context for the server side
    /// transaction is returned.
    pub fn continue_trace<E: Extractor + ?Sized>(
        &self,
        carrier: &E,
        name: &str,
        op: &str,
    ) -> TransactionContext {
        let config = self
            .client()
            .map(|client| client.config_arc())
            .unwrap_or_default();
        let context = PropagationContext::extract(carrier, &config);
        let transaction = TransactionContext::continue_from(name, op, &context);
        self.scope_locked(|scope| scope.set_propagation_context(context));
        transaction
    }

    /// Runs `f` with a child of the active span set as the active span,
    /// finishing it afterwards. `f` gets `None` when no span is active.
    pub fn with_child_span<F, R>(&self, op: &str, description: &str, f: F) -> R
    where
        F: FnOnce(Option<&Span>) -> R,
    {
        let Some(parent) = self.scope_locked(|scope| scope.span().cloned()) else {
            return f(None);
        };
        let child = parent.start_child(op, description);
        self.scope_locked(|scope| scope.set_span(Some(child.clone().into())));

        let _restore = RestoreSpan {
            hub: self,
            child: &child,
            parent: Some(parent),
        };
        f(Some(&child))
    }

    /// `sentry-trace` value for the active span or propagation context.
    #[must_use]
    pub fn get_traceparent(&self) -> Option<String> {
        self.client()?;
        Some(self.scope_locked(|scope| scope.traceparent()))
    }

    #[must_use]
    pub fn get_baggage(&self) -> Option<String> {
        let client = self.client()?;
        Some(self.scope_locked(|scope| scope.baggage(client.config())))
    }

    /// Headers to attach to an outgoing request, empty when tracing
    /// headers are disabled.
    #[must_use]
    pub fn get_trace_propagation_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let Some(client) = self.client() else {
            return headers;
        };
        if !client.config().propagate_traces {
            return headers;
        }
        let (traceparent, baggage) =
            self.scope_locked(|scope| (scope.traceparent(), scope.baggage(client.config())));
        headers.insert(SENTRY_TRACE_HEADER.to_string(), traceparent);
        if !baggage.is_empty() {
            headers.insert(BAGGAGE_HEADER.to_string(), baggage);
        }
        headers
    }

    /// Starts a session on the current scope, ending any running one.
    pub fn start_session(&self) {
        let Some(client) = self.client() else {
            return;
        };
        if !client.config().session_tracking {
            return;
        }
        let previous = self.scope_locked(|scope| {
            let previous = scope.take_session();
            scope.set_session(Some(Session::new()));
            previous
        });
        if let Some(mut previous) = previous {
            previous.close();
            client.add_session(&previous);
        }
    }

    pub fn end_session(&self) {
        let Some(mut session) = self.scope_locked(Scope::take_session) else {
            return;
        };
        session.close();
        if let Some(client) = self.client() {
            client.add_session(&session);
        }
    }

    /// Records a log, tagging it with the active trace.
    pub fn capture_log(&self, mut log: LogEvent) {
        let Some(client) = self.client() else {
            return;
        };
        if !client.logs_enabled() {
            return;
        }
        let (trace_id, span_id) = self.scope_locked(|scope| {
            let context = scope.trace_context();
            let span_id = scope.span().map(TransactionOrSpan::span_id);
            (context.trace_id, span_id)
        });
        if log.trace_id.is_none() {
            log.trace_id = Some(trace_id);
        }
        if log.parent_span_id.is_none() {
            log.parent_span_id = span_id;
        }
        client.capture_log(log);
    }

    /// Records a metric, tagging it with the active trace.
    pub fn capture_metric(&self, mut metric: MetricEvent) {
        let Some(client) = self.client() else {
            return;
        };
        if !client.metrics_enabled() {
            return;
        }
        let (trace_id, span_id) = self.scope_locked(|scope| {
            let context = scope.trace_context();
            let span_id = scope.span().map(TransactionOrSpan::span_id);
            (context.trace_id, span_id)
        });
        if metric.trace_id.is_none() {
            metric.trace_id = Some(trace_id);
        }
        if metric.span_id.is_none() {
            metric.span_id = span_id;
        }
        client.capture_metric(metric);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{Callbacks, Config};
    use crate::envelope::ItemType;
    use crate::transport::RecordingSender;

    fn hub_with(config: Config, callbacks: Callbacks) -> (Arc<Hub>, RecordingSender) {
        let sender = RecordingSender::new();
        let config = Config {
            background_worker_threads: 0,
            ..config
        };
        let client = Client::with_sender(config, callbacks, Arc::new(sender.clone()));
        (
            Arc::new(Hub::new(Some(Arc::new(client)), Scope::default())),
            sender,
        )
    }

    fn config() -> Config {
        Config::with_dsn("https://public@sentry.example.com/1".parse().unwrap())
    }

    #[derive(Debug, thiserror::Error)]
    #[error("divided by 0")]
    struct ZeroDivisionError;

    #[test]
    fn with_scope_changes_do_not_leak() {
        let (hub, sender) = hub_with(config(), Callbacks::default());
        hub.with_scope(
            |scope| scope.set_tag("request", "42"),
            || {
                hub.capture_message("inside", Level::Info);
            },
        );
        hub.capture_message("outside", Level::Info);

        let events: Vec<Event> = sender.envelopes().iter().filter_map(|e| e.event()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tags.get("request").map(String::as_str), Some("42"));
        assert!(!events[1].tags.contains_key("request"));
        assert_eq!(hub.depth(), 1);
    }

    #[test]
    fn with_scope_pops_on_panic() {
        let (hub, _) = hub_with(config(), Callbacks::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            hub.with_scope(|scope| scope.set_tag("doomed", "yes"), || panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(hub.depth(), 1);
        assert!(hub.configure_scope(|scope| !scope.tags().contains_key("doomed")));
    }

    #[test]
    fn nested_guards_dropped_out_of_order() {
        let (hub, _) = hub_with(config(), Callbacks::default());
        let outer = hub.push_scope();
        let inner = hub.push_scope();
        assert_eq!(hub.depth(), 3);
        drop(outer);
        assert_eq!(hub.depth(), 1);
        drop(inner);
        assert_eq!(hub.depth(), 1);
    }

    #[test]
    fn last_event_id_only_for_errors() {
        let (hub, _) = hub_with(
            Config {
                traces_sample_rate: Some(1.0),
                ..config()
            },
            Callbacks::default(),
        );
        let id = hub.capture_error(&ZeroDivisionError).unwrap();
        assert_eq!(hub.last_event_id(), Some(id));

        hub.start_transaction(TransactionContext::new("tx", "task")).finish();
        hub.capture_check_in(CheckIn::new("job", crate::protocol::CheckInStatus::Ok));
        assert_eq!(hub.last_event_id(), Some(id));
    }

    #[test]
    fn call_site_options_win() {
        let (hub, sender) = hub_with(config(), Callbacks::default());
        hub.configure_scope(|scope| scope.set_tag("foo", "scope"));
        hub.capture_error_with(
            &ZeroDivisionError,
            CaptureOptions::default().with_tag("foo", "bar"),
        );
        let event = sender.envelopes()[0].event().unwrap();
        assert_eq!(event.tags["foo"], "bar");
        assert_eq!(hub.configure_scope(|scope| scope.tags()["foo"].clone()), "scope");
    }

    #[test]
    fn capture_from_inside_a_filter_is_refused() {
        let callbacks = Callbacks {
            before_send: Some(Arc::new(|event| {
                assert!(Hub::current().capture_message("nested", Level::Error).is_none());
                Some(event)
            })),
            ..Callbacks::default()
        };
        let (hub, sender) = hub_with(config(), callbacks);
        Hub::run(Arc::clone(&hub), || {
            assert!(hub.capture_message("outer", Level::Error).is_some());
        });
        assert_eq!(sender.envelopes().len(), 1);
    }

    #[test]
    fn before_breadcrumb_can_drop() {
        let callbacks = Callbacks {
            before_breadcrumb: Some(Arc::new(|crumb: Breadcrumb| {
                (crumb.message.as_deref() != Some("secret")).then_some(crumb)
            })),
            ..Callbacks::default()
        };
        let (hub, _) = hub_with(config(), callbacks);
        hub.add_breadcrumb(Breadcrumb::new("secret"));
        hub.add_breadcrumb(Breadcrumb::new("public"));
        let crumbs = hub.configure_scope(|scope| scope.breadcrumbs().to_vec());
        assert_eq!(crumbs.len(), 1);
        assert_eq!(crumbs[0].message.as_deref(), Some("public"));
    }

    #[test]
    fn continue_trace_adopts_incoming_headers() {
        let (hub, _) = hub_with(
            Config {
                traces_sample_rate: Some(0.0),
                ..config()
            },
            Callbacks::default(),
        );
        let mut headers = HashMap::new();
        headers.insert(
            "sentry-trace".to_string(),
            "771a43a4192642f0b136d5159a501700-b0e6f15b45c36b12-1".to_string(),
        );
        headers.insert(
            "baggage".to_string(),
            "sentry-trace_id=771a43a4192642f0b136d5159a501700,sentry-sample_rand=0.25".to_string(),
        );
        let context = hub.continue_trace(&headers, "GET /users", "http.server");
        let transaction = hub.start_transaction(context);
        assert!(transaction.sampled());
        assert_eq!(
            transaction.trace_id().to_string(),
            "771a43a4192642f0b136d5159a501700"
        );
        let propagated = hub.get_trace_propagation_headers();
        assert!(propagated["sentry-trace"].starts_with("771a43a4192642f0b136d5159a501700-"));
        assert!(propagated["baggage"].contains("sentry-sample_rand=0.25"));
    }

    #[test]
    fn child_span_is_restored_and_finished() {
        let (hub, sender) = hub_with(
            Config {
                traces_sample_rate: Some(1.0),
                ..config()
            },
            Callbacks::default(),
        );
        let transaction = hub.start_transaction(TransactionContext::new("job", "task"));
        hub.configure_scope(|scope| scope.set_span(Some(transaction.clone().into())));

        let child_id = hub.with_child_span("db.query", "SELECT 1", |span| {
            let span = span.unwrap();
            assert_eq!(
                hub.configure_scope(|scope| scope.span().map(TransactionOrSpan::span_id)),
                Some(span.span_id())
            );
            span.span_id()
        });
        assert_eq!(
            hub.configure_scope(|scope| scope.span().map(TransactionOrSpan::span_id)),
            Some(transaction.span_id())
        );

        transaction.finish();
        let envelopes = sender.envelopes();
        assert_eq!(envelopes[0].item_types(), vec![&ItemType::Transaction]);
        let event = envelopes[0].event().unwrap();
        assert_eq!(event.spans.len(), 1);
        assert_eq!(event.spans[0].span_id, child_id);
    }

    #[test]
    fn sessions_count_errors() {
        let (hub, sender) = hub_with(
            Config {
                release: Some("app@1.0".to_string()),
                session_tracking: true,
                ..config()
            },
            Callbacks::default(),
        );
        hub.start_session();
        hub.capture_error(&ZeroDivisionError);
        let session = hub.configure_scope(|scope| scope.session()).unwrap();
        assert_eq!(session.errors(), 1);
        hub.end_session();
        hub.client().unwrap().close(std::time::Duration::from_secs(1));

        let sessions = sender
            .envelopes()
            .into_iter()
            .find(|e| e.item_types() == vec![&ItemType::Sessions])
            .unwrap();
        let payload = sessions.items[0].payload_json().unwrap();
        assert_eq!(payload["aggregates"][0]["errored"], 1);
    }

    #[test]
    fn thread_hubs_start_from_main() {
        let handle = std::thread::spawn(|| {
            let hub = Hub::current();
            hub.configure_scope(|scope| scope.set_tag("thread", "worker"));
            Arc::ptr_eq(&hub, &Hub::current())
        });
        assert!(handle.join().unwrap());
        assert!(!Hub::main().configure_scope(|scope| scope.tags().contains_key("thread")));
    }

    #[test]
    fn client_config_sizes_breadcrumb_buffer() {
        let (hub, _) = hub_with(
            Config {
                max_breadcrumbs: 2,
                ..config()
            },
            Callbacks::default(),
        );
        for message in ["one", "two", "three", "four", "five"] {
            hub.add_breadcrumb(Breadcrumb::new(message));
        }
        let crumbs = hub.configure_scope(|scope| scope.breadcrumbs().to_vec());
        assert_eq!(crumbs.len(), 2);
        assert_eq!(crumbs[0].message.as_deref(), Some("four"));
    }

    #[test]
    fn bind_client_resizes_breadcrumb_buffer() {
        let hub = Hub::new(None, Scope::default());
        let client = Client::with_sender(
            Config {
                max_breadcrumbs: 3,
                background_worker_threads: 0,
                ..config()
            },
            Callbacks::default(),
            Arc::new(RecordingSender::new()),
        );
        hub.bind_client(Some(Arc::new(client)));
        assert_eq!(hub.configure_scope(|scope| scope.breadcrumbs().capacity()), 3);
        for i in 0..10 {
            hub.add_breadcrumb(Breadcrumb::new(format!("crumb {i}")));
        }
        assert_eq!(hub.configure_scope(|scope| scope.breadcrumbs().len()), 3);
    }

    #[test]
    fn configure_scope_can_capture_through_the_same_hub() {
        let (hub, sender) = hub_with(config(), Callbacks::default());
        let (done, finished) = std::sync::mpsc::channel();
        let inner = Arc::clone(&hub);
        std::thread::spawn(move || {
            let id = inner.configure_scope(|scope| {
                scope.set_tag("stage", "configure");
                inner.capture_message("from configure_scope", Level::Warning)
            });
            done.send(id).unwrap();
        });
        let id = finished
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("configure_scope deadlocked");
        assert!(id.is_some());
        assert_eq!(sender.envelopes().len(), 1);
        assert!(hub.configure_scope(|scope| scope.tags().contains_key("stage")));
    }
}
