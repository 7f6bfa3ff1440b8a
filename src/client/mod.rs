//! The client turns captured events into envelopes and hands them to the
//! background worker. It owns everything that talks to the collector.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Callbacks, Config, ConfigError};
use crate::envelope::{DataCategory, Envelope, EnvelopeError, EnvelopeItem};
use crate::logs::{self, LogBuffer, LogEvent};
use crate::metrics::{self, MetricBuffer, MetricEvent};
use crate::protocol::span::IdParseError;
use crate::protocol::{CheckIn, DiscardReason, Event};
use crate::scope::Scope;
use crate::sessions::{Session, SessionFlusher};
use crate::traces::propagation::error::Error as PropagationError;
use crate::transport::{Sender, Transport, TransportError};
use crate::worker::{BackgroundWorker, BackpressureMonitor};

/// Placeholder the collector replaces with the sender's address.
const AUTO_IP_ADDRESS: &str = "{{auto}}";

const PII_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
    "x-forwarded-for",
    "x-real-ip",
];

pub struct Client {
    config: Arc<Config>,
    callbacks: Callbacks,
    transport: Arc<Transport>,
    worker: Arc<BackgroundWorker>,
    backpressure: Option<BackpressureMonitor>,
    logs: Option<LogBuffer>,
    metrics: Option<MetricBuffer>,
    sessions: Option<SessionFlusher>,
    closed: AtomicBool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("dsn", &self.config.dsn)
            .field("callbacks", &self.callbacks)
            .field("transport", &self.transport)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Errors raised by this crate itself are never reported.
fn is_internal_error<E: ?Sized>() -> bool {
    let name = type_name::<E>();
    [
        type_name::<TransportError>(),
        type_name::<EnvelopeError>(),
        type_name::<ConfigError>(),
        type_name::<PropagationError>(),
        type_name::<IdParseError>(),
    ]
    .contains(&name)
}

impl Client {
    /// A client sending over HTTP to `config.dsn`.
    #[must_use]
    pub fn new(config: Config, callbacks: Callbacks) -> Self {
        let config = Arc::new(config);
        let transport = Arc::new(Transport::new(Arc::clone(&config)));
        Client::with_transport(config, callbacks, transport)
    }

    #[must_use]
    pub fn with_sender(config: Config, callbacks: Callbacks, sender: Arc<dyn Sender>) -> Self {
        let config = Arc::new(config);
        let transport = Arc::new(Transport::with_sender(Arc::clone(&config), sender));
        Client::with_transport(config, callbacks, transport)
    }

    #[must_use]
    pub fn with_transport(
        config: Arc<Config>,
        callbacks: Callbacks,
        transport: Arc<Transport>,
    ) -> Self {
        if !config.sending_allowed() {
            info!(
                "CLIENT | Sending disabled (dsn set: {}, environment: {})",
                config.valid_dsn(),
                config.environment()
            );
            return Client {
                config,
                callbacks,
                transport,
                worker: Arc::new(BackgroundWorker::new(0, 0, Duration::ZERO)),
                backpressure: None,
                logs: None,
                metrics: None,
                sessions: None,
                closed: AtomicBool::new(false),
            };
        }

        let worker = Arc::new(BackgroundWorker::from_config(&config));
        let backpressure = config
            .enable_backpressure_handling
            .then(|| BackpressureMonitor::new(Arc::clone(&transport), Arc::clone(&worker)));
        let logs = config.enable_logs.then(|| {
            logs::new_buffer(
                Arc::clone(&transport),
                Arc::clone(&worker),
                Arc::clone(&config),
                &callbacks,
            )
        });
        let metrics = config.enable_metrics.then(|| {
            metrics::new_buffer(
                Arc::clone(&transport),
                Arc::clone(&worker),
                Arc::clone(&config),
                &callbacks,
            )
        });
        let sessions = if config.session_tracking {
            SessionFlusher::new(Arc::clone(&transport), &config)
        } else {
            None
        };

        Client {
            config,
            callbacks,
            transport,
            worker,
            backpressure,
            logs,
            metrics,
            sessions,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn config_arc(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    #[must_use]
    pub fn worker(&self) -> &BackgroundWorker {
        &self.worker
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.sending_allowed() && !self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn logs_enabled(&self) -> bool {
        self.logs.is_some() && self.is_enabled()
    }

    #[must_use]
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some() && self.is_enabled()
    }

    /// Power of two the trace sample rates are divided by; 0 while healthy.
    #[must_use]
    pub fn downsample_factor(&self) -> u32 {
        self.backpressure
            .as_ref()
            .map_or(0, BackpressureMonitor::downsample_factor)
    }

    pub fn record_lost_event(&self, reason: DiscardReason, category: DataCategory, quantity: u64) {
        self.transport.record_lost_event(reason, category, quantity);
    }

    /// Builds an error event, or `None` when the error is excluded or was
    /// raised by this crate.
    pub fn event_from_error<E: StdError + ?Sized>(&self, error: &E) -> Option<Event> {
        if is_internal_error::<E>() {
            debug!("CLIENT | Not reporting internal error: {error}");
            return None;
        }
        let event = Event::from_error(error);
        if self.is_excluded(&event) {
            debug!("CLIENT | Not reporting excluded error {}", event.summary());
            return None;
        }
        Some(event)
    }

    /// Whether any exception in the chain is listed in
    /// `excluded_exceptions`, by type name or `module::Type`.
    #[must_use]
    pub fn is_excluded(&self, event: &Event) -> bool {
        let excluded = &self.config.excluded_exceptions;
        if excluded.is_empty() {
            return false;
        }
        event.exception.values.iter().any(|exception| {
            excluded.iter().any(|name| {
                *name == exception.ty
                    || exception
                        .module
                        .as_ref()
                        .is_some_and(|module| *name == format!("{module}::{}", exception.ty))
            })
        })
    }

    /// Runs the capture pipeline and queues the event. Returns the event id
    /// when it was queued.
    pub fn capture_event(&self, event: Event, scope: Option<&mut Scope>) -> Option<Uuid> {
        if !self.is_enabled() {
            return None;
        }

        if !event.is_transaction() && !self.sample_allowed() {
            debug!("CLIENT | Event {} discarded by sample_rate", event.event_id);
            self.record_lost_event(DiscardReason::SampleRate, DataCategory::Error, 1);
            return None;
        }

        let event = self.prepare_event(event, scope)?;
        let event = self.before_send(event)?;

        if let Some(should_capture) = &self.callbacks.should_capture {
            if !should_capture(&event) {
                debug!("CLIENT | Event {} skipped by should_capture", event.event_id);
                self.record_dropped(
                    DiscardReason::EventProcessor,
                    event.is_transaction(),
                    event.spans.len() as u64,
                );
                return None;
            }
        }

        let event_id = event.event_id;
        self.dispatch(event).then_some(event_id)
    }

    fn sample_allowed(&self) -> bool {
        let rate = self.config.sample_rate;
        rate >= 1.0 || rand::thread_rng().gen_range(0.0..1.0) < rate
    }

    fn prepare_event(&self, mut event: Event, scope: Option<&mut Scope>) -> Option<Event> {
        if event.release.is_none() {
            event.release.clone_from(&self.config.release);
        }
        if event.environment.is_none() {
            event.environment = Some(self.config.environment().to_string());
        }
        if event.server_name.is_none() {
            event.server_name.clone_from(&self.config.server_name);
        }
        if event.dist.is_none() {
            event.dist.clone_from(&self.config.dist);
        }

        let mut event = match scope {
            Some(scope) => {
                let (is_transaction, span_count) =
                    (event.is_transaction(), event.spans.len() as u64);
                let event_id = event.event_id;
                let Some(event) = scope.apply_to_event(event, &self.config) else {
                    debug!("CLIENT | Event {event_id} dropped by an event processor");
                    self.record_dropped(DiscardReason::EventProcessor, is_transaction, span_count);
                    return None;
                };
                event
            }
            None => event,
        };
        self.apply_pii_policy(&mut event);
        Some(event)
    }

    /// With `send_default_pii` the collector fills in the user's address.
    /// Without it, cookies and identifying request headers are removed.
    fn apply_pii_policy(&self, event: &mut Event) {
        if self.config.send_default_pii {
            event
                .user
                .entry("ip_address".to_string())
                .or_insert_with(|| Value::from(AUTO_IP_ADDRESS));
            return;
        }
        if let Some(request) = event.request.as_mut() {
            request.cookies = None;
            request
                .headers
                .retain(|name, _| !PII_HEADERS.iter().any(|pii| name.eq_ignore_ascii_case(pii)));
        }
    }

    fn before_send(&self, event: Event) -> Option<Event> {
        let is_transaction = event.is_transaction();
        let filter = if is_transaction {
            &self.callbacks.before_send_transaction
        } else {
            &self.callbacks.before_send
        };
        let Some(filter) = filter else {
            return Some(event);
        };

        let (event_id, span_count) = (event.event_id, event.spans.len() as u64);
        let event = filter(event);
        if event.is_none() {
            debug!("CLIENT | Event {event_id} dropped by before_send");
            self.record_dropped(DiscardReason::BeforeSend, is_transaction, span_count);
        }
        event
    }

    fn record_dropped(&self, reason: DiscardReason, is_transaction: bool, span_count: u64) {
        if is_transaction {
            self.record_lost_event(reason, DataCategory::Transaction, 1);
            self.record_lost_event(reason, DataCategory::Span, span_count + 1);
        } else {
            self.record_lost_event(reason, DataCategory::Error, 1);
        }
    }

    fn dispatch(&self, event: Event) -> bool {
        let (event_id, is_transaction, span_count) =
            (event.event_id, event.is_transaction(), event.spans.len() as u64);
        let transport = Arc::clone(&self.transport);
        let queued = self.worker.perform(move || {
            transport.send_event(event);
        });
        if !queued {
            warn!("CLIENT | Worker queue is full, dropping event {event_id}");
            self.record_dropped(DiscardReason::QueueOverflow, is_transaction, span_count);
        }
        queued
    }

    /// Queues a check-in, tagged with the scope's trace.
    pub fn capture_check_in(&self, mut check_in: CheckIn, scope: Option<&Scope>) -> Option<Uuid> {
        if !self.is_enabled() {
            return None;
        }
        if check_in.release.is_none() {
            check_in.release.clone_from(&self.config.release);
        }
        if check_in.environment.is_none() {
            check_in.environment = Some(self.config.environment().to_string());
        }
        if let Some(scope) = scope {
            check_in
                .contexts
                .insert("trace".to_string(), scope.trace_context().to_value());
        }

        let check_in_id = check_in.check_in_id;
        let item = match EnvelopeItem::check_in(&check_in) {
            Ok(item) => item,
            Err(e) => {
                warn!("CLIENT | Failed to serialize check-in {check_in_id}: {e}");
                return None;
            }
        };
        let mut envelope = Envelope::new(self.transport.envelope_headers());
        envelope.add_item(item);

        let transport = Arc::clone(&self.transport);
        let queued = self.worker.perform(move || {
            if let Err(e) = transport.send_envelope(envelope) {
                warn!("CLIENT | Failed to send check-in {check_in_id}: {e}");
            }
        });
        if !queued {
            warn!("CLIENT | Worker queue is full, dropping check-in {check_in_id}");
            self.record_lost_event(DiscardReason::QueueOverflow, DataCategory::Monitor, 1);
            return None;
        }
        Some(check_in_id)
    }

    pub fn capture_log(&self, log: LogEvent) {
        if let Some(logs) = &self.logs {
            logs.add_item(log);
        }
    }

    pub fn capture_metric(&self, metric: MetricEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.add_item(metric);
        }
    }

    /// Hands a finished session to the aggregator.
    pub fn add_session(&self, session: &Session) {
        if let Some(sessions) = &self.sessions {
            sessions.add_session(session);
        }
    }

    /// Sends everything buffered and waits up to `timeout` for the worker
    /// queue to drain. Returns whether it drained in time.
    pub fn flush(&self, timeout: Duration) -> bool {
        if let Some(logs) = &self.logs {
            logs.flush();
        }
        if let Some(metrics) = &self.metrics {
            metrics.flush();
        }
        if let Some(sessions) = &self.sessions {
            sessions.flush();
        }
        let drained = self.worker.wait_idle(timeout);
        if !drained {
            warn!("CLIENT | Flush timed out with {} job(s) pending", self.worker.pending());
        }
        self.transport.flush_client_report();
        drained
    }

    /// Flushes and stops every background thread. Later captures are
    /// ignored.
    pub fn close(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("CLIENT | Closing");
        if let Some(backpressure) = &self.backpressure {
            backpressure.kill();
        }
        if let Some(logs) = &self.logs {
            logs.kill();
        }
        if let Some(metrics) = &self.metrics {
            metrics.kill();
        }
        if let Some(sessions) = &self.sessions {
            sessions.kill();
        }
        if !self.worker.wait_idle(timeout) {
            warn!(
                "CLIENT | Closing with {} job(s) still pending",
                self.worker.pending()
            );
        }
        self.worker.shutdown();
        self.transport.flush_client_report();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::ItemType;
    use crate::protocol::{CheckInStatus, Level};
    use crate::transport::RecordingSender;

    #[derive(Debug, thiserror::Error)]
    #[error("divided by 0")]
    struct ZeroDivisionError;

    fn config() -> Config {
        Config {
            background_worker_threads: 0,
            ..Config::with_dsn("https://public@sentry.example.com/1".parse().unwrap())
        }
    }

    fn client(config: Config, callbacks: Callbacks) -> (Client, RecordingSender) {
        let sender = RecordingSender::new();
        let client = Client::with_sender(config, callbacks, Arc::new(sender.clone()));
        (client, sender)
    }

    #[test]
    fn fills_release_and_environment() {
        let (client, sender) = client(
            Config {
                release: Some("1.2.3".to_string()),
                server_name: Some("web-1".to_string()),
                ..config()
            },
            Callbacks::default(),
        );
        let mut scope = Scope::default();
        client
            .capture_event(Event::from_message("hi", Level::Info), Some(&mut scope))
            .unwrap();
        let event = sender.envelopes()[0].event().unwrap();
        assert_eq!(event.release.as_deref(), Some("1.2.3"));
        assert_eq!(event.environment.as_deref(), Some("production"));
        assert_eq!(event.server_name.as_deref(), Some("web-1"));
        assert!(event.contexts.contains_key("trace"));
    }

    #[test]
    fn disabled_without_dsn() {
        let (client, sender) = client(Config::default(), Callbacks::default());
        assert!(!client.is_enabled());
        assert!(client.capture_event(Event::new(), None).is_none());
        assert!(sender.requests().is_empty());
    }

    #[test]
    fn disabled_outside_enabled_environments() {
        let (client, _) = client(
            Config {
                environment: Some("development".to_string()),
                enabled_environments: vec!["production".to_string()],
                ..config()
            },
            Callbacks::default(),
        );
        assert!(client.capture_event(Event::new(), None).is_none());
    }

    #[test]
    fn zero_sample_rate_drops_errors() {
        let (client, sender) = client(
            Config {
                sample_rate: 0.0,
                send_client_reports: true,
                ..config()
            },
            Callbacks::default(),
        );
        assert!(client.capture_event(Event::new(), None).is_none());
        assert!(sender.envelopes().is_empty());
        assert_eq!(
            client
                .transport()
                .client_reports()
                .count(DiscardReason::SampleRate, DataCategory::Error),
            1
        );
    }

    #[test]
    fn before_send_drop_is_recorded() {
        let callbacks = Callbacks {
            before_send: Some(Arc::new(|_| None)),
            ..Callbacks::default()
        };
        let (client, sender) = client(
            Config {
                send_client_reports: true,
                ..config()
            },
            callbacks,
        );
        assert!(client.capture_event(Event::new(), None).is_none());
        assert!(sender.envelopes().is_empty());
        assert_eq!(
            client
                .transport()
                .client_reports()
                .count(DiscardReason::BeforeSend, DataCategory::Error),
            1
        );
    }

    #[test]
    fn event_processor_drop_is_recorded() {
        let (client, _) = client(
            Config {
                send_client_reports: true,
                ..config()
            },
            Callbacks::default(),
        );
        let mut scope = Scope::default();
        scope.add_event_processor(|_| None);
        assert!(client.capture_event(Event::new(), Some(&mut scope)).is_none());
        assert_eq!(
            client
                .transport()
                .client_reports()
                .count(DiscardReason::EventProcessor, DataCategory::Error),
            1
        );
    }

    #[test]
    fn should_capture_can_veto() {
        let callbacks = Callbacks {
            should_capture: Some(Arc::new(|event: &Event| event.level != Some(Level::Debug))),
            ..Callbacks::default()
        };
        let (client, sender) = client(config(), callbacks);
        assert!(
            client
                .capture_event(Event::from_message("noise", Level::Debug), None)
                .is_none()
        );
        assert!(
            client
                .capture_event(Event::from_message("signal", Level::Error), None)
                .is_some()
        );
        assert_eq!(sender.envelopes().len(), 1);
    }

    #[test]
    fn should_capture_veto_is_recorded() {
        let callbacks = Callbacks {
            should_capture: Some(Arc::new(|_: &Event| false)),
            ..Callbacks::default()
        };
        let (client, sender) = client(
            Config {
                send_client_reports: true,
                ..config()
            },
            callbacks,
        );
        assert!(client.capture_event(Event::new(), None).is_none());
        assert!(sender.envelopes().is_empty());
        assert_eq!(
            client
                .transport()
                .client_reports()
                .count(DiscardReason::EventProcessor, DataCategory::Error),
            1
        );
    }

    fn event_with_request() -> Event {
        let mut event = Event::from_message("checkout failed", Level::Error);
        event.request = Some(crate::protocol::Request {
            url: Some("https://shop.example.com/cart".to_string()),
            cookies: Some("session=abc".to_string()),
            headers: [
                ("Authorization", "Bearer t0ken"),
                ("X-Forwarded-For", "203.0.113.9"),
                ("Accept", "text/html"),
            ]
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
            ..Default::default()
        });
        event
    }

    #[test]
    fn request_pii_is_removed_by_default() {
        let (client, sender) = client(config(), Callbacks::default());
        client.capture_event(event_with_request(), None).unwrap();
        let event = sender.envelopes()[0].event().unwrap();
        let request = event.request.unwrap();
        assert!(request.cookies.is_none());
        assert_eq!(request.headers.keys().collect::<Vec<_>>(), vec!["Accept"]);
        assert!(!event.user.contains_key("ip_address"));
    }

    #[test]
    fn send_default_pii_keeps_request_and_infers_ip() {
        let (client, sender) = client(
            Config {
                send_default_pii: true,
                ..config()
            },
            Callbacks::default(),
        );
        let mut scope = Scope::default();
        client
            .capture_event(event_with_request(), Some(&mut scope))
            .unwrap();
        let event = sender.envelopes()[0].event().unwrap();
        let request = event.request.unwrap();
        assert_eq!(request.cookies.as_deref(), Some("session=abc"));
        assert_eq!(request.headers.len(), 3);
        assert_eq!(event.user["ip_address"], "{{auto}}");
    }

    #[test]
    fn excluded_and_internal_errors_are_not_built() {
        let (client, _) = client(
            Config {
                excluded_exceptions: vec!["ZeroDivisionError".to_string()],
                ..config()
            },
            Callbacks::default(),
        );
        assert!(client.event_from_error(&ZeroDivisionError).is_none());
        assert!(client.event_from_error(&TransportError::MissingDsn).is_none());

        let (client, _) = self::client(config(), Callbacks::default());
        let event = client.event_from_error(&ZeroDivisionError).unwrap();
        assert_eq!(event.exception.values[0].ty, "ZeroDivisionError");
    }

    #[test]
    fn check_in_is_sent_with_trace_context() {
        let (client, sender) = client(
            Config {
                release: Some("1.0".to_string()),
                ..config()
            },
            Callbacks::default(),
        );
        let scope = Scope::default();
        let id = client
            .capture_check_in(CheckIn::new("nightly", CheckInStatus::Ok), Some(&scope))
            .unwrap();
        let envelope = &sender.envelopes()[0];
        assert_eq!(envelope.item_types(), vec![&ItemType::CheckIn]);
        let payload = envelope.items[0].payload_json().unwrap();
        assert_eq!(payload["check_in_id"], id.simple().to_string());
        assert_eq!(payload["release"], "1.0");
        assert_eq!(
            payload["contexts"]["trace"]["trace_id"],
            scope.propagation_context().trace_id.to_string()
        );
    }

    #[test]
    fn closed_client_ignores_captures() {
        let (client, sender) = client(config(), Callbacks::default());
        client.close(Duration::from_millis(100));
        assert!(client.capture_event(Event::new(), None).is_none());
        assert!(sender.envelopes().is_empty());
    }
}
