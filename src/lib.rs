//! Error and telemetry reporting client.
//!
//! Captures errors, messages, transactions, logs and metrics, enriches them
//! with the current scope and delivers them to a collector in the background.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
// #![deny(missing_debug_implementations)]

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod envelope;
pub mod hub;
pub mod logger;
pub mod logs;
pub mod metrics;
pub mod protocol;
pub mod scope;
pub mod sessions;
pub mod telemetry;
pub mod traces;
pub mod transport;
pub mod utils;
pub mod worker;

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

pub use client::Client;
pub use config::{Callbacks, Config};
pub use hub::Hub;
pub use protocol::{Breadcrumb, CheckIn, CheckInStatus, Event, Level};
pub use scope::{CaptureOptions, Scope};
pub use traces::{OutgoingRequest, Span, Transaction, TransactionContext, TransactionOrSpan};

pub const SDK_NAME: &str = "pigeon";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Keeps the client bound by [`init`] alive and closes it when dropped.
#[derive(Debug)]
#[must_use = "the client is closed as soon as the guard is dropped"]
pub struct ClientInitGuard {
    client: Arc<Client>,
}

impl ClientInitGuard {
    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client.is_enabled()
    }
}

impl Drop for ClientInitGuard {
    fn drop(&mut self) {
        let timeout = Duration::from_millis(self.client.config().shutdown_timeout);
        self.client.close(timeout);
    }
}

/// Creates a client for `config` and binds it to the main hub and to this
/// thread's hub.
pub fn init(config: Config, callbacks: Callbacks) -> ClientInitGuard {
    if config.debug {
        if let Err(e) = logger::enable_logging_subsystem(&config) {
            debug!("CONFIG | Not installing log subscriber: {e}");
        }
    }
    let client = Arc::new(Client::new(config, callbacks));
    bind_client(Some(Arc::clone(&client)));
    debug!("CONFIG | Initialized {SDK_NAME} {SDK_VERSION}");
    ClientInitGuard { client }
}

pub fn bind_client(client: Option<Arc<Client>>) {
    Hub::main().bind_client(client.clone());
    Hub::current().bind_client(client);
}

#[must_use]
pub fn is_initialized() -> bool {
    Hub::current().is_enabled()
}

pub fn capture_event(event: Event) -> Option<Uuid> {
    Hub::current().capture_event(event)
}

pub fn capture_event_with(event: Event, options: CaptureOptions) -> Option<Uuid> {
    Hub::current().capture_event_with(event, options)
}

pub fn capture_error<E: StdError + ?Sized>(error: &E) -> Option<Uuid> {
    Hub::current().capture_error(error)
}

pub fn capture_error_with<E: StdError + ?Sized>(error: &E, options: CaptureOptions) -> Option<Uuid> {
    Hub::current().capture_error_with(error, options)
}

pub fn capture_message(message: &str, level: Level) -> Option<Uuid> {
    Hub::current().capture_message(message, level)
}

pub fn capture_check_in(check_in: CheckIn) -> Option<Uuid> {
    Hub::current().capture_check_in(check_in)
}

pub fn add_breadcrumb(breadcrumb: Breadcrumb) {
    Hub::current().add_breadcrumb(breadcrumb);
}

pub fn configure_scope<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scope) -> R,
{
    Hub::current().configure_scope(f)
}

pub fn with_scope<C, F, R>(configure: C, f: F) -> R
where
    C: FnOnce(&mut Scope),
    F: FnOnce() -> R,
{
    Hub::current().with_scope(configure, f)
}

#[must_use]
pub fn last_event_id() -> Option<Uuid> {
    Hub::current().last_event_id()
}

pub fn start_transaction(context: TransactionContext) -> Transaction {
    Hub::current().start_transaction(context)
}

pub fn start_transaction_with(
    context: TransactionContext,
    custom: &BTreeMap<String, Value>,
) -> Transaction {
    Hub::current().start_transaction_with(context, custom)
}

pub fn continue_trace<E: traces::propagation::Extractor + ?Sized>(
    carrier: &E,
    name: &str,
    op: &str,
) -> TransactionContext {
    Hub::current().continue_trace(carrier, name, op)
}

pub fn with_child_span<F, R>(op: &str, description: &str, f: F) -> R
where
    F: FnOnce(Option<&Span>) -> R,
{
    Hub::current().with_child_span(op, description, f)
}

#[must_use]
pub fn get_traceparent() -> Option<String> {
    Hub::current().get_traceparent()
}

#[must_use]
pub fn get_baggage() -> Option<String> {
    Hub::current().get_baggage()
}

#[must_use]
pub fn get_trace_propagation_headers() -> BTreeMap<String, String> {
    Hub::current().get_trace_propagation_headers()
}

pub fn start_session() {
    Hub::current().start_session();
}

pub fn end_session() {
    Hub::current().end_session();
}

/// Sends everything pending and waits up to `timeout` for delivery.
pub fn flush(timeout: Duration) -> bool {
    Hub::current()
        .client()
        .is_none_or(|client| client.flush(timeout))
}

/// Ends the session, closes the current client and unbinds it.
pub fn close() {
    let hub = Hub::current();
    hub.end_session();
    if let Some(client) = hub.client() {
        client.close(Duration::from_millis(client.config().shutdown_timeout));
    }
    bind_client(None);
}
