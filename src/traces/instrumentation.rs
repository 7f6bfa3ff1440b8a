//! Hook for instrumenting outgoing HTTP requests.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::hub::Hub;
use crate::protocol::Breadcrumb;
use crate::traces::propagation::{BAGGAGE_HEADER, Injector, SENTRY_TRACE_HEADER};
use crate::traces::span::Span;

pub const HTTP_CLIENT_OP: &str = "http.client";

/// Whether trace headers may be attached to a request to `url`. A target
/// that is not a valid regex matches as a plain substring.
#[must_use]
pub fn should_propagate(config: &Config, url: &str) -> bool {
    config.propagate_traces
        && config
            .trace_propagation_targets
            .iter()
            .any(|target| match Regex::new(target) {
                Ok(re) => re.is_match(url),
                Err(_) => url.contains(target.as_str()),
            })
}

/// An outgoing request in flight, with its `http.client` span if a span
/// was active when it started.
#[derive(Debug)]
pub struct OutgoingRequest {
    hub: Arc<Hub>,
    span: Option<Span>,
    method: String,
    url: String,
}

impl OutgoingRequest {
    /// Starts the child span and writes `sentry-trace` and `baggage` into
    /// `carrier` when `url` is a propagation target.
    pub fn start<I: Injector + ?Sized>(
        hub: &Arc<Hub>,
        method: &str,
        url: &str,
        carrier: &mut I,
    ) -> Self {
        let parent = hub.scope_locked(|scope| scope.span().cloned());
        let span = parent.map(|parent| {
            let span = parent.start_child(HTTP_CLIENT_OP, &format!("{method} {url}"));
            span.set_data("url", url);
            span.set_data("http.request.method", method);
            span
        });

        if let Some(client) = hub.client() {
            if should_propagate(client.config(), url) {
                let (traceparent, baggage) = match &span {
                    Some(span) => (
                        span.to_sentry_trace(),
                        span.transaction().baggage().serialize(true),
                    ),
                    None => hub.scope_locked(|scope| {
                        (scope.traceparent(), scope.baggage(client.config()))
                    }),
                };
                carrier.set(SENTRY_TRACE_HEADER, traceparent);
                if !baggage.is_empty() {
                    carrier.set(BAGGAGE_HEADER, baggage);
                }
            } else {
                debug!("TRACES | Not propagating trace headers to {url}");
            }
        }

        OutgoingRequest {
            hub: Arc::clone(hub),
            span,
            method: method.to_string(),
            url: url.to_string(),
        }
    }

    #[must_use]
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Finishes the span and leaves an `http` breadcrumb. `status` is
    /// `None` when no response arrived.
    pub fn finish(self, status: Option<u16>) {
        if let Some(span) = &self.span {
            if let Some(code) = status {
                span.set_http_status(code);
            }
            span.finish();
        }

        let mut breadcrumb = Breadcrumb::new(format!("{} {}", self.method, self.url))
            .with_category("http")
            .with_data("method", &self.method)
            .with_data("url", &self.url);
        breadcrumb.ty = "http".to_string();
        if let Some(code) = status {
            breadcrumb = breadcrumb.with_data("status_code", &code);
        }
        self.hub.add_breadcrumb(breadcrumb);
    }
}
