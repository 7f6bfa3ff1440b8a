//! Release health: sessions are counted per start minute and sent as
//! aggregates.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::envelope::{Envelope, EnvelopeItem};
use crate::protocol::{SessionAggregateItem, SessionAggregates, SessionAttributes, SessionStatus};
use crate::transport::Transport;
use crate::worker::PeriodicWorker;

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// One unit of work (a request, a job) tracked for release health.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    sid: Uuid,
    distinct_id: Option<String>,
    started: DateTime<Utc>,
    status: SessionStatus,
    errors: u64,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Session {
            sid: Uuid::new_v4(),
            distinct_id: None,
            started: Utc::now(),
            status: SessionStatus::Ok,
            errors: 0,
        }
    }

    #[must_use]
    pub fn sid(&self) -> Uuid {
        self.sid
    }

    #[must_use]
    pub fn distinct_id(&self) -> Option<&str> {
        self.distinct_id.as_deref()
    }

    pub fn set_distinct_id(&mut self, distinct_id: impl Into<String>) {
        self.distinct_id = Some(distinct_id.into());
    }

    #[must_use]
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn update_from_error(&mut self) {
        self.status = SessionStatus::Errored;
        self.errors += 1;
    }

    pub fn mark_crashed(&mut self) {
        self.status = SessionStatus::Crashed;
    }

    /// Ends the session; a session that saw no error counts as exited.
    pub fn close(&mut self) {
        if self.status == SessionStatus::Ok {
            self.status = SessionStatus::Exited;
        }
    }

    /// Start time truncated to the minute, the aggregation bucket.
    #[must_use]
    pub fn aggregation_key(&self) -> String {
        self.started.format("%Y-%m-%dT%H:%M:00Z").to_string()
    }
}

type Pending = Arc<Mutex<BTreeMap<String, SessionAggregateItem>>>;

/// Aggregates closed sessions and sends them every minute.
#[derive(Debug)]
pub struct SessionFlusher {
    transport: Arc<Transport>,
    attrs: SessionAttributes,
    pending: Pending,
    periodic: PeriodicWorker,
}

impl SessionFlusher {
    /// `None` without a release: aggregates are keyed by release.
    #[must_use]
    pub fn new(transport: Arc<Transport>, config: &Config) -> Option<Self> {
        let Some(release) = config.release.clone() else {
            debug!("SESSIONS | No release configured, session tracking disabled");
            return None;
        };
        Some(SessionFlusher {
            transport,
            attrs: SessionAttributes {
                release,
                environment: Some(config.environment().to_string()),
            },
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            periodic: PeriodicWorker::new("pigeon-sessions", FLUSH_INTERVAL),
        })
    }

    pub fn add_session(&self, session: &Session) {
        if session.status() == SessionStatus::Ok {
            debug!("SESSIONS | Ignoring session {} that is still open", session.sid());
            return;
        }
        self.ensure_thread();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let key = session.aggregation_key();
        let bucket = pending
            .entry(key.clone())
            .or_insert_with(|| SessionAggregateItem {
                started: key,
                ..SessionAggregateItem::default()
            });
        match session.status() {
            SessionStatus::Exited => bucket.exited += 1,
            SessionStatus::Errored => bucket.errored += 1,
            SessionStatus::Crashed => bucket.crashed += 1,
            SessionStatus::Abnormal | SessionStatus::Ok => bucket.abnormal += 1,
        }
    }

    #[must_use]
    pub fn pending_buckets(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn flush(&self) {
        flush(&self.transport, &self.attrs, &self.pending);
    }

    /// Stops the flush thread and sends what is left.
    pub fn kill(&self) {
        self.periodic.kill();
        self.flush();
    }

    fn ensure_thread(&self) {
        let transport = Arc::clone(&self.transport);
        let attrs = self.attrs.clone();
        let pending = Arc::clone(&self.pending);
        self.periodic
            .ensure_thread(move || flush(&transport, &attrs, &pending));
    }
}

fn flush(transport: &Transport, attrs: &SessionAttributes, pending: &Pending) {
    let aggregates: Vec<SessionAggregateItem> = {
        let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending).into_values().collect()
    };
    if aggregates.is_empty() {
        return;
    }

    let payload = SessionAggregates {
        attrs: attrs.clone(),
        aggregates,
    };
    let item = match EnvelopeItem::sessions(&payload) {
        Ok(item) => item,
        Err(e) => {
            warn!("SESSIONS | Failed to serialize session aggregates: {e}");
            return;
        }
    };
    let mut envelope = Envelope::new(transport.envelope_headers());
    envelope.add_item(item);
    if let Err(e) = transport.send_envelope(envelope) {
        warn!("SESSIONS | Failed to send session aggregates: {e}");
    }
}
