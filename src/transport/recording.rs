use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::{Request, Response, Sender, TransportError};
use crate::envelope::Envelope;

#[derive(Debug, Default)]
struct Recorded {
    requests: Vec<Request>,
    envelopes: Vec<Envelope>,
    responses: VecDeque<Result<Response, String>>,
    default_response: Option<Response>,
}

/// Keeps every request in memory instead of sending it. Clones share the
/// same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingSender {
    #[must_use]
    pub fn new() -> Self {
        RecordingSender::default()
    }

    /// Response returned once queued responses are used up.
    pub fn respond_with(&self, response: Response) {
        self.lock().default_response = Some(response);
    }

    /// Queues a one-off response for the next request.
    pub fn push_response(&self, response: Response) {
        self.lock().responses.push_back(Ok(response));
    }

    /// Makes the next request fail at the network level.
    pub fn push_failure(&self, reason: &str) {
        self.lock().responses.push_back(Err(reason.to_string()));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.lock().envelopes.clone()
    }

    pub fn clear(&self) {
        let mut recorded = self.lock();
        recorded.requests.clear();
        recorded.envelopes.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sender for RecordingSender {
    fn send(&self, request: Request) -> Result<Response, TransportError> {
        let body = if request.content_encoding == Some("zstd") {
            zstd::decode_all(request.body.as_slice())
                .map_err(|e| TransportError::Request(e.to_string()))?
        } else {
            request.body.clone()
        };

        let mut recorded = self.lock();
        match Envelope::from_bytes(&body) {
            Ok(envelope) => recorded.envelopes.push(envelope),
            Err(e) => debug!("TRANSPORT | Recorded a request that is not an envelope: {e}"),
        }
        recorded.requests.push(request);

        match recorded.responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(TransportError::Request(reason)),
            None => Ok(recorded
                .default_response
                .clone()
                .unwrap_or_else(Response::ok)),
        }
    }
}
