use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const MAX_BACKOFF_STEPS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Online,
    Error,
}

#[derive(Debug)]
struct State {
    status: Status,
    retry_number: u32,
    last_check: Option<Instant>,
    retry_after: Option<Duration>,
}

impl Default for State {
    fn default() -> Self {
        State {
            status: Status::Online,
            retry_number: 0,
            last_check: None,
            retry_after: None,
        }
    }
}

/// Process-wide send gate: after a failure, sends are skipped until the
/// server's `retry_after` (or `min(retries, 6)^2` seconds) has elapsed.
#[derive(Debug, Default)]
pub struct ClientState {
    state: Mutex<State>,
}

impl ClientState {
    #[must_use]
    pub fn new() -> Self {
        ClientState::default()
    }

    #[must_use]
    pub fn should_try(&self) -> bool {
        self.should_try_at(Instant::now())
    }

    #[must_use]
    pub fn should_try_at(&self, now: Instant) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.status == Status::Online {
            return true;
        }
        let interval = state.retry_after.unwrap_or_else(|| {
            let steps = u64::from(state.retry_number.min(MAX_BACKOFF_STEPS));
            Duration::from_secs(steps * steps)
        });
        match state.last_check {
            Some(last_check) => now.saturating_duration_since(last_check) >= interval,
            None => true,
        }
    }

    pub fn failure(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.status = Status::Error;
        state.retry_number = state.retry_number.saturating_add(1);
        state.last_check = Some(Instant::now());
        state.retry_after = retry_after;
    }

    pub fn success(&self) {
        self.reset();
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = State::default();
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.status() == Status::Error
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    #[must_use]
    pub fn retry_number(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retry_number
    }
}
