use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    NotStarted,
    Running,
    SpawnFailed,
    Stopped,
}

/// A dedicated thread calling `tick` every `interval`, started on first use.
#[derive(Debug)]
pub struct PeriodicWorker {
    name: String,
    interval: Duration,
    running: Arc<AtomicBool>,
    woken: Arc<AtomicBool>,
    state: Mutex<(ThreadState, Option<JoinHandle<()>>)>,
}

impl PeriodicWorker {
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        PeriodicWorker {
            name: name.into(),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            woken: Arc::new(AtomicBool::new(false)),
            state: Mutex::new((ThreadState::NotStarted, None)),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the thread unless it already runs, was stopped, or could not
    /// be spawned before. Returns whether a thread is running.
    pub fn ensure_thread<F>(&self, tick: F) -> bool
    where
        F: Fn() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.0 {
            ThreadState::Running => return true,
            ThreadState::SpawnFailed | ThreadState::Stopped => return false,
            ThreadState::NotStarted => {}
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let woken = Arc::clone(&self.woken);
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || periodic_loop(&running, &woken, interval, tick));

        match spawned {
            Ok(handle) => {
                debug!("{} | Started periodic thread", self.name.to_uppercase());
                *state = (ThreadState::Running, Some(handle));
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!(
                    "{} | Failed to start periodic thread: {e}",
                    self.name.to_uppercase()
                );
                *state = (ThreadState::SpawnFailed, None);
                false
            }
        }
    }

    /// Runs the next tick right away instead of at the end of the interval.
    /// Returns false when no thread is running.
    #[must_use]
    pub fn wake(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = state.1.as_ref() else {
            return false;
        };
        self.woken.store(true, Ordering::SeqCst);
        handle.thread().unpark();
        true
    }

    /// Stops the thread and waits for an in-progress tick to finish.
    pub fn kill(&self) {
        let handle = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.0 = ThreadState::Stopped;
            state.1.take()
        };
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(payload) = handle.join() {
                error!(
                    "{} | Periodic thread panicked: {}",
                    self.name.to_uppercase(),
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.1.as_ref() {
            handle.thread().unpark();
        }
    }
}

fn periodic_loop<F: Fn()>(running: &AtomicBool, woken: &AtomicBool, interval: Duration, tick: F) {
    let mut deadline = Instant::now() + interval;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < deadline && !woken.swap(false, Ordering::SeqCst) {
            thread::park_timeout(deadline - now);
            continue;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&tick)) {
            error!("WORKER | Periodic task panicked: {}", panic_message(payload.as_ref()));
        }
        deadline = Instant::now() + interval;
    }
}
