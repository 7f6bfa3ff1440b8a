//! Bounded pool of delivery threads.

pub mod backpressure;
pub mod periodic;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

pub use backpressure::BackpressureMonitor;
pub use periodic::PeriodicWorker;

pub const DEFAULT_MAX_QUEUE: usize = 30;
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!("WORKER | Job panicked: {}", panic_message(payload.as_ref()));
    }
}

#[derive(Debug, Default)]
struct Counters {
    /// Queued plus running jobs.
    in_flight: AtomicUsize,
}

/// Runs jobs on `threads` named threads fed by a bounded queue. With zero
/// threads every job runs inline on the caller.
pub struct BackgroundWorker {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    killed: Arc<AtomicBool>,
    counters: Arc<Counters>,
    max_queue: usize,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("threads", &self.number_of_threads())
            .field("max_queue", &self.max_queue)
            .field("killed", &self.killed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BackgroundWorker {
    #[must_use]
    pub fn new(threads: usize, max_queue: usize, shutdown_timeout: Duration) -> Self {
        let killed = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        if threads == 0 {
            debug!("WORKER | Running jobs synchronously");
            return BackgroundWorker {
                tx: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
                killed,
                counters,
                max_queue,
                shutdown_timeout,
            };
        }

        let (tx, rx) = mpsc::channel::<Job>(max_queue.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = Arc::clone(&rx);
            let killed = Arc::clone(&killed);
            let counters = Arc::clone(&counters);
            let spawned = thread::Builder::new()
                .name(format!("pigeon-worker-{i}"))
                .spawn(move || worker_loop(&rx, &killed, &counters));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("WORKER | Failed to spawn worker thread {i}: {e}"),
            }
        }

        let tx = if handles.is_empty() {
            warn!("WORKER | No worker thread could be started, running jobs synchronously");
            None
        } else {
            Some(tx)
        };

        BackgroundWorker {
            tx: Mutex::new(tx),
            threads: Mutex::new(handles),
            killed,
            counters,
            max_queue,
            shutdown_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &crate::config::Config) -> Self {
        BackgroundWorker::new(
            config.background_worker_threads,
            config.background_worker_max_queue,
            Duration::from_millis(config.shutdown_timeout),
        )
    }

    #[must_use]
    pub fn number_of_threads(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.number_of_threads() == 0
    }

    /// Queues `job`, or runs it inline in synchronous mode. Returns `false`
    /// when the job was discarded because the queue is full or the worker
    /// was shut down.
    pub fn perform<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.killed.load(Ordering::SeqCst) {
            return false;
        }
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(tx) = tx else {
            if self.is_synchronous() {
                run_job(Box::new(job));
                return true;
            }
            return false;
        };

        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                debug!(
                    "WORKER | Queue is full ({} jobs), dropping job",
                    self.max_queue
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// No free slot left in the queue.
    #[must_use]
    pub fn full(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.capacity() == 0)
    }

    /// Jobs queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until the queue drained or `timeout` elapsed. Returns whether
    /// it drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let polls = (timeout.as_millis() / SHUTDOWN_POLL_INTERVAL.as_millis()).max(1);
        for _ in 0..polls {
            if self.pending() == 0 {
                return true;
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
        self.pending() == 0
    }

    /// Stops accepting jobs, gives the queue `shutdown_timeout` to drain,
    /// then drops whatever is left.
    pub fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if tx.is_none() && self.is_synchronous() {
            self.killed.store(true, Ordering::SeqCst);
            return;
        }
        drop(tx);

        debug!("WORKER | Shutting down, {} job(s) pending", self.pending());
        self.wait_idle(self.shutdown_timeout);
        self.killed.store(true, Ordering::SeqCst);

        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in threads.drain(..) {
            if handle.is_finished() && handle.join().is_err() {
                error!("WORKER | Worker thread panicked");
            }
        }

        let dropped = self.pending();
        if dropped > 0 {
            warn!("WORKER | Shutdown dropped {dropped} pending job(s)");
        }
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<Job>>, killed: &AtomicBool, counters: &Counters) {
    loop {
        let job = {
            let mut rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.blocking_recv()
        };
        let Some(job) = job else {
            break;
        };
        if killed.load(Ordering::SeqCst) {
            debug!("WORKER | Dropping job queued before shutdown");
        } else {
            run_job(job);
        }
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
