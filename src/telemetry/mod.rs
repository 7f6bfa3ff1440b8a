//! Batching of high-volume telemetry (logs, metrics) into one envelope item
//! per flush.

pub mod attribute;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::envelope::{DataCategory, Envelope, EnvelopeItem, ItemType};
use crate::protocol::DiscardReason;
use crate::transport::Transport;
use crate::worker::{BackgroundWorker, PeriodicWorker};

pub use attribute::{Attribute, Attributes};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Something a [`TelemetryEventBuffer`] can batch.
pub trait TelemetryItem: Send + 'static {
    fn item_type() -> ItemType;

    fn data_category() -> DataCategory;

    /// Wire form, rendered at flush time.
    fn to_payload(&self, config: &Config) -> Value;
}

pub type ItemFilter<T> = Arc<dyn Fn(T) -> Option<T> + Send + Sync>;

struct Shared<T> {
    name: &'static str,
    pending: Mutex<Vec<T>>,
    transport: Arc<Transport>,
    config: Arc<Config>,
    filter: Option<ItemFilter<T>>,
    flush_scheduled: AtomicBool,
}

/// Collects items and sends them every interval, or as soon as `max_items`
/// are pending. Past `max_items_before_drop` new items are dropped.
///
/// A full batch is sent from the background worker when one is attached,
/// otherwise from the buffer's own flush thread; never from the thread
/// adding the item unless the worker runs jobs inline.
pub struct TelemetryEventBuffer<T: TelemetryItem> {
    shared: Arc<Shared<T>>,
    max_items: usize,
    max_items_before_drop: usize,
    periodic: PeriodicWorker,
    worker: Option<Arc<BackgroundWorker>>,
}

impl<T: TelemetryItem> fmt::Debug for TelemetryEventBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryEventBuffer")
            .field("name", &self.shared.name)
            .field("size", &self.size())
            .field("max_items", &self.max_items)
            .field("max_items_before_drop", &self.max_items_before_drop)
            .finish_non_exhaustive()
    }
}

impl<T: TelemetryItem> TelemetryEventBuffer<T> {
    #[must_use]
    pub fn new(
        name: &'static str,
        transport: Arc<Transport>,
        config: Arc<Config>,
        filter: Option<ItemFilter<T>>,
        max_items: usize,
        max_items_before_drop: usize,
    ) -> Self {
        TelemetryEventBuffer::with_interval(
            name,
            transport,
            config,
            filter,
            max_items,
            max_items_before_drop,
            DEFAULT_FLUSH_INTERVAL,
        )
    }

    #[must_use]
    pub fn with_interval(
        name: &'static str,
        transport: Arc<Transport>,
        config: Arc<Config>,
        filter: Option<ItemFilter<T>>,
        max_items: usize,
        max_items_before_drop: usize,
        interval: Duration,
    ) -> Self {
        TelemetryEventBuffer {
            shared: Arc::new(Shared {
                name,
                pending: Mutex::new(Vec::new()),
                transport,
                config,
                filter,
                flush_scheduled: AtomicBool::new(false),
            }),
            max_items: max_items.max(1),
            max_items_before_drop: max_items_before_drop.max(max_items),
            periodic: PeriodicWorker::new(format!("pigeon-{}", name.to_lowercase()), interval),
            worker: None,
        }
    }

    /// Sends full batches through `worker`.
    #[must_use]
    pub fn with_worker(mut self, worker: Arc<BackgroundWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn add_item(&self, item: T) {
        self.ensure_thread();
        let size = {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if pending.len() >= self.max_items_before_drop {
                drop(pending);
                debug!(
                    "{} | Buffer is full ({} items), dropping item",
                    self.shared.name, self.max_items_before_drop
                );
                self.shared.transport.record_lost_event(
                    DiscardReason::BufferOverflow,
                    T::data_category(),
                    1,
                );
                return;
            }
            pending.push(item);
            pending.len()
        };

        if size >= self.max_items {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        if self.shared.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = &self.worker {
            let shared = Arc::clone(&self.shared);
            if worker.perform(move || flush(&shared)) {
                return;
            }
            debug!("{} | Worker refused flush, waking flush thread", self.shared.name);
        }
        if !self.periodic.wake() {
            flush(&self.shared);
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn flush(&self) {
        flush(&self.shared);
    }

    /// Stops the flush thread and sends what is left.
    pub fn kill(&self) {
        self.periodic.kill();
        self.flush();
    }

    fn ensure_thread(&self) {
        let shared = Arc::clone(&self.shared);
        self.periodic.ensure_thread(move || flush(&shared));
    }
}

fn flush<T: TelemetryItem>(shared: &Shared<T>) {
    shared.flush_scheduled.store(false, Ordering::SeqCst);
    let items = {
        let mut pending = shared.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
    };
    if items.is_empty() {
        return;
    }

    let total = items.len();
    let payloads: Vec<Value> = items
        .into_iter()
        .filter_map(|item| match &shared.filter {
            Some(filter) => filter(item),
            None => Some(item),
        })
        .map(|item| item.to_payload(&shared.config))
        .collect();

    let vetoed = total - payloads.len();
    if vetoed > 0 {
        shared.transport.record_lost_event(
            DiscardReason::BeforeSend,
            T::data_category(),
            vetoed as u64,
        );
    }
    if payloads.is_empty() {
        return;
    }

    let item = match EnvelopeItem::batch(T::item_type(), &payloads) {
        Ok(item) => item,
        Err(e) => {
            warn!("{} | Failed to serialize batch: {e}", shared.name);
            return;
        }
    };
    let mut envelope = Envelope::new(shared.transport.envelope_headers());
    envelope.add_item(item);

    debug!("{} | Sending {} item(s)", shared.name, payloads.len());
    if let Err(e) = shared.transport.send_envelope(envelope) {
        warn!("{} | Failed to send batch: {e}", shared.name);
    }
}
