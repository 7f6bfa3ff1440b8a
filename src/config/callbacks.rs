use std::fmt;
use std::sync::Arc;

use crate::logs::LogEvent;
use crate::metrics::MetricEvent;
use crate::protocol::{Breadcrumb, Event};
use crate::traces::sampling::SamplingContext;

pub type EventFilter = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;
pub type BreadcrumbFilter = Arc<dyn Fn(Breadcrumb) -> Option<Breadcrumb> + Send + Sync>;
pub type TracesSampler = Arc<dyn Fn(&SamplingContext) -> f64 + Send + Sync>;
pub type LogFilter = Arc<dyn Fn(LogEvent) -> Option<LogEvent> + Send + Sync>;
pub type MetricFilter = Arc<dyn Fn(MetricEvent) -> Option<MetricEvent> + Send + Sync>;
pub type CapturePredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// User hooks that cannot come from a config file.
///
/// Filters returning `None` drop the item; the drop is counted with reason
/// `before_send`.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub before_send: Option<EventFilter>,
    pub before_send_transaction: Option<EventFilter>,
    pub before_breadcrumb: Option<BreadcrumbFilter>,
    /// Returns a sample rate in `[0.0, 1.0]`; anything else means "not sampled".
    pub traces_sampler: Option<TracesSampler>,
    pub before_send_log: Option<LogFilter>,
    pub before_send_metric: Option<MetricFilter>,
    pub should_capture: Option<CapturePredicate>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("before_send", &self.before_send.is_some())
            .field(
                "before_send_transaction",
                &self.before_send_transaction.is_some(),
            )
            .field("before_breadcrumb", &self.before_breadcrumb.is_some())
            .field("traces_sampler", &self.traces_sampler.is_some())
            .field("before_send_log", &self.before_send_log.is_some())
            .field("before_send_metric", &self.before_send_metric.is_some())
            .field("should_capture", &self.should_capture.is_some())
            .finish()
    }
}
