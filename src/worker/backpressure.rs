use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tracing::debug;

use super::{BackgroundWorker, PeriodicWorker};
use crate::transport::Transport;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_DOWNSAMPLE_FACTOR: u32 = 10;

#[derive(Debug)]
struct Health {
    healthy: AtomicBool,
    downsample_factor: AtomicU32,
}

/// Checks transport and queue health every interval; each unhealthy check
/// halves the effective sample rates once more, up to
/// `2^MAX_DOWNSAMPLE_FACTOR`.
#[derive(Debug)]
pub struct BackpressureMonitor {
    transport: Arc<Transport>,
    worker: Arc<BackgroundWorker>,
    health: Arc<Health>,
    periodic: PeriodicWorker,
}

impl BackpressureMonitor {
    #[must_use]
    pub fn new(transport: Arc<Transport>, worker: Arc<BackgroundWorker>) -> Self {
        BackpressureMonitor::with_interval(transport, worker, DEFAULT_INTERVAL)
    }

    #[must_use]
    pub fn with_interval(
        transport: Arc<Transport>,
        worker: Arc<BackgroundWorker>,
        interval: Duration,
    ) -> Self {
        BackpressureMonitor {
            transport,
            worker,
            health: Arc::new(Health {
                healthy: AtomicBool::new(true),
                downsample_factor: AtomicU32::new(0),
            }),
            periodic: PeriodicWorker::new("pigeon-backpressure", interval),
        }
    }

    #[must_use]
    pub fn healthy(&self) -> bool {
        self.ensure_thread();
        self.health.healthy.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn downsample_factor(&self) -> u32 {
        self.ensure_thread();
        self.health.downsample_factor.load(Ordering::SeqCst)
    }

    /// Runs one health check immediately.
    pub fn run(&self) {
        check(&self.transport, &self.worker, &self.health);
    }

    pub fn kill(&self) {
        self.periodic.kill();
    }

    fn ensure_thread(&self) {
        let transport = Arc::clone(&self.transport);
        let worker = Arc::clone(&self.worker);
        let health = Arc::clone(&self.health);
        self.periodic
            .ensure_thread(move || check(&transport, &worker, &health));
    }
}

fn check(transport: &Transport, worker: &BackgroundWorker, health: &Health) {
    let healthy = !(transport.any_rate_limited() || worker.full());
    health.healthy.store(healthy, Ordering::SeqCst);

    if healthy {
        health.downsample_factor.store(0, Ordering::SeqCst);
        return;
    }

    let previous = health.downsample_factor.load(Ordering::SeqCst);
    if previous < MAX_DOWNSAMPLE_FACTOR {
        health
            .downsample_factor
            .store(previous + 1, Ordering::SeqCst);
        debug!(
            "BACKPRESSURE | Health check failed, downsample factor is now {}",
            previous + 1
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::RecordingSender;

    fn monitor() -> BackpressureMonitor {
        let config = Arc::new(Config::with_dsn(
            "https://public@sentry.example.com/1".parse().unwrap(),
        ));
        let transport = Arc::new(Transport::with_sender(
            config,
            Arc::new(RecordingSender::new()),
        ));
        let worker = Arc::new(BackgroundWorker::new(0, 10, Duration::from_millis(100)));
        BackpressureMonitor::with_interval(transport, worker, Duration::from_secs(3600))
    }

    #[test]
    fn healthy_by_default() {
        let monitor = monitor();
        assert!(monitor.healthy());
        assert_eq!(monitor.downsample_factor(), 0);
        monitor.kill();
    }

    #[test]
    fn factor_grows_to_cap_and_resets() {
        let monitor = monitor();
        monitor
            .transport
            .rate_limiter()
            .update_from_response(429, None, Some("600"));

        for expected in 1..=MAX_DOWNSAMPLE_FACTOR {
            monitor.run();
            assert_eq!(monitor.downsample_factor(), expected);
            assert!(!monitor.healthy());
        }
        monitor.run();
        assert_eq!(monitor.downsample_factor(), MAX_DOWNSAMPLE_FACTOR);

        monitor.transport.rate_limiter().clear();
        monitor.run();
        assert!(monitor.healthy());
        assert_eq!(monitor.downsample_factor(), 0);
        monitor.kill();
    }
}
