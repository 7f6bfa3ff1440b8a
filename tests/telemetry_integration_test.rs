use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pigeon::envelope::{DataCategory, ItemType, LOG_CONTENT_TYPE};
use pigeon::logs::{LogEvent, Severity};
use pigeon::metrics::MetricEvent;
use pigeon::protocol::DiscardReason;
use pigeon::transport::{RecordingSender, Request, Response, Sender, TransportError};
use pigeon::{Callbacks, Client, Config, Hub, Scope, TransactionContext};
use serde_json::{Value, json};

fn config() -> Config {
    Config {
        background_worker_threads: 0,
        send_client_reports: true,
        enable_logs: true,
        enable_metrics: true,
        traces_sample_rate: Some(1.0),
        release: Some("shop@2.1".to_string()),
        ..Config::with_dsn(
            "https://public@sentry.example.com/1"
                .parse()
                .expect("failed parsing dsn"),
        )
    }
}

fn hub_with(callbacks: Callbacks) -> (Arc<Hub>, RecordingSender) {
    let sender = RecordingSender::new();
    let client = Client::with_sender(config(), callbacks, Arc::new(sender.clone()));
    (
        Arc::new(Hub::new(Some(Arc::new(client)), Scope::default())),
        sender,
    )
}

fn batch_items(sender: &RecordingSender, ty: &ItemType) -> Vec<Value> {
    sender
        .envelopes()
        .iter()
        .flat_map(|envelope| envelope.items.clone())
        .filter(|item| item.ty() == ty)
        .flat_map(|item| {
            let payload = item.payload_json().expect("json payload");
            payload["items"].as_array().cloned().unwrap_or_default()
        })
        .collect()
}

#[test]
fn test_logs_are_sent_once_the_batch_is_full() {
    let (hub, sender) = hub_with(Callbacks::default());

    for i in 0..99 {
        hub.capture_log(LogEvent::new(Severity::Info, format!("line {i}")));
    }
    assert!(sender.envelopes().is_empty());

    hub.capture_log(LogEvent::with_template(
        Severity::Warn,
        "cart {} has {} items",
        vec![json!("c-17"), json!(3)],
    ));

    let envelopes = sender.envelopes();
    assert_eq!(envelopes.len(), 1);
    let item = &envelopes[0].items[0];
    assert_eq!(item.ty(), &ItemType::Log);
    assert_eq!(item.header.content_type.as_deref(), Some(LOG_CONTENT_TYPE));
    assert_eq!(item.header.item_count, Some(100));

    let logs = batch_items(&sender, &ItemType::Log);
    let last = &logs[99];
    assert_eq!(last["body"], "cart c-17 has 3 items");
    assert_eq!(last["level"], "warn");
    assert_eq!(last["severity_number"], 13);
    assert_eq!(
        last["attributes"]["sentry.message.template"]["value"],
        "cart {} has {} items"
    );
    assert_eq!(last["attributes"]["sentry.release"]["value"], "shop@2.1");
}

#[test]
fn test_logs_carry_the_active_trace() {
    let (hub, sender) = hub_with(Callbacks::default());
    let transaction = hub.start_transaction(TransactionContext::new("checkout", "task"));
    hub.configure_scope(|scope| scope.set_span(Some(transaction.clone().into())));

    hub.capture_log(LogEvent::new(Severity::Error, "payment declined"));
    hub.configure_scope(|scope| scope.set_span(None));
    hub.client()
        .expect("client is bound")
        .flush(Duration::from_secs(1));

    let logs = batch_items(&sender, &ItemType::Log);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["trace_id"], transaction.trace_id().to_string());
    assert_eq!(
        logs[0]["attributes"]["sentry.trace.parent_span_id"]["value"],
        transaction.span_id().to_string()
    );
}

#[test]
fn test_metrics_filter_drops_are_counted() {
    let (hub, sender) = hub_with(Callbacks {
        before_send_metric: Some(Arc::new(|metric: MetricEvent| {
            (!metric.name.starts_with("debug.")).then_some(metric)
        })),
        ..Callbacks::default()
    });

    hub.capture_metric(MetricEvent::count("orders.placed", 1.0).with_attribute("region", "eu"));
    hub.capture_metric(MetricEvent::gauge("debug.queue_depth", 7.0));
    hub.capture_metric(MetricEvent::distribution("checkout.latency", 212.5).with_unit("millisecond"));
    let client = hub.client().expect("client is bound");
    client.flush(Duration::from_secs(1));

    let metrics = batch_items(&sender, &ItemType::TraceMetric);
    let names: Vec<&str> = metrics
        .iter()
        .filter_map(|metric| metric["name"].as_str())
        .collect();
    assert_eq!(names, vec!["orders.placed", "checkout.latency"]);
    assert_eq!(metrics[0]["type"], "counter");
    assert_eq!(metrics[0]["attributes"]["region"]["value"], "eu");
    assert_eq!(metrics[1]["unit"], "millisecond");
    assert_eq!(
        client
            .transport()
            .client_reports()
            .count(DiscardReason::BeforeSend, DataCategory::TraceMetric),
        1
    );
}

#[test]
fn test_telemetry_is_ignored_when_disabled() {
    let sender = RecordingSender::new();
    let client = Client::with_sender(
        Config {
            enable_logs: false,
            enable_metrics: false,
            ..config()
        },
        Callbacks::default(),
        Arc::new(sender.clone()),
    );
    let hub = Hub::new(Some(Arc::new(client)), Scope::default());

    hub.capture_log(LogEvent::new(Severity::Info, "ignored"));
    hub.capture_metric(MetricEvent::count("ignored", 1.0));
    hub.client()
        .expect("client is bound")
        .flush(Duration::from_secs(1));

    assert!(batch_items(&sender, &ItemType::Log).is_empty());
    assert!(batch_items(&sender, &ItemType::TraceMetric).is_empty());
}

#[derive(Debug, Default)]
struct SlowCollector {
    requests: AtomicUsize,
}

impl Sender for SlowCollector {
    fn send(&self, _request: Request) -> Result<Response, TransportError> {
        thread::sleep(Duration::from_secs(1));
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(Response::ok())
    }
}

#[test]
fn test_full_log_batch_does_not_block_the_caller() {
    let collector = Arc::new(SlowCollector::default());
    let client = Client::with_sender(
        Config {
            background_worker_threads: 2,
            ..config()
        },
        Callbacks::default(),
        Arc::clone(&collector) as Arc<dyn Sender>,
    );
    let hub = Hub::new(Some(Arc::new(client)), Scope::default());

    let started = Instant::now();
    for i in 0..100 {
        hub.capture_log(LogEvent::new(Severity::Info, format!("line {i}")));
    }
    assert!(started.elapsed() < Duration::from_millis(500));

    let client = hub.client().expect("client is bound");
    assert!(client.flush(Duration::from_secs(5)));
    assert_eq!(collector.requests.load(Ordering::SeqCst), 1);
}
