use std::sync::Arc;

use httpmock::prelude::*;
use pigeon::envelope::DataCategory;
use pigeon::{Callbacks, CaptureOptions, Client, Config, Hub, Level, Scope, TransactionContext};
use serial_test::serial;

#[derive(Debug, thiserror::Error)]
#[error("divided by 0")]
struct ZeroDivisionError;

fn config(server: &MockServer) -> Config {
    Config {
        background_worker_threads: 0,
        transport_compression: false,
        ..Config::with_dsn(
            format!("http://public@{}/42", server.address())
                .parse()
                .expect("failed parsing dsn"),
        )
    }
}

#[test]
#[serial]
fn test_error_is_delivered_synchronously() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/42/envelope/")
            .header("content-type", "application/x-sentry-envelope")
            .header_exists("x-sentry-auth")
            .body_contains("ZeroDivisionError")
            .body_contains(r#""foo":"bar""#);
        then.status(200);
    });

    let guard = pigeon::init(config(&server), Callbacks::default());
    assert!(guard.is_enabled());
    let id = pigeon::capture_error_with(
        &ZeroDivisionError,
        CaptureOptions::default().with_tag("foo", "bar"),
    );

    assert!(id.is_some());
    assert_eq!(pigeon::last_event_id(), id);
    mock.assert();
    drop(guard);
    pigeon::close();
    assert!(!pigeon::is_initialized());
}

#[test]
fn test_rate_limit_response_stops_category() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/42/envelope/");
        then.status(429)
            .header("X-Sentry-Rate-Limits", "60:error:organization");
    });

    let client = Arc::new(Client::new(config(&server), Callbacks::default()));
    let hub = Hub::new(Some(Arc::clone(&client)), Scope::default());
    hub.capture_message("first", Level::Error);
    hub.capture_message("second", Level::Error);

    assert_eq!(mock.hits(), 1);
    assert!(client.transport().is_rate_limited(DataCategory::Error));
    assert!(!client.transport().is_rate_limited(DataCategory::Transaction));
}

#[test]
fn test_transaction_is_delivered_with_spans() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/42/envelope/")
            .body_contains(r#""type":"transaction""#)
            .body_contains(r#""op":"db.query""#)
            .body_contains(r#""transaction":"GET /users""#);
        then.status(200);
    });

    let client = Client::new(
        Config {
            traces_sample_rate: Some(1.0),
            ..config(&server)
        },
        Callbacks::default(),
    );
    let hub = Arc::new(Hub::new(Some(Arc::new(client)), Scope::default()));
    let transaction = hub.start_transaction(TransactionContext::new("GET /users", "http.server"));
    let span = transaction.start_child("db.query", "SELECT * FROM users");
    span.finish();
    transaction.finish();
    transaction.finish();

    mock.assert_hits(1);
}

#[test]
fn test_server_error_records_network_error() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/42/envelope/");
        then.status(500);
    });

    let client = Client::new(
        Config {
            send_client_reports: true,
            ..config(&server)
        },
        Callbacks::default(),
    );
    let hub = Hub::new(Some(Arc::new(client)), Scope::default());
    hub.capture_message("boom", Level::Error);

    assert_eq!(mock.hits(), 1);
    let client = hub.client().expect("client is bound");
    assert!(client.transport().client_state().failed());
    assert_eq!(
        client.transport().client_reports().count(
            pigeon::protocol::DiscardReason::NetworkError,
            DataCategory::Error
        ),
        1
    );
}
