//! InfluxDB store integration tests against a mock write endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use chrono::{TimeZone, Utc};
use kilnmon::storage::{
    BatchWriter, EventKind, FieldValue, FlushOutcome, InfluxStore, Precision, Record, RemoteStore,
    StoreError, WriteOptions, WriteTarget,
};
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Debug, Clone)]
struct Captured {
    query: HashMap<String, String>,
    authorization: Option<String>,
    body: String,
}

#[derive(Clone, Default)]
struct MockInflux {
    requests: Arc<Mutex<Vec<Captured>>>,
    /// Status codes to answer with, in order; 204 once exhausted.
    script: Arc<Mutex<VecDeque<StatusCode>>>,
}

async fn write_handler(
    State(mock): State<MockInflux>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    mock.requests.lock().unwrap().push(Captured {
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body,
    });
    let status = mock
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::NO_CONTENT);
    let message = if status.is_success() {
        String::new()
    } else {
        format!("{{\"code\":\"{}\"}}", status.as_u16())
    };
    (status, message)
}

/// Start the mock server and return its base URL, or `None` if binding
/// sockets is not permitted here.
async fn start_mock(script: &[StatusCode]) -> Option<(String, MockInflux)> {
    let mock = MockInflux::default();
    mock.script.lock().unwrap().extend(script.iter().copied());

    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("Skipping test: TCP bind not permitted");
            return None;
        }
        Err(e) => panic!("Failed to bind random port: {e}"),
    };
    let addr = listener.local_addr().expect("Failed to get local addr");

    let router = Router::new()
        .route("/api/v2/write", post(write_handler))
        .with_state(mock.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Some((format!("http://{addr}"), mock))
}

fn record(name: &str, secs: i64) -> Record {
    Record::new(
        "kiln",
        name,
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        vec![
            ("T".to_string(), FieldValue::Float(21.5)),
            ("count".to_string(), FieldValue::Integer(3)),
        ],
    )
}

fn store(base_url: &str, token: &str) -> InfluxStore {
    InfluxStore::new(base_url, token, Precision::Seconds, Duration::from_secs(5)).unwrap()
}

// =============================================================================
// Store Tests
// =============================================================================

#[tokio::test]
async fn test_write_request_shape() {
    let Some((base_url, mock)) = start_mock(&[]).await else {
        return;
    };
    let store = store(&base_url, "s3cret");
    let target = WriteTarget::new("home", "kiln");

    store
        .write(&target, &[record("dht", 0), record("fan", 1)])
        .await
        .expect("write should succeed");

    let requests = mock.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.query["org"], "home");
    assert_eq!(request.query["bucket"], "kiln");
    assert_eq!(request.query["precision"], "s");
    assert_eq!(request.authorization.as_deref(), Some("Token s3cret"));
    assert_eq!(
        request.body,
        "kiln,name=dht T=21.5,count=3i 1700000000\nkiln,name=fan T=21.5,count=3i 1700000001"
    );
}

#[tokio::test]
async fn test_status_mapping() {
    let Some((base_url, _mock)) = start_mock(&[
        StatusCode::UNAUTHORIZED,
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::BAD_REQUEST,
    ])
    .await
    else {
        return;
    };
    let store = store(&base_url, "");
    let target = WriteTarget::new("home", "kiln");
    let records = [record("dht", 0)];

    let err = store.write(&target, &records).await.unwrap_err();
    assert!(matches!(err, StoreError::Auth { status: 401, .. }));
    assert!(!err.is_retryable());

    let err = store.write(&target, &records).await.unwrap_err();
    assert!(matches!(err, StoreError::Server { status: 503, .. }));
    assert!(err.is_retryable());

    let err = store.write(&target, &records).await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return,
        Err(e) => panic!("Failed to bind random port: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = store(&format!("http://{addr}"), "");
    let err = store
        .write(&WriteTarget::new("home", "kiln"), &[record("dht", 0)])
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err:?}");
}

// =============================================================================
// Writer Tests
// =============================================================================

#[tokio::test]
async fn test_writer_retries_server_errors() {
    let Some((base_url, mock)) = start_mock(&[
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::TOO_MANY_REQUESTS,
    ])
    .await
    else {
        return;
    };
    let options = WriteOptions::default()
        .with_retry_interval(Duration::from_millis(10))
        .with_max_retries(3);
    let writer = BatchWriter::new(
        store(&base_url, "t"),
        WriteTarget::new("home", "kiln"),
        options,
        8,
    );

    let outcome = writer.flush(vec![record("dht", 0)]).await;
    assert!(matches!(
        outcome,
        FlushOutcome::Delivered {
            records: 1,
            attempts: 3
        }
    ));
    assert_eq!(mock.requests.lock().unwrap().len(), 3);
    assert_eq!(writer.stats().delivered(), 1);
}

#[tokio::test]
async fn test_writer_drops_on_auth_failure() {
    let Some((base_url, mock)) = start_mock(&[StatusCode::FORBIDDEN]).await else {
        return;
    };
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let writer = BatchWriter::new(
        store(&base_url, "wrong"),
        WriteTarget::new("home", "kiln"),
        WriteOptions::default(),
        8,
    )
    .with_events(events_tx);

    let outcome = writer.flush(vec![record("dht", 0), record("fan", 0)]).await;
    assert!(matches!(
        outcome,
        FlushOutcome::Dropped {
            records: 2,
            attempts: 1,
            error: StoreError::Auth { .. }
        }
    ));
    assert_eq!(mock.requests.lock().unwrap().len(), 1);
    assert_eq!(writer.stats().dropped(), 2);

    let event = events_rx.try_recv().expect("one failure event");
    assert_eq!(event.kind, EventKind::Error);
    assert!(events_rx.try_recv().is_err());
}
