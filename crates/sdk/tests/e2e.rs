//! End-to-end tests for the Recordbase client against the in-process mock
//! server.
//!
//! Every test starts its own [`MockRecordServer`] on an ephemeral port, so
//! the suite is self-contained and runs without external infrastructure.
//!
//! ## Test Categories
//!
//! - **Discovery**: bootstrap fallback, direct vs. balanced dialing
//! - **Unary calls**: CRUD, map and binary values, key capacity, auth
//! - **Streaming**: item ordering, terminal errors, cancellation
//! - **Files**: chunked upload and download
//! - **Lifecycle**: retry on injected failures, close semantics

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]

use std::time::Duration;

use recordbase_client::mock::MockRecordServer;
use recordbase_client::{
    ClientConfig, ClientError, RecordClient, RetryPolicy, StreamEvent, proto,
};
use tonic::Code;

// ============================================================================
// Helpers
// ============================================================================

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .with_max_attempts(5)
        .with_initial_backoff(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(50))
        .build()
}

async fn connect(server: &MockRecordServer) -> RecordClient {
    let config = ClientConfig::builder()
        .with_endpoint(server.endpoint())
        .with_retry_policy(fast_retry())
        .build()
        .unwrap();
    RecordClient::with_config(config).await.unwrap()
}

fn entry(tenant: &str, primary_key: &str) -> proto::RecordEntry {
    proto::RecordEntry {
        tenant: tenant.to_owned(),
        primary_key: primary_key.to_owned(),
        version: 1,
        ..Default::default()
    }
}

/// Polls until the condition holds or a short deadline expires.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn discovery_falls_back_past_unreachable_bootstrap() {
    let server = MockRecordServer::start().await.unwrap();
    server.insert_record(entry("acme", "1"));

    // First bootstrap endpoint is dead; the resolver must move on.
    let config = ClientConfig::builder()
        .with_endpoints(["127.0.0.1:1".to_owned(), server.endpoint().to_owned()])
        .with_connect_timeout(Duration::from_millis(200))
        .with_retry_policy(fast_retry())
        .build()
        .unwrap();
    let client = RecordClient::with_config(config).await.unwrap();

    let record = client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: "1".into() })
        .await
        .unwrap();
    assert_eq!(record.primary_key, "1");
}

#[tokio::test]
async fn single_member_cluster_dials_directly() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    assert_eq!(client.target(), server.endpoint());
}

#[tokio::test]
async fn multi_member_cluster_dials_balanced() {
    let server = MockRecordServer::start().await.unwrap();
    // Three members that all resolve to the same mock backend.
    server.set_members(
        (1..=3)
            .map(|node_id| proto::ServerInfo {
                node_id,
                api_addr: server.endpoint().to_owned(),
            })
            .collect(),
    );

    let client = connect(&server).await;
    assert!(client.target().starts_with("multi:///"), "target: {}", client.target());

    // Calls still flow over the balanced channel.
    server.insert_record(entry("acme", "7"));
    let record = client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: "7".into() })
        .await
        .unwrap();
    assert_eq!(record.primary_key, "7");
}

// ============================================================================
// Unary calls
// ============================================================================

#[tokio::test]
async fn record_crud_roundtrip() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    let created = client
        .create(proto::CreateRequest {
            tenant: "acme".into(),
            attributes: vec![proto::AttributeEntry {
                name: "email".into(),
                value: "a@example.com".into(),
            }],
        })
        .await
        .unwrap();

    let record = client
        .get(proto::GetRequest {
            tenant: "acme".into(),
            primary_key: created.primary_key.clone(),
        })
        .await
        .unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.attributes[0].value, "a@example.com");

    client
        .update(proto::UpdateRequest {
            tenant: "acme".into(),
            primary_key: created.primary_key.clone(),
            attributes: vec![proto::AttributeEntry {
                name: "email".into(),
                value: "b@example.com".into(),
            }],
            expected_version: 1,
        })
        .await
        .unwrap();

    let found = client
        .lookup(proto::LookupRequest {
            tenant: "acme".into(),
            attribute: "email".into(),
            value: "b@example.com".into(),
        })
        .await
        .unwrap();
    assert_eq!(found.primary_key, created.primary_key);
    assert_eq!(found.version, 2);

    client
        .delete(proto::DeleteRequest {
            tenant: "acme".into(),
            primary_key: created.primary_key.clone(),
        })
        .await
        .unwrap();

    let err = client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: created.primary_key })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rpc { code: Code::NotFound, .. }));
}

#[tokio::test]
async fn update_with_stale_version_is_rejected() {
    let server = MockRecordServer::start().await.unwrap();
    server.insert_record(proto::RecordEntry { version: 3, ..entry("acme", "1") });
    let client = connect(&server).await;

    let err = client
        .update(proto::UpdateRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            attributes: vec![],
            expected_version: 2,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rpc { code: Code::Aborted, .. }));
}

#[tokio::test]
async fn map_and_bin_values_roundtrip() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    client
        .map_put(proto::MapPutRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            map_key: "color".into(),
            value: b"blue".to_vec(),
        })
        .await
        .unwrap();

    let map_entry = client
        .map_get(proto::MapGetRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            map_key: "color".into(),
        })
        .await
        .unwrap();
    assert_eq!(map_entry.value, b"blue");
    assert_eq!(map_entry.version, 1);

    client
        .map_remove(proto::MapRemoveRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            map_key: "color".into(),
        })
        .await
        .unwrap();

    client
        .bin_put(proto::BinPutRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            bin_name: "avatar".into(),
            value: vec![1, 2, 3],
        })
        .await
        .unwrap();

    let bin = client
        .bin_get(proto::BinGetRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            bin_name: "avatar".into(),
        })
        .await
        .unwrap();
    assert_eq!(bin.value, vec![1, 2, 3]);

    client
        .bin_remove(proto::BinRemoveRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            bin_name: "avatar".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn key_capacity_reflects_granted_ranges() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    client
        .add_key_range(proto::KeyRange { tenant: "acme".into(), first_key: 1, last_key: 100 })
        .await
        .unwrap();

    let capacity = client
        .get_key_capacity(proto::TenantRequest { tenant: "acme".into() })
        .await
        .unwrap();
    assert_eq!(capacity.capacity, 100);
    assert_eq!(capacity.used, 0);
}

#[tokio::test]
async fn bearer_token_is_presented_to_the_server() {
    let server = MockRecordServer::start().await.unwrap();
    server.require_token("secret");
    server.insert_record(entry("acme", "1"));

    let config = ClientConfig::builder()
        .with_endpoint(server.endpoint())
        .with_auth_token("secret")
        .with_retry_policy(fast_retry())
        .build()
        .unwrap();
    let client = RecordClient::with_config(config).await.unwrap();

    client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: "1".into() })
        .await
        .unwrap();
}

#[tokio::test]
async fn wrong_bearer_token_is_rejected_at_discovery() {
    let server = MockRecordServer::start().await.unwrap();
    server.require_token("secret");

    let err = RecordClient::connect(server.endpoint(), "wrong").await.unwrap_err();
    assert!(matches!(err, ClientError::NoClusterFound { .. }));
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn stream_delivers_items_in_order_then_closes() {
    let server = MockRecordServer::start().await.unwrap();
    server.script_stream(
        vec![entry("acme", "a"), entry("acme", "b"), entry("acme", "c")],
        None,
    );
    let client = connect(&server).await;

    let mut stream = client
        .scan(proto::ScanRequest { tenant: "acme".into(), prefix: String::new(), limit: 0 })
        .await
        .unwrap();

    let mut keys = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Item(record) => keys.push(record.primary_key),
            StreamEvent::Error(err) => panic!("unexpected stream error: {err}"),
        }
    }
    assert_eq!(keys, vec!["a", "b", "c"]);

    wait_until(|| client.active_calls() == 0).await;
}

#[tokio::test]
async fn stream_error_is_delivered_exactly_once_as_terminal_event() {
    let server = MockRecordServer::start().await.unwrap();
    server.script_stream(
        vec![entry("acme", "a")],
        Some((Code::Internal, "storage failure".to_owned())),
    );
    let client = connect(&server).await;

    let mut stream = client
        .search(proto::SearchRequest {
            tenant: "acme".into(),
            attribute: "email".into(),
            value: "x".into(),
            limit: 0,
        })
        .await
        .unwrap();

    let first = stream.next().await.unwrap();
    assert!(matches!(first, StreamEvent::Item(ref r) if r.primary_key == "a"));

    let second = stream.next().await.unwrap();
    assert!(matches!(
        second,
        StreamEvent::Error(ClientError::Rpc { code: Code::Internal, .. })
    ));

    // Channel closes after the terminal error.
    assert!(stream.next().await.is_none());
    wait_until(|| client.active_calls() == 0).await;
}

#[tokio::test]
async fn cancelled_stream_closes_before_delivering_items() {
    let server = MockRecordServer::start().await.unwrap();
    server.script_stream_with_delay(
        vec![entry("acme", "slow")],
        None,
        Duration::from_secs(5),
    );
    let client = connect(&server).await;

    let mut stream = client
        .scan(proto::ScanRequest { tenant: "acme".into(), prefix: String::new(), limit: 0 })
        .await
        .unwrap();
    assert_eq!(client.active_calls(), 1);

    stream.cancel();
    assert!(stream.next().await.is_none(), "cancelled stream delivers nothing");
    wait_until(|| client.active_calls() == 0).await;
}

#[tokio::test]
async fn scan_derives_results_from_stored_records() {
    let server = MockRecordServer::start().await.unwrap();
    server.insert_record(entry("acme", "user:1"));
    server.insert_record(entry("acme", "user:2"));
    server.insert_record(entry("acme", "order:1"));
    let client = connect(&server).await;

    let mut stream = client
        .scan(proto::ScanRequest { tenant: "acme".into(), prefix: "user:".into(), limit: 0 })
        .await
        .unwrap();

    let mut keys = Vec::new();
    while let Some(StreamEvent::Item(record)) = stream.next().await {
        keys.push(record.primary_key);
    }
    assert_eq!(keys, vec!["user:1", "user:2"]);
}

#[tokio::test]
async fn map_range_returns_half_open_interval() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    for key in ["a", "b", "c", "d"] {
        client
            .map_put(proto::MapPutRequest {
                tenant: "acme".into(),
                primary_key: "1".into(),
                map_key: key.into(),
                value: key.as_bytes().to_vec(),
            })
            .await
            .unwrap();
    }

    let mut stream = client
        .map_range(proto::MapRangeRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            from_key: "b".into(),
            to_key: "d".into(),
        })
        .await
        .unwrap();

    let mut keys = Vec::new();
    while let Some(StreamEvent::Item(map_entry)) = stream.next().await {
        keys.push(map_entry.map_key);
    }
    assert_eq!(keys, vec!["b", "c"]);
}

// ============================================================================
// Files
// ============================================================================

#[tokio::test]
async fn file_upload_then_download_roundtrip() {
    let server = MockRecordServer::start().await.unwrap();
    server.insert_record(entry("acme", "1"));
    let client = connect(&server).await;

    let upload = client.upload_file().await.unwrap();
    upload
        .send(proto::UploadFileContent {
            tenant: "acme".into(),
            primary_key: "1".into(),
            file_name: "report.pdf".into(),
            offset: 0,
            data: b"hello ".to_vec(),
            last: false,
        })
        .await
        .unwrap();
    upload
        .send(proto::UploadFileContent {
            tenant: "acme".into(),
            primary_key: "1".into(),
            file_name: "report.pdf".into(),
            offset: 6,
            data: b"world".to_vec(),
            last: true,
        })
        .await
        .unwrap();
    upload.finish().await.unwrap();

    assert_eq!(server.file("acme", "1", "report.pdf").unwrap(), b"hello world");
    let record = server.record("acme", "1").unwrap();
    assert_eq!(record.file_names, vec!["report.pdf"]);

    let mut download = client
        .download_file(proto::DownloadFileRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            file_name: "report.pdf".into(),
        })
        .await
        .unwrap();

    let mut content = Vec::new();
    let mut saw_last = false;
    while let Some(event) = download.next().await {
        match event {
            StreamEvent::Item(chunk) => {
                content.extend_from_slice(&chunk.data);
                saw_last = chunk.last;
            },
            StreamEvent::Error(err) => panic!("unexpected download error: {err}"),
        }
    }
    assert_eq!(content, b"hello world");
    assert!(saw_last);

    client
        .delete_file(proto::DeleteFileRequest {
            tenant: "acme".into(),
            primary_key: "1".into(),
            file_name: "report.pdf".into(),
        })
        .await
        .unwrap();
    assert!(server.file("acme", "1", "report.pdf").is_none());
}

#[tokio::test]
async fn upload_of_missing_file_name_fails_on_finish() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    let upload = client.upload_file().await.unwrap();
    upload
        .send(proto::UploadFileContent { last: true, ..Default::default() })
        .await
        .unwrap();

    let err = upload.finish().await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc { code: Code::InvalidArgument, .. }));
    wait_until(|| client.active_calls() == 0).await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn retry_recovers_from_injected_unavailable() {
    let server = MockRecordServer::start().await.unwrap();
    server.insert_record(entry("acme", "1"));
    let client = connect(&server).await;

    let before = server.request_count();
    server.inject_unavailable(2);

    let record = client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: "1".into() })
        .await
        .unwrap();
    assert_eq!(record.primary_key, "1");

    // Two failed attempts plus the successful one.
    assert_eq!(server.request_count() - before, 3);
}

#[tokio::test]
async fn retry_exhaustion_reports_attempt_count() {
    let server = MockRecordServer::start().await.unwrap();
    server.insert_record(entry("acme", "1"));

    let config = ClientConfig::builder()
        .with_endpoint(server.endpoint())
        .with_retry_policy(
            RetryPolicy::builder()
                .with_max_attempts(2)
                .with_initial_backoff(Duration::from_millis(10))
                .build(),
        )
        .build()
        .unwrap();
    let client = RecordClient::with_config(config).await.unwrap();

    server.inject_unavailable(10);
    let err = client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: "1".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RetryExhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn registry_drains_after_concurrent_calls() {
    let server = MockRecordServer::start().await.unwrap();
    for i in 0..8 {
        server.insert_record(entry("acme", &i.to_string()));
    }
    let client = connect(&server).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .get(proto::GetRequest { tenant: "acme".into(), primary_key: i.to_string() })
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(client.active_calls(), 0);
}

#[tokio::test]
async fn concurrent_close_reports_exactly_one_winner() {
    let server = MockRecordServer::start().await.unwrap();
    let client = connect(&server).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.close() }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn close_cancels_open_stream_and_fails_later_calls() {
    let server = MockRecordServer::start().await.unwrap();
    server.script_stream_with_delay(
        vec![entry("acme", "slow")],
        None,
        Duration::from_secs(5),
    );
    let client = connect(&server).await;

    let mut stream = client
        .scan(proto::ScanRequest { tenant: "acme".into(), prefix: String::new(), limit: 0 })
        .await
        .unwrap();
    assert_eq!(client.active_calls(), 1);

    assert!(client.close());
    assert!(stream.next().await.is_none(), "open stream is aborted by close");
    wait_until(|| client.active_calls() == 0).await;

    let err = client
        .get(proto::GetRequest { tenant: "acme".into(), primary_key: "1".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}
