//! Health Check and Watch Integration Tests
//!
//! Runs the real gRPC frontend on a random port and drives it with the
//! generated health client, changing status through the shared registry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tonic::transport::Channel;

use health_echo_server::proto::grpc::health::v1::{
    HealthCheckRequest, HealthCheckResponse, health_check_response::ServingStatus as Wire,
    health_client::HealthClient,
};
use health_echo_server::{
    ECHO_SERVICE_NAME, GrpcServer, GrpcServerSettings, HealthRegistry, OVERALL_SERVICE,
    ServerError, ServingStatus, bind_listener, seed_registry,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(150);

struct TestServer {
    client: HealthClient<Channel>,
    registry: Arc<HealthRegistry>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ServerError>>,
}

/// Start the gRPC frontend on a random port and connect a health client.
async fn setup_test_server() -> TestServer {
    let registry = Arc::new(HealthRegistry::new());
    seed_registry(&registry);
    let shutdown = CancellationToken::new();

    let listener = bind_listener("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server = GrpcServer::new(
        Arc::clone(&registry),
        GrpcServerSettings::default(),
        shutdown.clone(),
    );
    let handle = tokio::spawn(server.serve(listener));

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = HealthClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    TestServer {
        client,
        registry,
        shutdown,
        handle,
    }
}

fn request(service: &str) -> HealthCheckRequest {
    HealthCheckRequest {
        service: service.to_string(),
    }
}

async fn open_watch(
    client: &mut HealthClient<Channel>,
    service: &str,
) -> Streaming<HealthCheckResponse> {
    client.watch(request(service)).await.unwrap().into_inner()
}

async fn next_status(stream: &mut Streaming<HealthCheckResponse>) -> Wire {
    timeout(RECV_TIMEOUT, stream.message())
        .await
        .expect("timed out waiting for watch message")
        .unwrap()
        .expect("watch stream ended unexpectedly")
        .status()
}

async fn assert_quiet(stream: &mut Streaming<HealthCheckResponse>) {
    assert!(
        timeout(QUIET_PERIOD, stream.message()).await.is_err(),
        "unexpected watch message"
    );
}

async fn wait_for_subscribers(registry: &HealthRegistry, expected: usize) {
    timeout(RECV_TIMEOUT, async {
        while registry.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count did not settle");
}

// =============================================================================
// Check
// =============================================================================

#[tokio::test]
async fn check_without_service_matches_empty_service() {
    let mut server = setup_test_server().await;

    let default = server
        .client
        .check(HealthCheckRequest::default())
        .await
        .unwrap()
        .into_inner();
    let empty = server.client.check(request("")).await.unwrap().into_inner();

    assert_eq!(default.status(), Wire::Serving);
    assert_eq!(default, empty);

    server.handle.abort();
}

#[tokio::test]
async fn check_reports_registered_services() {
    let mut server = setup_test_server().await;

    let echo = server
        .client
        .check(request(ECHO_SERVICE_NAME))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(echo.status(), Wire::Serving);

    server
        .registry
        .set_status(ECHO_SERVICE_NAME, ServingStatus::NotServing);
    let echo = server
        .client
        .check(request(ECHO_SERVICE_NAME))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(echo.status(), Wire::NotServing);

    server.handle.abort();
}

#[tokio::test]
async fn check_unknown_service_is_unknown_not_an_error() {
    let mut server = setup_test_server().await;

    let response = server
        .client
        .check(request("unknown-service"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status(), Wire::Unknown);

    server.handle.abort();
}

// =============================================================================
// Watch
// =============================================================================

#[tokio::test]
async fn watch_delivers_current_status_then_only_transitions() {
    let mut server = setup_test_server().await;
    let mut stream = open_watch(&mut server.client, "").await;

    assert_eq!(next_status(&mut stream).await, Wire::Serving);
    assert_quiet(&mut stream).await;

    server
        .registry
        .set_status(OVERALL_SERVICE, ServingStatus::NotServing);
    assert_eq!(next_status(&mut stream).await, Wire::NotServing);

    // Re-publishing the same value is not a transition.
    server
        .registry
        .set_status(OVERALL_SERVICE, ServingStatus::NotServing);
    assert_quiet(&mut stream).await;

    server
        .registry
        .set_status(OVERALL_SERVICE, ServingStatus::Serving);
    assert_eq!(next_status(&mut stream).await, Wire::Serving);

    server.handle.abort();
}

#[tokio::test]
async fn watch_unknown_service_reports_unknown_until_registered() {
    let mut server = setup_test_server().await;
    let mut stream = open_watch(&mut server.client, "late.Service").await;

    assert_eq!(next_status(&mut stream).await, Wire::Unknown);
    assert_quiet(&mut stream).await;

    server
        .registry
        .set_status("late.Service", ServingStatus::Serving);
    assert_eq!(next_status(&mut stream).await, Wire::Serving);

    server.handle.abort();
}

#[tokio::test]
async fn every_watcher_receives_exactly_one_transition() {
    const WATCHERS: usize = 5;

    let mut server = setup_test_server().await;
    let mut streams = Vec::with_capacity(WATCHERS);
    for _ in 0..WATCHERS {
        let mut stream = open_watch(&mut server.client, "").await;
        assert_eq!(next_status(&mut stream).await, Wire::Serving);
        streams.push(stream);
    }

    server
        .registry
        .set_status(OVERALL_SERVICE, ServingStatus::NotServing);

    for stream in &mut streams {
        assert_eq!(next_status(stream).await, Wire::NotServing);
    }
    for stream in &mut streams {
        assert_quiet(stream).await;
    }

    server.handle.abort();
}

#[tokio::test]
async fn disconnecting_one_watcher_leaves_others_intact() {
    let mut server = setup_test_server().await;

    let mut leaving = open_watch(&mut server.client, "").await;
    let mut staying = open_watch(&mut server.client, "").await;
    assert_eq!(next_status(&mut leaving).await, Wire::Serving);
    assert_eq!(next_status(&mut staying).await, Wire::Serving);
    wait_for_subscribers(&server.registry, 2).await;

    drop(leaving);
    wait_for_subscribers(&server.registry, 1).await;

    server
        .registry
        .set_status(OVERALL_SERVICE, ServingStatus::NotServing);
    assert_eq!(next_status(&mut staying).await, Wire::NotServing);

    server.handle.abort();
}

#[tokio::test]
async fn not_serving_notice_skips_unknown_services() {
    let mut server = setup_test_server().await;
    let mut stream = open_watch(&mut server.client, "unknown-service").await;
    assert_eq!(next_status(&mut stream).await, Wire::Unknown);

    server.registry.set_all(ServingStatus::NotServing);
    assert_quiet(&mut stream).await;

    let response = server
        .client
        .check(request("unknown-service"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status(), Wire::Unknown);
    assert!(!server.registry.snapshot().contains_key("unknown-service"));

    server.handle.abort();
}

#[tokio::test]
async fn shutdown_publishes_not_serving_then_ends_streams() {
    let mut server = setup_test_server().await;
    let mut stream = open_watch(&mut server.client, "").await;
    assert_eq!(next_status(&mut stream).await, Wire::Serving);

    server.registry.set_all(ServingStatus::NotServing);
    server.shutdown.cancel();

    assert_eq!(next_status(&mut stream).await, Wire::NotServing);

    let end = timeout(RECV_TIMEOUT, stream.message())
        .await
        .expect("watch stream did not end after shutdown");
    assert!(!matches!(end, Ok(Some(_))));

    let stopped = timeout(RECV_TIMEOUT, server.handle)
        .await
        .expect("server did not stop after shutdown");
    assert!(stopped.unwrap().is_ok());
    assert_eq!(server.registry.subscriber_count(), 0);
}
