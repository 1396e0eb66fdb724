//! Unary call path: classification, deadlines, stats and shutdown.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use stratus_common::protocol::{Issue, OperationEnvelope, StatusCode};
use stratus_driver::{
    dial, AccessTokenCredentials, ConnState, Context, DiscoveryInterval, DriverConfig,
    DriverError, RawOperation,
};

use support::{Action, MockServer};

fn single_endpoint_config(database: &str) -> DriverConfig {
    DriverConfig::new(database).with_discovery_interval(DiscoveryInterval::Disabled)
}

#[tokio::test]
async fn bootstrap_without_discovery_uses_the_seed_endpoint() {
    let server = MockServer::start_ok().await;
    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    driver.read_conn_stats(&mut |endpoint, stats| {
        seen.push((endpoint.to_string(), stats.state));
    });
    assert_eq!(seen, vec![(server.addr(), ConnState::Online)]);
    assert_eq!(server.accepted(), 1);

    driver.close().await.unwrap();
    // Close tears down exactly the one transport that was dialed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(server.disconnected(), 1);
}

#[tokio::test]
async fn dial_fails_fast_when_the_seed_is_down() {
    // Bind and immediately drop a listener to get a port that refuses.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let ctx = Context::background();
    let err = dial(&ctx, &addr, single_endpoint_config("/db"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn dial_rejects_malformed_seed_addresses() {
    let ctx = Context::background();
    let err = dial(&ctx, "no-port-here", single_endpoint_config("/db"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidAddress(_)));
}

#[tokio::test]
async fn call_decodes_the_result_into_the_container() {
    let server = MockServer::start(|request| {
        assert_eq!(request.method, "Stratus.Table/Execute");
        Action::Reply(OperationEnvelope::success(Some(json!({"rows": 3}))))
    })
    .await;

    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();

    let mut op = RawOperation::new("Stratus.Table/Execute", json!({"query": "SELECT 1"}));
    driver.call(&ctx, &mut op).await.unwrap();
    assert_eq!(op.into_result(), Some(json!({"rows": 3})));

    driver.close().await.unwrap();
}

#[tokio::test]
async fn metadata_carries_database_and_auth_ticket() {
    let server = MockServer::start_ok().await;
    let config = single_endpoint_config("/prod/orders")
        .with_credentials(Arc::new(AccessTokenCredentials::new("t0ken")));

    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), config).await.unwrap();
    let mut op = RawOperation::new("m", json!({}));
    driver.call(&ctx, &mut op).await.unwrap();

    let calls = server.calls();
    let call = calls.last().unwrap();
    assert_eq!(
        call.metadata.get("x-stratus-database").map(String::as_str),
        Some("/prod/orders")
    );
    assert_eq!(
        call.metadata.get("x-stratus-auth-ticket").map(String::as_str),
        Some("t0ken")
    );
    driver.close().await.unwrap();
}

#[tokio::test]
async fn non_success_status_maps_to_op_error_and_spares_err_rate() {
    let server = MockServer::start(|_| {
        Action::Reply(OperationEnvelope::failure(
            StatusCode::Overloaded,
            vec![Issue::new(9, "too busy")],
        ))
    })
    .await;

    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();

    let mut op = RawOperation::new("m", json!({}));
    let err = driver.call(&ctx, &mut op).await.unwrap_err();
    assert!(err.is_op_error(StatusCode::Overloaded), "got {err:?}");

    // A permanent API error says nothing about endpoint health: the error
    // rate stays untouched and the call counts as answered.
    let mut err_rate = None;
    let mut failed = None;
    driver.read_conn_stats(&mut |_, stats| {
        err_rate = Some(stats.err_per_minute);
        failed = Some(stats.op_failed);
    });
    assert_eq!(err_rate, Some(0.0));
    assert_eq!(failed, Some(0));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn unready_envelope_maps_to_operation_not_ready() {
    let server = MockServer::start(|_| {
        Action::Reply(OperationEnvelope {
            ready: false,
            status: StatusCode::Success,
            issues: vec![],
            result: None,
        })
    })
    .await;

    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();
    let mut op = RawOperation::new("m", json!({}));
    let err = driver.call(&ctx, &mut op).await.unwrap_err();
    assert!(matches!(err, DriverError::OperationNotReady));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn request_timeout_dominates_a_hanging_server() {
    let server = MockServer::start(|_| Action::Hang).await;
    let config =
        single_endpoint_config("/db").with_request_timeout(Duration::from_millis(50));

    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), config).await.unwrap();

    let started = Instant::now();
    let mut op = RawOperation::new("m", json!({}));
    let err = driver.call(&ctx, &mut op).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, DriverError::DeadlineExceeded), "got {err:?}");
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");

    // Timeouts are endpoint-health signals.
    let mut failed = None;
    let mut err_rate = None;
    driver.read_conn_stats(&mut |_, stats| {
        failed = Some(stats.op_failed);
        err_rate = Some(stats.err_per_minute);
    });
    assert_eq!(failed, Some(1));
    assert_eq!(err_rate, Some(1.0));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn cancelling_the_context_cancels_the_call() {
    let server = MockServer::start(|_| Action::Hang).await;
    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();
    let driver = Arc::new(driver);

    let call_ctx = ctx.with_timeout(Duration::from_secs(60));
    let canceller = call_ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let mut op = RawOperation::new("m", json!({}));
    let err = driver.call(&call_ctx, &mut op).await.unwrap_err();
    assert!(matches!(err, DriverError::Canceled), "got {err:?}");

    let mut failed = None;
    let mut err_rate = None;
    driver.read_conn_stats(&mut |_, stats| {
        failed = Some(stats.op_failed);
        err_rate = Some(stats.err_per_minute);
    });
    assert_eq!(failed, Some(1));
    assert_eq!(err_rate, Some(1.0));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn closed_driver_rejects_calls_immediately() {
    let server = MockServer::start_ok().await;
    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();
    driver.close().await.unwrap();
    driver.close().await.unwrap(); // idempotent

    let started = Instant::now();
    let mut op = RawOperation::new("m", json!({}));
    let err = driver.call(&ctx, &mut op).await.unwrap_err();
    assert!(matches!(err, DriverError::Closed));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn operation_hints_derive_from_the_context_deadline() {
    let server = MockServer::start_ok().await;
    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();

    let call_ctx = ctx.with_timeout(Duration::from_secs(10));
    let mut op = RawOperation::new("m", json!({}));
    driver.call(&call_ctx, &mut op).await.unwrap();

    let calls = server.calls();
    let params = calls.last().unwrap().params.expect("derived params");
    let hint = params.operation_timeout_ms.expect("operation timeout hint");
    assert!(hint > 8_000 && hint <= 10_000, "hint {hint}ms");
    assert!(params.cancel_after_ms.is_none());
    driver.close().await.unwrap();
}

#[tokio::test]
async fn explicit_operation_timeout_wins_over_the_deadline() {
    let server = MockServer::start_ok().await;
    let config =
        single_endpoint_config("/db").with_operation_timeout(Duration::from_millis(1500));
    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), config).await.unwrap();

    let call_ctx = ctx.with_timeout(Duration::from_secs(30));
    let mut op = RawOperation::new("m", json!({}));
    driver.call(&call_ctx, &mut op).await.unwrap();

    let calls = server.calls();
    let params = calls.last().unwrap().params.expect("explicit params");
    assert_eq!(params.operation_timeout_ms, Some(1500));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn calls_without_deadline_carry_no_hints() {
    let server = MockServer::start_ok().await;
    let ctx = Context::background();
    let driver = dial(&ctx, &server.addr(), single_endpoint_config("/db"))
        .await
        .unwrap();

    let mut op = RawOperation::new("m", json!({}));
    driver.call(&ctx, &mut op).await.unwrap();

    let calls = server.calls();
    assert!(calls.last().unwrap().params.is_none());
    driver.close().await.unwrap();
}
