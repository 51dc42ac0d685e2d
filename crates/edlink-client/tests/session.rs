#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]
//! Session lifecycle tests against an in-process mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, MockServer};
use edlink_client::proto::{InterfaceEntry, InterfaceSet};
use edlink_client::{
    ClientError, DisconnectSource, Endpoint, RequestMetadata, Session, SessionConfig,
    SessionState, Severity,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_closed(session: &Session) {
    let mut state = session.watch_state();
    timeout(WAIT, state.wait_for(|s| *s == SessionState::Closed))
        .await
        .expect("session did not close in time")
        .unwrap();
}

#[tokio::test]
async fn test_connect_verifies_with_heartbeat() {
    let server = MockServer::start().await;
    server.set_clock_skew_ms(250);

    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(server.heartbeat_calls() >= 1);

    let sample = session.heartbeat().await.unwrap();
    // Latency includes the configured skew plus a local round trip.
    assert!(
        (sample.latency_ms - 250).abs() < 1_000,
        "unexpected latency {sample:?}"
    );
    assert_eq!(
        sample.latency_ms,
        sample.server_timestamp_ms - sample.sent_at_ms
    );

    session.close().await;
}

#[tokio::test]
async fn test_failed_probe_starts_nothing() {
    let server = MockServer::start().await;
    server.set_healthy(false);

    let result = Session::connect_with_config(&server.endpoint(), fast_config()).await;
    match result {
        Err(ClientError::ConstructionFailed(status)) => {
            assert_eq!(status.code(), tonic::Code::Unavailable);
        }
        other => panic!("expected construction failure, got {other:?}"),
    }

    // No background tasks: no further heartbeats, no log subscription.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.heartbeat_calls(), 1);
    assert_eq!(server.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_unanswered_probe_times_out_construction() {
    let server = MockServer::start().await;
    server.hang_heartbeats();

    let mut config = fast_config();
    config.health.timeout = Duration::from_millis(300);

    let result = timeout(WAIT, Session::connect_with_config(&server.endpoint(), config))
        .await
        .unwrap();
    match result {
        Err(ClientError::ConstructionFailed(status)) => {
            assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        }
        other => panic!("expected construction failure, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.heartbeat_calls(), 1);
    assert_eq!(server.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_https_endpoint_requires_tls_handshake() {
    // The mock speaks plaintext HTTP/2 only, so a TLS client must not get through.
    let server = MockServer::start().await;
    let endpoint = Endpoint::parse(&format!("https://{}", server.addr)).unwrap();
    assert!(endpoint.is_tls());

    let result = timeout(WAIT, Session::connect_with_config(&endpoint, fast_config()))
        .await
        .unwrap();
    assert!(
        matches!(result, Err(ClientError::Transport(_))),
        "expected transport error, got {result:?}"
    );
    assert_eq!(server.heartbeat_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_server_fails_construction() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = Endpoint::parse(&format!("http://127.0.0.1:{port}")).unwrap();
    let result = Session::connect_with_config(&endpoint, fast_config()).await;
    assert!(matches!(result, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn test_execute_command() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();

    let reply = session.execute_command("build --all").await.unwrap();
    assert!(reply.success);
    assert_eq!(reply.message, "ran build --all");

    let refused = session.execute_command("nope").await.unwrap();
    assert!(!refused.success);

    // Remote failure surfaces to this call only; the session stays up.
    let err = session.execute_command("explode").await.unwrap_err();
    let status = err.status().unwrap();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(status.message().contains("explode"));
    assert_eq!(session.state(), SessionState::Active);

    assert_eq!(server.commands(), vec!["build --all", "nope", "explode"]);
    session.close().await;
}

#[tokio::test]
async fn test_interface_set_roundtrip() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();

    assert!(session.fetch_interface_set().await.unwrap().interfaces.is_empty());

    let set = InterfaceSet {
        interfaces: vec![InterfaceEntry {
            name: "viewport".into(),
            kind: "panel".into(),
            properties: [("dock".to_string(), "left".to_string())].into(),
        }],
    };
    let reply = session.apply_interface_set(set.clone()).await.unwrap();
    assert!(reply.success);
    assert_eq!(session.fetch_interface_set().await.unwrap(), set);

    session.close().await;
}

#[tokio::test]
async fn test_metadata_attached_to_every_call() {
    let server = MockServer::start().await;
    let config = SessionConfig {
        metadata: RequestMetadata::from_pairs([("authorization", "Bearer t0ken")]).unwrap(),
        ..fast_config()
    };
    let session = Session::connect_with_config(&server.endpoint(), config)
        .await
        .unwrap();
    server.wait_for_log_subscriber().await;

    session.execute_command("noop").await.unwrap();
    session.fetch_interface_set().await.unwrap();
    session.close().await;

    let headers = server.auth_headers();
    assert!(headers.len() >= 4);
    assert!(headers
        .iter()
        .all(|h| h.as_deref() == Some("Bearer t0ken")));
}

#[tokio::test]
async fn test_no_metadata_by_default() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    session.execute_command("noop").await.unwrap();
    session.close().await;

    assert!(server.auth_headers().iter().all(Option::is_none));
}

#[tokio::test]
async fn test_logs_forwarded_in_order() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    let mut logs = session.subscribe_logs();
    server.wait_for_log_subscriber().await;

    server.push_log("compiling", 1).await;
    server.push_log("slow frame", 2).await;
    server.push_log("crash", 4).await;

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(timeout(WAIT, logs.recv()).await.unwrap().unwrap());
    }
    assert_eq!(
        received
            .iter()
            .map(|r| (r.message.as_str(), r.level))
            .collect::<Vec<_>>(),
        vec![
            ("compiling", Severity::Info),
            ("slow frame", Severity::Warning),
            ("crash", Severity::Critical),
        ]
    );

    session.close().await;
}

#[tokio::test]
async fn test_ten_good_heartbeats_then_two_failures() {
    let server = MockServer::start().await;
    // Construction probe + 10 monitor cycles, then two failures.
    let mut plan = vec![true; 11];
    plan.extend([false, false]);
    server.plan_heartbeats(&plan);

    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    let mut disconnects = session.watch_disconnect();

    timeout(WAIT, disconnects.changed()).await.unwrap().unwrap();
    let disconnect = disconnects.borrow_and_update().clone().unwrap();
    assert_eq!(disconnect.source, DisconnectSource::Heartbeat);
    assert!(disconnect.reason.contains("heartbeat"));

    wait_closed(&session).await;
    // Monitor stopped right at the second failure; no third attempt.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.heartbeat_calls(), 13);
    assert!(!disconnects.has_changed().unwrap());

    assert!(matches!(
        session.execute_command("late").await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_interleaved_failures_disconnect_once() {
    let server = MockServer::start().await;
    // probe ok, then fail, ok, fail, fail
    server.plan_heartbeats(&[true, false, true, false, false]);

    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();

    let disconnect = timeout(WAIT, session.disconnected()).await.unwrap();
    assert_eq!(disconnect.unwrap().source, DisconnectSource::Heartbeat);
    assert_eq!(server.heartbeat_calls(), 5);
}

#[tokio::test]
async fn test_single_failure_tolerated() {
    let server = MockServer::start().await;
    server.plan_heartbeats(&[true, false]);

    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(session.state(), SessionState::Active);
    assert!(session.disconnect_reason().is_none());
    assert!(server.heartbeat_calls() > 3);
    session.close().await;
}

#[tokio::test]
async fn test_clean_log_stream_end_keeps_session_active() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    server.wait_for_log_subscriber().await;

    server.end_log_streams();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(session.state(), SessionState::Active);
    assert!(session.disconnect_reason().is_none());
    // The health monitor keeps going and requests still work.
    let calls = server.heartbeat_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.heartbeat_calls() > calls);
    assert!(session.execute_command("noop").await.unwrap().success);

    session.close().await;
    assert!(session.disconnect_reason().is_none());
}

#[tokio::test]
async fn test_log_stream_error_disconnects_once() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    let mut logs = session.subscribe_logs();
    server.wait_for_log_subscriber().await;

    server.break_log_stream().await;

    let disconnect = timeout(WAIT, session.disconnected()).await.unwrap().unwrap();
    assert_eq!(disconnect.source, DisconnectSource::LogStream);
    assert!(disconnect.reason.contains("log stream"));
    assert_eq!(session.state(), SessionState::Closed);

    // The feed ends for subscribers once the session is gone.
    assert!(matches!(
        timeout(WAIT, logs.recv()).await.unwrap(),
        Err(RecvError::Closed)
    ));
}

#[tokio::test]
async fn test_both_tasks_failing_reports_first_only() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    let mut disconnects = session.watch_disconnect();
    server.wait_for_log_subscriber().await;

    server.set_healthy(false);
    server.break_log_stream().await;

    timeout(WAIT, disconnects.changed()).await.unwrap().unwrap();
    let first = disconnects.borrow_and_update().clone().unwrap();
    wait_closed(&session).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!disconnects.has_changed().unwrap());
    assert_eq!(session.disconnect_reason(), Some(first));
}

#[tokio::test]
async fn test_close_is_clean_and_idempotent() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    let mut logs = session.subscribe_logs();
    server.wait_for_log_subscriber().await;

    session.close().await;
    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.disconnect_reason().is_none());
    assert!(matches!(logs.recv().await, Err(RecvError::Closed)));
    assert!(matches!(
        session.heartbeat().await,
        Err(ClientError::Closed)
    ));

    // Background tasks are gone: no heartbeats after close.
    let calls = server.heartbeat_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.heartbeat_calls(), calls);

    // Logs pushed after close are never delivered.
    server.push_log("after close", 1).await;
    let mut late = session.subscribe_logs();
    assert!(matches!(late.recv().await, Err(RecvError::Closed)));
}

#[tokio::test]
async fn test_close_cancels_log_stream_without_disconnect() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    let disconnects = session.watch_disconnect();
    server.wait_for_log_subscriber().await;
    assert_eq!(server.open_log_streams(), 1);

    session.close().await;

    // The server sees the call go away.
    for _ in 0..100 {
        if server.open_log_streams() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.open_log_streams(), 0);
    assert!(disconnects.borrow().is_none());
}

#[tokio::test]
async fn test_close_from_disconnect_handler() {
    let server = MockServer::start().await;
    let session = Arc::new(
        Session::connect_with_config(&server.endpoint(), fast_config())
            .await
            .unwrap(),
    );
    server.wait_for_log_subscriber().await;

    let handler = {
        let session = Arc::clone(&session);
        let mut disconnects = session.watch_disconnect();
        tokio::spawn(async move {
            disconnects.changed().await.unwrap();
            session.close().await;
            session.close().await;
            session.state()
        })
    };

    server.break_log_stream().await;

    let state = timeout(WAIT, handler).await.unwrap().unwrap();
    assert_eq!(state, SessionState::Closed);
}

#[tokio::test]
async fn test_drop_stops_background_tasks() {
    let server = MockServer::start().await;
    let session = Session::connect_with_config(&server.endpoint(), fast_config())
        .await
        .unwrap();
    server.wait_for_log_subscriber().await;
    drop(session);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let calls = server.heartbeat_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.heartbeat_calls(), calls);
}
