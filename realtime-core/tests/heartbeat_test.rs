// Integration tests for liveness probing and stale detection

mod common;

use common::{settle, EventRecorder, ScriptedConnector};
use pretty_assertions::assert_eq;
use realtime_core::{
    ConnectOptions, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
    ErrorKind, EventPayload,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (ConnectionManager, ScriptedConnector) {
    let config = ConnectionConfig::builder()
        .address("ws://game.example.com/ws")
        .heartbeat(Duration::from_secs(1), Duration::from_secs(3))
        .reconnect(Duration::from_secs(10), Duration::from_secs(30), 0.0)
        .build();
    let connector = ScriptedConnector::new();
    let manager = ConnectionManager::with_connector(config, Arc::new(connector.clone()));
    (manager, connector)
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

async fn open(manager: &ConnectionManager, connector: &ScriptedConnector) {
    manager.connect(ConnectOptions::new());
    connector.latest().accept();
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_pings_sent_each_interval() {
    let (manager, connector) = setup();
    open(&manager, &connector).await;
    let transport = connector.latest();

    advance(1_001).await;
    assert_eq!(transport.pings().len(), 1);
    advance(1_000).await;
    let pings = transport.pings();
    assert_eq!(pings.len(), 2);

    let ping: Value = serde_json::from_str(&pings[0]).unwrap();
    assert_eq!(ping["type"], "ping");
    assert!(ping["t"].is_i64());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_traffic_keeps_connection_alive() {
    let (manager, connector) = setup();
    let recorder = EventRecorder::attach(&manager, &["error"]);
    open(&manager, &connector).await;
    let transport = connector.latest();

    for _ in 0..10 {
        advance(900).await;
        transport.deliver(r#"{"event":"tick","data":null}"#);
        settle().await;
    }

    assert!(recorder.errors().is_empty());
    assert_eq!(manager.state(), ConnectionState::Open);
    assert!(transport.closes().is_empty());
    assert!(manager.status().last_inbound_at_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_silence_closes_connection_once() {
    let (manager, connector) = setup();
    let recorder = EventRecorder::attach(&manager, &["error", "close"]);
    open(&manager, &connector).await;
    let transport = connector.latest();

    // ticks at 1s, 2s and 3s are within the threshold
    advance(3_001).await;
    assert!(recorder.errors().is_empty());

    advance(1_000).await;
    let errors: Vec<ConnectionError> = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::StaleConnection);
    assert_eq!(transport.closes(), vec![(4000, "heartbeat stale".to_string())]);
    assert_eq!(transport.pings().len(), 4);

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(recorder.count("close"), 1);
    assert!(manager.reconnect_pending());

    advance(5_000).await;
    assert_eq!(recorder.errors().len(), 1);
    assert_eq!(transport.pings().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stale_close_settles_without_transport_report() {
    let (manager, connector) = setup();
    let recorder = EventRecorder::attach(&manager, &["error", "close"]);
    open(&manager, &connector).await;
    let transport = connector.latest();
    transport.set_silent_close(true);

    advance(4_001).await;

    assert_eq!(transport.closes(), vec![(4000, "heartbeat stale".to_string())]);
    assert_eq!(recorder.errors().len(), 1);
    assert_eq!(
        recorder.named("close"),
        vec![EventPayload::Close {
            code: 4000,
            reason: "heartbeat stale".to_string(),
            is_mock: false,
        }]
    );
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(!manager.is_connected());
    assert!(manager.reconnect_pending());

    manager.send("after stale");
    assert_eq!(manager.status().queued_count, 1);
    assert!(transport.sent_payloads().is_empty());

    advance(10_000).await;
    assert_eq!(connector.count(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_after_disconnect() {
    let (manager, connector) = setup();
    open(&manager, &connector).await;
    let transport = connector.latest();

    manager.disconnect();
    advance(10_000).await;

    assert!(transport.pings().is_empty());
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_mock_mode_has_no_heartbeat() {
    let config = ConnectionConfig::builder()
        .heartbeat(Duration::from_secs(1), Duration::from_secs(2))
        .mock_open_delay(Duration::from_millis(10))
        .build();
    let manager = ConnectionManager::offline(config);
    let recorder = EventRecorder::attach(&manager, &["error", "message"]);
    manager.connect(ConnectOptions::new());

    advance(10_000).await;

    assert_eq!(manager.state(), ConnectionState::Mock);
    assert!(recorder.errors().is_empty());
    assert_eq!(recorder.count("message"), 0);
}
